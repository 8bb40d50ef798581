//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rockhold::{Options, Record, Schema, Store};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

/// The canonical 17-record fixture used across the query suites.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemTest {
    pub key: i64,
    pub id: i64,
    pub name: String,
    pub category: String,
    pub created: DateTime<Utc>,
    pub tags: Option<Vec<String>>,
    pub color: String,
    pub fruit: String,
    pub update_field: String,
    pub update_index: String,
}

impl Record for ItemTest {
    fn schema() -> Schema {
        Schema::new("ItemTest")
            .index("category")
            .index("update_index")
    }
}

impl ItemTest {
    pub fn new(key: i64, id: i64, name: &str, category: &str, created: DateTime<Utc>) -> Self {
        Self {
            key,
            id,
            name: name.to_string(),
            category: category.to_string(),
            created,
            tags: None,
            color: String::new(),
            fruit: String::new(),
            update_field: String::new(),
            update_index: String::new(),
        }
    }

    fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    fn color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    fn fruit(mut self, fruit: &str) -> Self {
        self.fruit = fruit.to_string();
        self
    }
}

/// Opens a store in a fresh temporary directory. Keep the `TempDir` alive
/// for the duration of the test.
pub fn open_test_store() -> (Store, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("creating temp dir");
    let store = Store::open(Options::new(dir.path())).expect("opening test store");
    (store, dir)
}

pub fn test_data() -> Vec<ItemTest> {
    let now = Utc::now();
    vec![
        ItemTest::new(0, 0, "car", "vehicle", now - Duration::days(365)),
        ItemTest::new(1, 1, "truck", "vehicle", now + Duration::days(912)),
        ItemTest::new(2, 0, "seal", "animal", now - Duration::days(365)),
        ItemTest::new(3, 3, "van", "vehicle", now + Duration::days(912)),
        ItemTest::new(4, 8, "pizza", "food", now).tags(&["cooked"]),
        ItemTest::new(5, 1, "crow", "animal", now)
            .color("blue")
            .fruit("orange"),
        ItemTest::new(6, 5, "van", "vehicle", now)
            .color("orange")
            .fruit("orange"),
        ItemTest::new(7, 5, "pizza", "food", now).tags(&["cooked"]),
        ItemTest::new(8, 6, "lion", "animal", now + Duration::days(1095)),
        ItemTest::new(9, 7, "bear", "animal", now + Duration::days(1095)),
        ItemTest::new(10, 9, "tacos", "food", now - Duration::days(1095))
            .tags(&["cooked"])
            .color("orange"),
        ItemTest::new(11, 10, "golf cart", "vehicle", now + Duration::days(30))
            .color("pink")
            .fruit("apple"),
        ItemTest::new(12, 11, "oatmeal", "food", now - Duration::days(30)).tags(&["cooked"]),
        ItemTest::new(13, 8, "mouse", "animal", now),
        ItemTest::new(14, 12, "fish", "animal", now - Duration::days(1)),
        ItemTest::new(15, 13, "fish", "food", now).tags(&["cooked"]),
        ItemTest::new(16, 9, "zebra", "animal", now),
    ]
}

pub fn insert_test_data(store: &Store) -> Vec<ItemTest> {
    let data = test_data();
    for item in &data {
        let mut item = item.clone();
        store
            .insert(item.key, &mut item)
            .expect("inserting fixture record");
    }
    data
}

/// Asserts a result set contains exactly the fixture records with the
/// given keys, in any order.
pub fn assert_same_keys(name: &str, result: &[ItemTest], expected: &[i64]) {
    let mut got: Vec<i64> = result.iter().map(|r| r.key).collect();
    let mut want = expected.to_vec();
    got.sort_unstable();
    want.sort_unstable();
    assert_eq!(got, want, "{name}: result keys do not match");
}
