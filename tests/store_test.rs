//! Store lifecycle suite: open/close, persistence across reopen, encoding
//! substitution, custom engines, sequence release.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{open_test_store, ItemTest};
use rockhold::engine::MemoryEngine;
use rockhold::{where_field, Encoding, Options, Query, Record, Schema, Store, KEY};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[test]
fn test_open_and_close() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(Options::new(dir.path())).unwrap();
    store.close().unwrap();
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::open(Options::new(dir.path())).unwrap();
        let mut item = ItemTest::new(7, 7, "lion", "animal", Utc::now());
        store.insert(item.key, &mut item).unwrap();
        store.close().unwrap();
    }

    let store = Store::open(Options::new(dir.path())).unwrap();
    let stored: ItemTest = store.get(7i64).unwrap();
    assert_eq!(stored.name, "lion");

    // Indexes persist too.
    let by_index: Vec<ItemTest> = store
        .find(&where_field("category").eq("animal").index("category"))
        .unwrap();
    assert_eq!(by_index.len(), 1);
}

#[test]
fn test_alternate_encoding() {
    let dir = TempDir::new().unwrap();
    let mut options = Options::new(dir.path());
    options.encoding = Encoding::Json;
    let store = Store::open(options).unwrap();

    let data = common::insert_test_data(&store);

    let result: Vec<ItemTest> = store.find(&where_field(KEY).eq(data[3].key)).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0], data[3]);

    let by_index: Vec<ItemTest> = store
        .find(&where_field("category").eq("vehicle").index("category"))
        .unwrap();
    assert_eq!(by_index.len(), 5);
}

#[test]
fn test_engine_accessor() {
    let (store, _dir) = open_test_store();
    let txn = store.engine().begin(false).unwrap();
    assert_eq!(txn.get(b"no-such-key").unwrap(), None);
}

#[derive(Serialize, Deserialize, Clone, Default)]
struct SeqItem {
    key: u64,
}

impl Record for SeqItem {
    fn schema() -> Schema {
        Schema::new("SeqItem").key("key")
    }
}

#[test]
fn test_sequence_watermark_survives_close() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::open(Options::new(dir.path())).unwrap();
        for expected in 0..3u64 {
            let mut item = SeqItem::default();
            let key = store.insert_sequence(&mut item).unwrap();
            assert_eq!(key, expected);
        }
        store.close().unwrap();
    }

    // Close released the unleased remainder, so the next store continues
    // right after the last allocated value.
    let store = Store::open(Options::new(dir.path())).unwrap();
    let mut item = SeqItem::default();
    assert_eq!(store.insert_sequence(&mut item).unwrap(), 3);
}

#[test]
fn test_store_over_memory_engine() {
    let dir = TempDir::new().unwrap();
    let store =
        Store::open_with_engine(Arc::new(MemoryEngine::new()), Options::new(dir.path())).unwrap();

    let mut item = ItemTest::new(1, 1, "car", "vehicle", Utc::now());
    store.insert(item.key, &mut item).unwrap();

    let result: Vec<ItemTest> = store
        .find(&where_field("category").eq("vehicle").index("category"))
        .unwrap();
    assert_eq!(result.len(), 1);

    store.delete::<_, ItemTest>(1i64).unwrap();
    let all: Vec<ItemTest> = store.find(&Query::all()).unwrap();
    assert!(all.is_empty());
}

#[test]
fn test_gc_ticker_runs_and_stops() {
    let dir = TempDir::new().unwrap();
    let mut options = Options::new(dir.path());
    options.gc_interval = Duration::from_millis(20);
    let store = Store::open(options).unwrap();

    // Give the ticker a few cycles, then close; close must join cleanly.
    std::thread::sleep(Duration::from_millis(100));
    store.close().unwrap();
}

#[test]
fn test_transaction_batches_multiple_operations() {
    let (store, _dir) = open_test_store();

    let txn = store.begin_txn(true).unwrap();
    for key in 0..5i64 {
        let mut item = ItemTest::new(key, key, "item", "batch", Utc::now());
        txn.insert(key, &mut item).unwrap();
    }
    txn.delete::<_, ItemTest>(2i64).unwrap();
    txn.commit().unwrap();

    let all: Vec<ItemTest> = store.find(&Query::all()).unwrap();
    common::assert_same_keys("batched txn", &all, &[0, 1, 3, 4]);
}
