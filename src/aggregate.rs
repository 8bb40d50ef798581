//! Grouped aggregation over query results.
//!
//! `find_aggregate` partitions the post-processed result set by a tuple of
//! group fields; each partition becomes an [`AggregateResult`] answering
//! count/max/min/sum/avg questions without another trip to the engine.

use std::collections::BTreeMap;
use std::cmp::Ordering;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::compare::compare;
use crate::error::{Result, StoreError};
use crate::executor::Row;
use crate::schema::Schema;
use crate::value;

/// One group of records sharing a group-field tuple.
pub struct AggregateResult {
    group: Vec<Value>,
    rows: Vec<Value>,
    schema: Arc<Schema>,
}

/// Partitions rows by the values of `group_by` fields. Groups come back
/// ordered by their canonical group-tuple text, so iteration order is
/// deterministic.
pub(crate) fn group_rows(
    schema: &Arc<Schema>,
    rows: Vec<Row>,
    group_by: &[&str],
) -> Result<Vec<AggregateResult>> {
    let mut groups: BTreeMap<Vec<String>, AggregateResult> = BTreeMap::new();

    for (_, record) in rows {
        let mut tuple = Vec::with_capacity(group_by.len());
        let mut tuple_text = Vec::with_capacity(group_by.len());
        for field in group_by {
            let v = value::field_at(&record, field)
                .ok_or_else(|| StoreError::BadField(field.to_string()))?;
            tuple_text.push(v.to_string());
            tuple.push(v.clone());
        }

        groups
            .entry(tuple_text)
            .or_insert_with(|| AggregateResult {
                group: tuple,
                rows: Vec::new(),
                schema: Arc::clone(schema),
            })
            .rows
            .push(record);
    }

    Ok(groups.into_values().collect())
}

impl AggregateResult {
    /// Decodes the group-tuple value at `position`.
    pub fn group<G: DeserializeOwned>(&self, position: usize) -> Result<G> {
        let v = self.group.get(position).ok_or_else(|| {
            StoreError::BadField(format!("group position {position} out of range"))
        })?;
        serde_json::from_value(v.clone()).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Number of records in the group.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// The record holding the greatest value of `field`.
    pub fn max<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        self.extreme(field, Ordering::Greater)
    }

    /// The record holding the smallest value of `field`.
    pub fn min<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        self.extreme(field, Ordering::Less)
    }

    fn extreme<T: DeserializeOwned>(&self, field: &str, want: Ordering) -> Result<T> {
        let custom = self.schema.comparator_for(field);
        let mut best: Option<&Value> = None;
        for record in &self.rows {
            let candidate = value::field_at(record, field)
                .ok_or_else(|| StoreError::BadField(field.to_string()))?;
            best = match best {
                None => Some(record),
                Some(current) => {
                    let current_field = value::field_at(current, field)
                        .ok_or_else(|| StoreError::BadField(field.to_string()))?;
                    if compare(custom, candidate, current_field)? == want {
                        Some(record)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        let best = best.ok_or(StoreError::NotFound)?;
        serde_json::from_value(best.clone()).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Sum of a numeric field across the group.
    pub fn sum(&self, field: &str) -> Result<f64> {
        let mut total = 0.0;
        for record in &self.rows {
            let v = value::field_at(record, field)
                .ok_or_else(|| StoreError::BadField(field.to_string()))?;
            total += v.as_f64().ok_or_else(|| {
                StoreError::TypeMismatch(format!("field {field} is not numeric"))
            })?;
        }
        Ok(total)
    }

    /// Mean of a numeric field across the group. Zero for an empty group.
    pub fn avg(&self, field: &str) -> Result<f64> {
        if self.rows.is_empty() {
            return Ok(0.0);
        }
        Ok(self.sum(field)? / self.rows.len() as f64)
    }

    /// Decodes every record in the group.
    pub fn records<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(|e| StoreError::Codec(e.to_string())))
            .collect()
    }

    /// Folds the decoded records of the group.
    pub fn reduce<T: DeserializeOwned, A>(
        &self,
        init: A,
        mut f: impl FnMut(A, T) -> A,
    ) -> Result<A> {
        let mut acc = init;
        for record in &self.rows {
            let decoded: T = serde_json::from_value(record.clone())
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            acc = f(acc, decoded);
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_groups() -> Vec<AggregateResult> {
        let schema = Arc::new(Schema::new("Item"));
        let rows: Vec<Row> = vec![
            (b"k0".to_vec(), json!({"category": "a", "id": 1})),
            (b"k1".to_vec(), json!({"category": "b", "id": 5})),
            (b"k2".to_vec(), json!({"category": "a", "id": 3})),
            (b"k3".to_vec(), json!({"category": "b", "id": 2})),
        ];
        group_rows(&schema, rows, &["category"]).unwrap()
    }

    #[test]
    fn test_grouping_partitions_and_orders() {
        let groups = sample_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group::<String>(0).unwrap(), "a");
        assert_eq!(groups[1].group::<String>(0).unwrap(), "b");
        assert_eq!(groups[0].count(), 2);
        assert_eq!(groups[1].count(), 2);
    }

    #[test]
    fn test_max_min_sum_avg() {
        let groups = sample_groups();
        let a = &groups[0];

        let max: Value = a.max("id").unwrap();
        assert_eq!(max["id"], json!(3));
        let min: Value = a.min("id").unwrap();
        assert_eq!(min["id"], json!(1));
        assert_eq!(a.sum("id").unwrap(), 4.0);
        assert_eq!(a.avg("id").unwrap(), 2.0);
    }

    #[test]
    fn test_reduce_folds_records() {
        let groups = sample_groups();
        let ids = groups[1]
            .reduce(Vec::new(), |mut acc, v: Value| {
                acc.push(v["id"].as_i64().unwrap());
                acc
            })
            .unwrap();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn test_unknown_group_field_errors() {
        let schema = Arc::new(Schema::new("Item"));
        let rows: Vec<Row> = vec![(b"k".to_vec(), json!({"id": 1}))];
        let result = group_rows(&schema, rows, &["missing"]);
        assert!(matches!(result, Err(StoreError::BadField(_))));
    }
}
