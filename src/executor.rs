//! Query planning and execution.
//!
//! Each OR-branch of a query plans independently:
//!
//! 1. An explicit `index()` pin drives a secondary-index scan. An equality
//!    or membership criterion on the indexed field narrows the scan to the
//!    matching entries; range criteria bound-check entry values as the
//!    index prefix streams by.
//! 2. Otherwise an equality or membership criterion on the key
//!    pseudo-field turns into direct record lookups.
//! 3. Otherwise the branch scans the whole type prefix.
//!
//! Candidates stream out of the engine iterator and are filtered against
//! the branch's criteria in memory; nothing buffers the full candidate
//! set. Branch results concatenate and deduplicate by record key, then
//! sort, reverse, skip, and limit apply in that order. Unsorted queries
//! stop scanning as soon as skip+limit results exist.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::compare::{compare, kind_name, values_equal};
use crate::engine::KvTransaction;
use crate::error::{Result, StoreError};
use crate::index::Indexer;
use crate::keys;
use crate::query::{Criterion, Operand, Query, Test};
use crate::schema::Schema;
use crate::store::Store;
use crate::value;

/// A query match: the full record key and the decoded record.
pub(crate) type Row = (Vec<u8>, Value);

/// Evaluation context handed to `match_fn` predicates.
///
/// Grants the current field value, the whole record, and sub-queries that
/// execute against the same transaction snapshot as the outer query.
/// Deliberately exposes no write surface.
pub struct RecordAccess<'a> {
    field: &'a Value,
    record: &'a Value,
    store: &'a Store,
    kv: &'a dyn KvTransaction,
}

impl RecordAccess<'_> {
    /// The value of the field the criterion is attached to.
    pub fn field(&self) -> &Value {
        self.field
    }

    /// The field value decoded into a concrete type.
    pub fn field_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.field.clone()).map_err(|e| {
            StoreError::TypeMismatch(format!(
                "field is {}, not the requested type: {e}",
                kind_name(self.field)
            ))
        })
    }

    /// The whole record decoded into its concrete type.
    pub fn record<T: crate::schema::Record>(&self) -> Result<T> {
        serde_json::from_value(self.record.clone()).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Runs a nested query in the same snapshot as the outer query.
    pub fn sub_query<T: crate::schema::Record>(&self, query: &Query) -> Result<Vec<T>> {
        let schema = self.store.schema_for::<T>();
        let rows = run_query(self.store, self.kv, schema.as_ref(), query)?;
        decode_rows(rows)
    }

    /// Runs a nested aggregate query in the same snapshot.
    pub fn sub_aggregate<T: crate::schema::Record>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<crate::aggregate::AggregateResult>> {
        let schema = self.store.schema_for::<T>();
        let rows = run_query(self.store, self.kv, schema.as_ref(), query)?;
        crate::aggregate::group_rows(&schema, rows, group_by)
    }
}

/// Decodes query rows into concrete records.
pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|(_, value)| serde_json::from_value(value).map_err(|e| StoreError::Codec(e.to_string())))
        .collect()
}

/// Runs a query to completion and returns the post-processed rows.
pub(crate) fn run_query(
    store: &Store,
    kv: &dyn KvTransaction,
    schema: &Schema,
    query: &Query,
) -> Result<Vec<Row>> {
    let skip = query.skip.unwrap_or(0);
    // Unsorted queries preserve access-path order, so reversal happens at
    // the iterator and the scan can stop early at skip+limit results.
    let scan_reverse = query.reverse && query.sort.is_empty();
    let stop_after = if query.sort.is_empty() {
        query.limit.map(|limit| skip.saturating_add(limit))
    } else {
        None
    };

    let mut rows: Vec<Row> = Vec::new();
    let mut seen: HashSet<Vec<u8>> = HashSet::new();

    let mut branches = vec![query];
    while let Some(branch) = branches.pop() {
        let full = run_branch(store, kv, schema, branch, scan_reverse, stop_after, &mut seen, &mut rows)?;
        if full {
            break;
        }
        branches.extend(branch.ors.iter().rev());
    }

    if !query.sort.is_empty() {
        sort_rows(schema, &query.sort, &mut rows)?;
        if query.reverse {
            rows.reverse();
        }
    }

    let rows = rows
        .into_iter()
        .skip(skip)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(rows)
}

/// Executes one AND-chain. Returns true once skip+limit rows have been
/// collected and scanning can stop entirely.
#[allow(clippy::too_many_arguments)]
fn run_branch(
    store: &Store,
    kv: &dyn KvTransaction,
    schema: &Schema,
    branch: &Query,
    reverse: bool,
    stop_after: Option<usize>,
    seen: &mut HashSet<Vec<u8>>,
    rows: &mut Vec<Row>,
) -> Result<bool> {
    let encoding = store.encoding();
    let type_name = schema.type_name();

    let mut emit = |key: Vec<u8>, record: Value| -> bool {
        if seen.insert(key.clone()) {
            rows.push((key, record));
        }
        stop_after.is_some_and(|n| rows.len() >= n)
    };

    let mut visit = |key: Vec<u8>, bytes: &[u8]| -> Result<bool> {
        let record = encoding.decode_dynamic(bytes)?;
        let key_value = encoding.decode_dynamic(keys::record_key_suffix(&key, type_name))?;
        if eval_criteria(store, kv, schema, &branch.criteria, &key_value, &record)? {
            return Ok(emit(key, record));
        }
        Ok(false)
    };

    if let Some(index_name) = &branch.index {
        let spec = schema
            .index_by_name(index_name)
            .ok_or_else(|| StoreError::BadIndex(index_name.clone()))?;
        log::debug!("query on {type_name}: driving scan with index {index_name}");

        let indexer = Indexer::new(encoding, schema);
        let bound = branch
            .criteria
            .iter()
            .find(|c| c.field == spec.field)
            .map(|c| &c.test);

        // Equality and membership narrow to exact entries.
        let entry_values: Option<Vec<&Value>> = match bound {
            Some(Test::Eq(Operand::Literal(v))) => Some(vec![v]),
            Some(Test::In(values)) => Some(values.iter().collect()),
            _ => None,
        };

        if let Some(mut values) = entry_values {
            if reverse {
                values.reverse();
            }
            for entry_value in values {
                let entry =
                    keys::index_entry(type_name, &spec.name, &encoding.encode(entry_value)?);
                if let Some(bytes) = kv.get(&entry)? {
                    if visit_index_entry(kv, &indexer, &bytes, reverse, &mut visit)? {
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }

        let prefix = keys::index_prefix(type_name, &spec.name);
        let mut iter = kv.scan(&prefix, None, reverse)?;
        while let Some(item) = iter.next() {
            let (entry_key, bytes) = item?;
            if let Some(test) = bound {
                let entry_value = encoding.decode_dynamic(&entry_key[prefix.len()..])?;
                if !range_bound_matches(schema, &spec.field, test, &entry_value)? {
                    continue;
                }
            }
            if visit_index_entry(kv, &indexer, &bytes, reverse, &mut visit)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    // A key equality or membership criterion turns into point lookups.
    let key_lookup = branch.criteria.iter().find_map(|c| {
        if !c.is_key() {
            return None;
        }
        match &c.test {
            Test::Eq(Operand::Literal(v)) => Some(vec![v]),
            Test::In(values) => Some(values.iter().collect()),
            _ => None,
        }
    });

    if let Some(mut key_values) = key_lookup {
        log::debug!("query on {type_name}: direct key lookup");
        if reverse {
            key_values.reverse();
        }
        for key_value in key_values {
            let record_key = keys::record_key(type_name, &encoding.encode(key_value)?);
            if let Some(bytes) = kv.get(&record_key)? {
                if visit(record_key, &bytes)? {
                    return Ok(true);
                }
            }
        }
        return Ok(false);
    }

    // Full scan over the type prefix.
    let prefix = keys::type_prefix(type_name);
    let mut iter = kv.scan(&prefix, None, reverse)?;
    while let Some(item) = iter.next() {
        let (key, bytes) = item?;
        if visit(key, &bytes)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Feeds every record listed under one index entry to `visit`, in record-key
/// order (reversed when the scan runs backward).
fn visit_index_entry(
    kv: &dyn KvTransaction,
    indexer: &Indexer<'_>,
    entry_bytes: &[u8],
    reverse: bool,
    visit: &mut impl FnMut(Vec<u8>, &[u8]) -> Result<bool>,
) -> Result<bool> {
    let mut record_keys = indexer.decode_list(entry_bytes)?;
    if reverse {
        record_keys.reverse();
    }
    for record_key in record_keys {
        // Entries can outlive their record within badly interleaved
        // external writes; a missing record is simply skipped.
        if let Some(bytes) = kv.get(&record_key)? {
            if visit(record_key, &bytes)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Checks an index-entry value against the range criterion consumed by the
/// scan. Non-range tests never restrict the entry stream.
fn range_bound_matches(
    schema: &Schema,
    field: &str,
    test: &Test,
    entry_value: &Value,
) -> Result<bool> {
    let custom = schema.comparator_for(field);
    let ord = |operand: &Operand| -> Result<Option<Ordering>> {
        match operand {
            Operand::Literal(v) if !v.is_null() => Ok(Some(compare(custom, entry_value, v)?)),
            _ => Ok(None),
        }
    };
    Ok(match test {
        Test::Gt(op) => ord(op)?.map_or(true, |o| o == Ordering::Greater),
        Test::Ge(op) => ord(op)?.map_or(true, |o| o != Ordering::Less),
        Test::Lt(op) => ord(op)?.map_or(true, |o| o == Ordering::Less),
        Test::Le(op) => ord(op)?.map_or(true, |o| o != Ordering::Greater),
        _ => true,
    })
}

fn eval_criteria(
    store: &Store,
    kv: &dyn KvTransaction,
    schema: &Schema,
    criteria: &[Criterion],
    key_value: &Value,
    record: &Value,
) -> Result<bool> {
    for criterion in criteria {
        if !eval_criterion(store, kv, schema, criterion, key_value, record)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_criterion(
    store: &Store,
    kv: &dyn KvTransaction,
    schema: &Schema,
    criterion: &Criterion,
    key_value: &Value,
    record: &Value,
) -> Result<bool> {
    let target = if criterion.is_key() {
        key_value
    } else {
        value::field_at(record, &criterion.field)
            .ok_or_else(|| StoreError::BadField(criterion.field.clone()))?
    };
    let custom = schema.comparator_for(&criterion.field);

    let resolve = |operand: &Operand| -> Result<Value> {
        let resolved = match operand {
            Operand::Literal(v) => v.clone(),
            Operand::Field(path) => value::field_at(record, path)
                .ok_or_else(|| StoreError::BadField(path.clone()))?
                .clone(),
        };
        if resolved.is_null() {
            return Err(StoreError::TypeMismatch(
                "cannot compare against nil; use is_nil()".to_string(),
            ));
        }
        Ok(resolved)
    };

    Ok(match &criterion.test {
        Test::Eq(op) => compare(custom, target, &resolve(op)?)? == Ordering::Equal,
        Test::Ne(op) => compare(custom, target, &resolve(op)?)? != Ordering::Equal,
        Test::Gt(op) => compare(custom, target, &resolve(op)?)? == Ordering::Greater,
        Test::Ge(op) => compare(custom, target, &resolve(op)?)? != Ordering::Less,
        Test::Lt(op) => compare(custom, target, &resolve(op)?)? == Ordering::Less,
        Test::Le(op) => compare(custom, target, &resolve(op)?)? != Ordering::Greater,
        Test::In(values) => {
            let mut found = false;
            for candidate in values {
                if values_equal(custom, target, candidate)? {
                    found = true;
                    break;
                }
            }
            found
        }
        Test::IsNil => target.is_null(),
        Test::Matches(re) => re.is_match(string_target(criterion, target)?),
        Test::HasPrefix(prefix) => string_target(criterion, target)?.starts_with(prefix.as_str()),
        Test::HasSuffix(suffix) => string_target(criterion, target)?.ends_with(suffix.as_str()),
        Test::MatchFn(f) => {
            let access = RecordAccess {
                field: target,
                record,
                store,
                kv,
            };
            f(&access)?
        }
    })
}

fn string_target<'a>(criterion: &Criterion, target: &'a Value) -> Result<&'a str> {
    target.as_str().ok_or_else(|| {
        StoreError::TypeMismatch(format!(
            "field {} is {}, expected a string",
            criterion.field,
            kind_name(target)
        ))
    })
}

/// Stable multi-key sort. Heterogeneous value kinds under one sort field
/// fail with a type mismatch rather than silently interleaving.
fn sort_rows(schema: &Schema, sort: &[String], rows: &mut [Row]) -> Result<()> {
    let mut first_err: Option<StoreError> = None;
    rows.sort_by(|a, b| {
        if first_err.is_some() {
            return Ordering::Equal;
        }
        for field in sort {
            let left = value::field_at(&a.1, field);
            let right = value::field_at(&b.1, field);
            let (Some(left), Some(right)) = (left, right) else {
                first_err = Some(StoreError::BadField(field.clone()));
                return Ordering::Equal;
            };
            match compare(schema.comparator_for(field), left, right) {
                Ok(Ordering::Equal) => continue,
                Ok(other) => return other,
                Err(e) => {
                    first_err = Some(e);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    });
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
