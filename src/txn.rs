//! Operations inside a single transaction.
//!
//! [`Txn`] wraps one engine transaction and exposes the full typed API:
//! every read sees the transaction's snapshot plus its own writes, and
//! every write (record and index entries together) becomes visible to
//! others only on [`commit`](Txn::commit). The autonomous methods on
//! [`Store`](crate::Store) are thin wrappers that open a transaction, run
//! one operation, and commit.
//!
//! Write operations on a read-only transaction fail with
//! [`StoreError::ReadOnlyTxn`]. Dropping a transaction without committing
//! discards its writes.

use serde::Serialize;

use crate::aggregate::{group_rows, AggregateResult};
use crate::engine::KvTransaction;
use crate::error::{Result, StoreError};
use crate::executor::{self, decode_rows};
use crate::index::Indexer;
use crate::keys;
use crate::query::Query;
use crate::schema::Record;
use crate::store::Store;
use crate::value;

/// A transaction over a [`Store`].
pub struct Txn<'s> {
    store: &'s Store,
    kv: Box<dyn KvTransaction + 's>,
    writable: bool,
}

impl<'s> Txn<'s> {
    pub(crate) fn new(store: &'s Store, kv: Box<dyn KvTransaction + 's>, writable: bool) -> Self {
        Self {
            store,
            kv,
            writable,
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::ReadOnlyTxn)
        }
    }

    /// Inserts a record under `key`.
    ///
    /// Fails with [`StoreError::KeyExists`] when the key is taken and with
    /// [`StoreError::UniqueExists`] when a unique index already holds one
    /// of the record's values. When the schema declares a key field whose
    /// current value is zero, the key is written into the record before it
    /// is stored.
    pub fn insert<K: Serialize, T: Record>(&self, key: K, record: &mut T) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();

        let record_key = keys::record_key(schema.type_name(), &encoding.encode(&key)?);
        if self.kv.get(&record_key)?.is_some() {
            return Err(StoreError::KeyExists);
        }

        let mut record_value =
            serde_json::to_value(&*record).map_err(|e| StoreError::Codec(e.to_string()))?;

        // Key-field injection: only a zero-valued field is overwritten,
        // and only when the key round-trips into the record's type.
        if let Some(field) = schema.key_field() {
            if value::field_at(&record_value, field).is_some_and(value::is_zero) {
                let key_value =
                    serde_json::to_value(&key).map_err(|e| StoreError::Codec(e.to_string()))?;
                let mut injected = record_value.clone();
                if value::set_field_at(&mut injected, field, key_value) {
                    if let Ok(updated) = serde_json::from_value::<T>(injected.clone()) {
                        *record = updated;
                        record_value = injected;
                    }
                }
            }
        }

        self.kv.put(&record_key, &encoding.encode(&*record)?)?;
        Indexer::new(encoding, schema.as_ref()).on_insert(self.kv.as_ref(), &record_key, &record_value)
    }

    /// Inserts a record under the next value of the type's sequence and
    /// returns the allocated key.
    pub fn insert_sequence<T: Record>(&self, record: &mut T) -> Result<u64> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let key = self.store.sequence_for(schema.type_name())?.next()?;
        self.insert(key, record)?;
        Ok(key)
    }

    /// Replaces the record at `key`, reconciling index entries.
    ///
    /// Fails with [`StoreError::NotFound`] when no record exists there.
    pub fn update<K: Serialize, T: Record>(&self, key: K, record: &T) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();

        let record_key = keys::record_key(schema.type_name(), &encoding.encode(&key)?);
        let old_bytes = self.kv.get(&record_key)?.ok_or(StoreError::NotFound)?;
        let old_value = encoding.decode_dynamic(&old_bytes)?;
        let new_value =
            serde_json::to_value(record).map_err(|e| StoreError::Codec(e.to_string()))?;

        self.kv.put(&record_key, &encoding.encode(record)?)?;
        Indexer::new(encoding, schema.as_ref()).on_update(
            self.kv.as_ref(),
            &record_key,
            &old_value,
            &new_value,
        )
    }

    /// Inserts the record when `key` is free, updates it otherwise.
    pub fn upsert<K: Serialize, T: Record>(&self, key: K, record: &mut T) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();

        let record_key = keys::record_key(schema.type_name(), &encoding.encode(&key)?);
        if self.kv.get(&record_key)?.is_some() {
            self.update(key, &*record)
        } else {
            self.insert(key, record)
        }
    }

    /// Reads the record at `key`.
    pub fn get<K: Serialize, T: Record>(&self, key: K) -> Result<T> {
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();
        let record_key = keys::record_key(schema.type_name(), &encoding.encode(&key)?);
        let bytes = self.kv.get(&record_key)?.ok_or(StoreError::NotFound)?;
        encoding.decode(&bytes)
    }

    /// Deletes the record of type `T` at `key` along with its index
    /// entries.
    pub fn delete<K: Serialize, T: Record>(&self, key: K) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();

        let record_key = keys::record_key(schema.type_name(), &encoding.encode(&key)?);
        let old_bytes = self.kv.get(&record_key)?.ok_or(StoreError::NotFound)?;
        let old_value = encoding.decode_dynamic(&old_bytes)?;

        self.kv.delete(&record_key)?;
        Indexer::new(encoding, schema.as_ref()).on_delete(self.kv.as_ref(), &record_key, &old_value)
    }

    /// Returns every record matching the query, post-processed.
    pub fn find<T: Record>(&self, query: &Query) -> Result<Vec<T>> {
        let schema = self.store.schema_for::<T>();
        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), query)?;
        decode_rows(rows)
    }

    /// Returns the first record matching the query, or
    /// [`StoreError::NotFound`].
    pub fn find_one<T: Record>(&self, query: &Query) -> Result<T> {
        let mut query = query.clone();
        if query.sort.is_empty() && query.limit.is_none() {
            query.limit = Some(1);
        }
        let schema = self.store.schema_for::<T>();
        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), &query)?;
        decode_rows(rows)?.into_iter().next().ok_or(StoreError::NotFound)
    }

    /// Counts the records matching the query.
    pub fn count<T: Record>(&self, query: &Query) -> Result<usize> {
        let schema = self.store.schema_for::<T>();
        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), query)?;
        Ok(rows.len())
    }

    /// Groups the records matching the query by the given fields.
    pub fn find_aggregate<T: Record>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<AggregateResult>> {
        let schema = self.store.schema_for::<T>();
        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), query)?;
        group_rows(&schema, rows, group_by)
    }

    /// Applies `mutate` to every record matching the query and writes each
    /// back through the update path.
    ///
    /// Runs entirely inside this transaction: a uniqueness conflict on any
    /// record (including one introduced by an earlier mutation in the same
    /// batch) fails the whole operation and no changes survive.
    pub fn update_matching<T: Record>(
        &self,
        query: &Query,
        mut mutate: impl FnMut(&mut T) -> Result<()>,
    ) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();
        let indexer = Indexer::new(encoding, schema.as_ref());

        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), query)?;
        for (record_key, old_value) in rows {
            let mut record: T = serde_json::from_value(old_value.clone())
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            mutate(&mut record)?;
            let new_value =
                serde_json::to_value(&record).map_err(|e| StoreError::Codec(e.to_string()))?;

            self.kv.put(&record_key, &encoding.encode(&record)?)?;
            indexer.on_update(self.kv.as_ref(), &record_key, &old_value, &new_value)?;
        }
        Ok(())
    }

    /// Deletes every record matching the query.
    pub fn delete_matching<T: Record>(&self, query: &Query) -> Result<()> {
        self.require_writable()?;
        let schema = self.store.schema_for::<T>();
        let encoding = self.store.encoding();
        let indexer = Indexer::new(encoding, schema.as_ref());

        let rows = executor::run_query(self.store, self.kv.as_ref(), schema.as_ref(), query)?;
        for (record_key, old_value) in rows {
            self.kv.delete(&record_key)?;
            indexer.on_delete(self.kv.as_ref(), &record_key, &old_value)?;
        }
        Ok(())
    }

    /// Commits the transaction, making its writes visible.
    pub fn commit(self) -> Result<()> {
        self.kv.commit()
    }

    /// Discards the transaction's writes. Dropping the transaction has the
    /// same effect; this form just states the intent.
    pub fn rollback(self) {}

    /// The raw engine transaction, for embedders that need to mix typed
    /// and raw access.
    pub fn raw(&self) -> &dyn KvTransaction {
        self.kv.as_ref()
    }
}
