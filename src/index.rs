//! Secondary index maintenance.
//!
//! Every write to a record runs through the indexer inside the same
//! transaction, so the record and its index entries always commit
//! together:
//!
//! - insert: add one entry per index, checking unique constraints first
//! - update: move entries whose field value changed, leave the rest alone
//! - delete: remove every entry belonging to the record
//!
//! Non-unique entries map an encoded field value to a sorted list of
//! record keys, so iterating an index prefix visits records grouped by
//! value and, within a value, in record-key order. Unique entries map the
//! value directly to the single record key that holds it.

use serde_json::Value;

use crate::codec::Encoding;
use crate::engine::KvTransaction;
use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{IndexSpec, Schema};
use crate::value;

pub(crate) struct Indexer<'a> {
    encoding: Encoding,
    schema: &'a Schema,
}

impl<'a> Indexer<'a> {
    pub fn new(encoding: Encoding, schema: &'a Schema) -> Self {
        Self { encoding, schema }
    }

    /// Adds index entries for a freshly inserted record.
    pub fn on_insert(
        &self,
        kv: &dyn KvTransaction,
        record_key: &[u8],
        record: &Value,
    ) -> Result<()> {
        for spec in self.schema.indexes() {
            let encoded = self.encoded_field(record, spec)?;
            if spec.unique {
                self.unique_claim(kv, spec, &encoded, record_key)?;
            } else {
                self.list_add(kv, spec, &encoded, record_key)?;
            }
        }
        Ok(())
    }

    /// Moves index entries whose field value changed between two versions
    /// of a record.
    pub fn on_update(
        &self,
        kv: &dyn KvTransaction,
        record_key: &[u8],
        old: &Value,
        new: &Value,
    ) -> Result<()> {
        for spec in self.schema.indexes() {
            let old_encoded = self.encoded_field(old, spec)?;
            let new_encoded = self.encoded_field(new, spec)?;
            if old_encoded == new_encoded {
                continue;
            }

            if spec.unique {
                self.unique_claim(kv, spec, &new_encoded, record_key)?;
                kv.delete(&keys::unique_entry(
                    self.schema.type_name(),
                    &spec.name,
                    &old_encoded,
                ))?;
            } else {
                self.list_remove(kv, spec, &old_encoded, record_key)?;
                self.list_add(kv, spec, &new_encoded, record_key)?;
            }
        }
        Ok(())
    }

    /// Removes every index entry belonging to a record.
    pub fn on_delete(
        &self,
        kv: &dyn KvTransaction,
        record_key: &[u8],
        record: &Value,
    ) -> Result<()> {
        for spec in self.schema.indexes() {
            let encoded = self.encoded_field(record, spec)?;
            if spec.unique {
                kv.delete(&keys::unique_entry(
                    self.schema.type_name(),
                    &spec.name,
                    &encoded,
                ))?;
            } else {
                self.list_remove(kv, spec, &encoded, record_key)?;
            }
        }
        Ok(())
    }

    fn encoded_field(&self, record: &Value, spec: &IndexSpec) -> Result<Vec<u8>> {
        let field = value::field_at(record, &spec.field).unwrap_or(&Value::Null);
        self.encoding.encode(field)
    }

    /// Claims a unique slot for a record, failing when another record
    /// already holds the value.
    fn unique_claim(
        &self,
        kv: &dyn KvTransaction,
        spec: &IndexSpec,
        encoded: &[u8],
        record_key: &[u8],
    ) -> Result<()> {
        let entry = keys::unique_entry(self.schema.type_name(), &spec.name, encoded);
        if let Some(existing) = kv.get(&entry)? {
            if existing != record_key {
                return Err(StoreError::UniqueExists(spec.name.clone()));
            }
        }
        kv.put(&entry, record_key)
    }

    fn list_add(
        &self,
        kv: &dyn KvTransaction,
        spec: &IndexSpec,
        encoded: &[u8],
        record_key: &[u8],
    ) -> Result<()> {
        let entry = keys::index_entry(self.schema.type_name(), &spec.name, encoded);
        let mut list = self.read_list(kv, &entry)?;
        if let Err(pos) = list.binary_search_by(|k| k.as_slice().cmp(record_key)) {
            list.insert(pos, record_key.to_vec());
            kv.put(&entry, &self.encoding.encode(&list)?)?;
        }
        Ok(())
    }

    fn list_remove(
        &self,
        kv: &dyn KvTransaction,
        spec: &IndexSpec,
        encoded: &[u8],
        record_key: &[u8],
    ) -> Result<()> {
        let entry = keys::index_entry(self.schema.type_name(), &spec.name, encoded);
        let mut list = self.read_list(kv, &entry)?;
        if let Ok(pos) = list.binary_search_by(|k| k.as_slice().cmp(record_key)) {
            list.remove(pos);
            if list.is_empty() {
                kv.delete(&entry)?;
            } else {
                kv.put(&entry, &self.encoding.encode(&list)?)?;
            }
        }
        Ok(())
    }

    fn read_list(&self, kv: &dyn KvTransaction, entry: &[u8]) -> Result<Vec<Vec<u8>>> {
        match kv.get(entry)? {
            Some(bytes) => self.encoding.decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Decodes the record keys stored under one index entry value.
    pub fn decode_list(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.encoding.decode(bytes)
    }
}
