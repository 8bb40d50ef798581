//! On-disk key layout.
//!
//! Every key the store writes carries a textual prefix so that multiple
//! record types, their indexes, and bookkeeping state can share one flat
//! keyspace:
//!
//! ```text
//! bh_{type}{encoded key}                      → encoded record
//! _index:{type}:{index}:{encoded value}       → encoded list of record keys
//! _unique:{type}:{index}:{encoded value}      → record key
//! _sequence:{type}                            → next unleased sequence value
//! ```
//!
//! The prefixes are part of the persisted format and must not change.

/// Prefix for record keys.
pub const RECORD_PREFIX: &str = "bh_";

/// Prefix for non-unique secondary index entries.
pub const INDEX_PREFIX: &str = "_index:";

/// Prefix for unique index entries.
pub const UNIQUE_PREFIX: &str = "_unique:";

/// Prefix for persisted sequence allocator state.
pub const SEQUENCE_PREFIX: &str = "_sequence:";

/// Returns the key prefix shared by all records of a type.
pub fn type_prefix(type_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECORD_PREFIX.len() + type_name.len());
    key.extend_from_slice(RECORD_PREFIX.as_bytes());
    key.extend_from_slice(type_name.as_bytes());
    key
}

/// Builds a record key from the type name and an already-encoded user key.
pub fn record_key(type_name: &str, encoded_key: &[u8]) -> Vec<u8> {
    let mut key = type_prefix(type_name);
    key.extend_from_slice(encoded_key);
    key
}

/// Strips the type prefix from a record key, leaving the encoded user key.
pub fn record_key_suffix<'a>(record_key: &'a [u8], type_name: &str) -> &'a [u8] {
    &record_key[RECORD_PREFIX.len() + type_name.len()..]
}

/// Returns the prefix shared by all entries of one secondary index.
pub fn index_prefix(type_name: &str, index_name: &str) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(INDEX_PREFIX.len() + type_name.len() + index_name.len() + 2);
    key.extend_from_slice(INDEX_PREFIX.as_bytes());
    key.extend_from_slice(type_name.as_bytes());
    key.push(b':');
    key.extend_from_slice(index_name.as_bytes());
    key.push(b':');
    key
}

/// Builds a non-unique index entry key for an encoded field value.
pub fn index_entry(type_name: &str, index_name: &str, encoded_value: &[u8]) -> Vec<u8> {
    let mut key = index_prefix(type_name, index_name);
    key.extend_from_slice(encoded_value);
    key
}

/// Returns the prefix shared by all entries of one unique index.
pub fn unique_prefix(type_name: &str, index_name: &str) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(UNIQUE_PREFIX.len() + type_name.len() + index_name.len() + 2);
    key.extend_from_slice(UNIQUE_PREFIX.as_bytes());
    key.extend_from_slice(type_name.as_bytes());
    key.push(b':');
    key.extend_from_slice(index_name.as_bytes());
    key.push(b':');
    key
}

/// Builds a unique index entry key for an encoded field value.
pub fn unique_entry(type_name: &str, index_name: &str, encoded_value: &[u8]) -> Vec<u8> {
    let mut key = unique_prefix(type_name, index_name);
    key.extend_from_slice(encoded_value);
    key
}

/// Returns the key under which a type's sequence state persists.
pub fn sequence_key(type_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(SEQUENCE_PREFIX.len() + type_name.len());
    key.extend_from_slice(SEQUENCE_PREFIX.as_bytes());
    key.extend_from_slice(type_name.as_bytes());
    key
}
