//! Record schemas and the type catalog.
//!
//! A [`Record`] describes itself once through a [`Schema`]: its stable type
//! name, the field that receives the record key on insert, and the fields
//! mirrored into secondary indexes. The store caches one `Arc<Schema>` per
//! Rust type for its whole lifetime, so `schema()` runs exactly once per
//! type regardless of how many operations touch it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rockhold::{Record, Schema};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Person {
//!     id: u64,
//!     email: String,
//!     category: String,
//! }
//!
//! impl Record for Person {
//!     fn schema() -> Schema {
//!         Schema::new("Person")
//!             .key("id")
//!             .unique("email")
//!             .index("category")
//!     }
//! }
//! ```

use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A user-supplied ordering for one field, consulted by the comparer before
/// its built-in rules give up. Returns `None` when the pair is not
/// comparable by this function.
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> Option<Ordering> + Send + Sync>;

/// A stored record type.
///
/// Implementors must serialize to a map of named fields (the default for
/// derived structs); the query layer addresses fields by those names,
/// including dotted paths into nested structs.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Declares the type name, key field, and indexes for this type.
    fn schema() -> Schema;
}

/// One secondary index declaration.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Index name, used in `Query::index()` and in the on-disk entry keys.
    pub name: String,
    /// Field the index mirrors. Top-level fields only.
    pub field: String,
    /// Whether two live records may share a value of this field.
    pub unique: bool,
}

/// Schema descriptor for a record type.
pub struct Schema {
    type_name: String,
    key_field: Option<String>,
    indexes: Vec<IndexSpec>,
    comparators: HashMap<String, CompareFn>,
}

impl Schema {
    /// Starts a schema for the given type name.
    ///
    /// The name becomes part of every persisted key for this type, so it
    /// must stay stable across releases.
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        assert!(!type_name.is_empty(), "schema type name must not be empty");
        Self {
            type_name,
            key_field: None,
            indexes: Vec::new(),
            comparators: HashMap::new(),
        }
    }

    /// Declares the field that receives the record key on insert.
    ///
    /// At most one key field may be declared.
    pub fn key(mut self, field: impl Into<String>) -> Self {
        assert!(
            self.key_field.is_none(),
            "schema for {} declares more than one key field",
            self.type_name
        );
        self.key_field = Some(field.into());
        self
    }

    /// Declares a non-unique index named after the field it mirrors.
    pub fn index(self, field: impl Into<String>) -> Self {
        let field = field.into();
        let name = field.clone();
        self.index_named(name, field)
    }

    /// Declares a non-unique index with an explicit name.
    pub fn index_named(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_index(IndexSpec {
            name: name.into(),
            field: field.into(),
            unique: false,
        });
        self
    }

    /// Declares a unique index named after the field it mirrors.
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.push_index(IndexSpec {
            name: field.clone(),
            field,
            unique: true,
        });
        self
    }

    /// Registers a custom ordering for a field, used when the built-in
    /// comparison rules cannot order its values (e.g. structured fields).
    pub fn comparator(
        mut self,
        field: impl Into<String>,
        cmp: impl Fn(&Value, &Value) -> Option<Ordering> + Send + Sync + 'static,
    ) -> Self {
        self.comparators.insert(field.into(), Arc::new(cmp));
        self
    }

    fn push_index(&mut self, spec: IndexSpec) {
        assert!(
            !spec.field.contains('.'),
            "index {} on {}: indexes must name a top-level field",
            spec.name,
            self.type_name
        );
        assert!(
            self.indexes.iter().all(|i| i.name != spec.name),
            "schema for {} declares index {} twice",
            self.type_name,
            spec.name
        );
        self.indexes.push(spec);
    }

    /// Returns the stable type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the key field, if one was declared.
    pub fn key_field(&self) -> Option<&str> {
        self.key_field.as_deref()
    }

    /// Returns all index declarations.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Looks up an index by name.
    pub fn index_by_name(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns the custom comparator registered for a field, if any.
    pub fn comparator_for(&self, field: &str) -> Option<&CompareFn> {
        self.comparators.get(field)
    }
}

/// Per-store schema cache, keyed by Rust type identity.
///
/// Entries are created lazily on first use and never change afterwards, so
/// readers take no locks once a type is published.
#[derive(Default)]
pub(crate) struct Catalog {
    schemas: DashMap<TypeId, Arc<Schema>>,
}

impl Catalog {
    pub fn schema_for<T: Record>(&self) -> Arc<Schema> {
        self.schemas
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(T::schema()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Sample {
        id: u64,
        email: String,
        category: String,
    }

    impl Record for Sample {
        fn schema() -> Schema {
            Schema::new("Sample")
                .key("id")
                .unique("email")
                .index("category")
        }
    }

    #[test]
    fn test_schema_accessors() {
        let schema = Sample::schema();
        assert_eq!(schema.type_name(), "Sample");
        assert_eq!(schema.key_field(), Some("id"));
        assert_eq!(schema.indexes().len(), 2);

        let email = schema.index_by_name("email").unwrap();
        assert!(email.unique);
        let category = schema.index_by_name("category").unwrap();
        assert!(!category.unique);
        assert!(schema.index_by_name("missing").is_none());
    }

    #[test]
    fn test_index_named_honours_explicit_name() {
        let schema = Schema::new("T").index_named("by_status", "status");
        let spec = schema.index_by_name("by_status").unwrap();
        assert_eq!(spec.field, "status");
    }

    #[test]
    #[should_panic(expected = "more than one key field")]
    fn test_double_key_panics() {
        let _ = Schema::new("T").key("a").key("b");
    }

    #[test]
    #[should_panic(expected = "top-level field")]
    fn test_nested_index_field_panics() {
        let _ = Schema::new("T").index("account.owner");
    }

    #[test]
    fn test_catalog_caches_by_type() {
        let catalog = Catalog::default();
        let a = catalog.schema_for::<Sample>();
        let b = catalog.schema_for::<Sample>();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
