//! # rockhold
//!
//! An embedded, typed document layer on top of a transactional ordered
//! key-value engine (RocksDB). Records are plain serde structs; rockhold
//! adds record keys, secondary and unique indexes, and a composable query
//! language with sorting, skip/limit, sub-queries, and aggregation, all
//! maintained transactionally alongside the data.
//!
//! ## Architecture
//!
//! ```text
//! Store / Txn           ← operations API (insert/update/find/...)
//!     ↓
//! Planner + Executor    ← index selection, criterion evaluation
//!     ↓
//! Indexer + KeyCodec    ← "bh_" records, "_index:"/"_unique:" entries
//!     ↓
//! KvEngine              ← RocksDB TransactionDB (or in-memory for tests)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use rockhold::{where_field, Options, Record, Schema, Store};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Item {
//!     id: u64,
//!     category: String,
//! }
//!
//! impl Record for Item {
//!     fn schema() -> Schema {
//!         Schema::new("Item").key("id").index("category")
//!     }
//! }
//!
//! let store = Store::open(Options::new("./data"))?;
//! let mut item = Item { id: 0, category: "vehicle".into() };
//! let key = store.insert_sequence(&mut item)?; // key lands in item.id
//!
//! let vehicles: Vec<Item> =
//!     store.find(&where_field("category").eq("vehicle").index("category"))?;
//! ```

pub mod aggregate;
pub mod codec;
pub mod engine;
pub mod error;
pub mod keys;
pub mod query;
pub mod schema;
pub mod store;
pub mod txn;

mod compare;
mod executor;
mod index;
mod value;

pub use aggregate::AggregateResult;
pub use codec::Encoding;
pub use error::{Result, StoreError};
pub use executor::RecordAccess;
pub use query::{where_field, FieldClause, Query, KEY};
pub use schema::{IndexSpec, Record, Schema};
pub use store::{Options, Store};
pub use txn::Txn;
