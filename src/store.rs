//! Store lifecycle and the autonomous operations API.
//!
//! A [`Store`] wraps a key-value engine with the type catalog, the
//! per-type sequence allocators, and a background garbage-collection
//! ticker. Every operation here opens its own transaction and commits it;
//! use [`Store::begin_txn`] to batch several operations atomically.
//!
//! ```rust,ignore
//! use rockhold::{Options, Store, where_field};
//!
//! let store = Store::open(Options::new("/var/lib/myapp/data"))?;
//! store.insert(42u64, &mut person)?;
//! let admins: Vec<Person> = store.find(&where_field("role").eq("admin"))?;
//! store.close()?;
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::aggregate::AggregateResult;
use crate::codec::Encoding;
use crate::engine::{KvEngine, KvSequence, RocksEngine};
use crate::error::Result;
use crate::query::Query;
use crate::schema::{Catalog, Record, Schema};
use crate::txn::Txn;

/// Configuration for opening a store.
pub struct Options {
    /// Data directory for the RocksDB engine.
    pub dir: PathBuf,
    /// Wire encoding for records, keys, and index values.
    pub encoding: Encoding,
    /// How many sequence values each lease reserves. Larger bands mean
    /// fewer engine writes per allocation but more values skipped on an
    /// unclean shutdown.
    pub sequence_bandwidth: u64,
    /// Cadence of the background garbage-collection ticker. Zero disables
    /// the ticker.
    pub gc_interval: Duration,
    /// Reclaim threshold handed to the engine's GC entry point.
    pub gc_reclaim_ratio: f64,
    /// Engine options, passed through to RocksDB untouched.
    pub rocksdb: rocksdb::Options,
}

impl Options {
    /// Default options for a data directory: MessagePack encoding,
    /// sequence bandwidth 100, GC every 10 minutes.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut rocksdb = rocksdb::Options::default();
        rocksdb.create_if_missing(true);
        Self {
            dir: dir.into(),
            encoding: Encoding::default(),
            sequence_bandwidth: 100,
            gc_interval: Duration::from_secs(600),
            gc_reclaim_ratio: 0.5,
            rocksdb,
        }
    }
}

struct GcTicker {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// An embedded typed document store.
pub struct Store {
    engine: Arc<dyn KvEngine>,
    encoding: Encoding,
    catalog: Catalog,
    sequences: Mutex<HashMap<String, Arc<dyn KvSequence>>>,
    sequence_bandwidth: u64,
    gc: Option<GcTicker>,
}

impl Store {
    /// Opens (or creates) a store backed by RocksDB at `options.dir`.
    pub fn open(options: Options) -> Result<Store> {
        let engine = RocksEngine::open(&options.dir, options.rocksdb.clone())?;
        log::debug!("opened store at {}", options.dir.display());
        Self::open_with_engine(Arc::new(engine), options)
    }

    /// Opens a store over an already-constructed engine. `options.dir` and
    /// `options.rocksdb` are ignored; everything else applies.
    pub fn open_with_engine(engine: Arc<dyn KvEngine>, options: Options) -> Result<Store> {
        let gc = (options.gc_interval > Duration::ZERO)
            .then(|| spawn_gc_ticker(&engine, options.gc_interval, options.gc_reclaim_ratio));

        Ok(Store {
            engine,
            encoding: options.encoding,
            catalog: Catalog::default(),
            sequences: Mutex::new(HashMap::new()),
            sequence_bandwidth: options.sequence_bandwidth,
            gc,
        })
    }

    /// Returns the underlying engine handle.
    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// Begins a transaction carrying the full operations API.
    pub fn begin_txn(&self, writable: bool) -> Result<Txn<'_>> {
        Ok(Txn::new(self, self.engine.begin(writable)?, writable))
    }

    /// Stops the GC ticker, releases sequence allocators, and closes the
    /// engine. Dropping the store does the same on a best-effort basis.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(gc) = self.gc.take() {
            let _ = gc.stop.send(());
            let _ = gc.thread.join();
        }

        let mut result = Ok(());
        for (name, sequence) in self.sequences.lock().drain() {
            if let Err(e) = sequence.release() {
                log::warn!("failed to release sequence for {name}: {e}");
                result = Err(e);
            }
        }
        result
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub(crate) fn schema_for<T: Record>(&self) -> Arc<Schema> {
        self.catalog.schema_for::<T>()
    }

    /// Returns the sequence allocator for a type, creating it on first
    /// use. Handles live until the store closes.
    pub(crate) fn sequence_for(&self, type_name: &str) -> Result<Arc<dyn KvSequence>> {
        let mut sequences = self.sequences.lock();
        if let Some(sequence) = sequences.get(type_name) {
            return Ok(Arc::clone(sequence));
        }
        let sequence = self.engine.sequence(type_name, self.sequence_bandwidth)?;
        sequences.insert(type_name.to_string(), Arc::clone(&sequence));
        Ok(sequence)
    }

    // ------------------------------------------------------------------
    // Autonomous operations: one transaction per call.
    // ------------------------------------------------------------------

    /// Inserts a record under `key`. See [`Txn::insert`].
    pub fn insert<K: Serialize, T: Record>(&self, key: K, record: &mut T) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.insert(key, record)?;
        txn.commit()
    }

    /// Inserts a record under the next sequence value for its type and
    /// returns the allocated key. See [`Txn::insert_sequence`].
    pub fn insert_sequence<T: Record>(&self, record: &mut T) -> Result<u64> {
        let txn = self.begin_txn(true)?;
        let key = txn.insert_sequence(record)?;
        txn.commit()?;
        Ok(key)
    }

    /// Replaces the record at `key`. See [`Txn::update`].
    pub fn update<K: Serialize, T: Record>(&self, key: K, record: &T) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.update(key, record)?;
        txn.commit()
    }

    /// Inserts or updates the record at `key`. See [`Txn::upsert`].
    pub fn upsert<K: Serialize, T: Record>(&self, key: K, record: &mut T) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.upsert(key, record)?;
        txn.commit()
    }

    /// Reads the record at `key`. See [`Txn::get`].
    pub fn get<K: Serialize, T: Record>(&self, key: K) -> Result<T> {
        self.begin_txn(false)?.get(key)
    }

    /// Deletes the record of type `T` at `key`. See [`Txn::delete`].
    pub fn delete<K: Serialize, T: Record>(&self, key: K) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.delete::<K, T>(key)?;
        txn.commit()
    }

    /// Returns every record matching the query. See [`Txn::find`].
    pub fn find<T: Record>(&self, query: &Query) -> Result<Vec<T>> {
        self.begin_txn(false)?.find(query)
    }

    /// Returns the first record matching the query. See [`Txn::find_one`].
    pub fn find_one<T: Record>(&self, query: &Query) -> Result<T> {
        self.begin_txn(false)?.find_one(query)
    }

    /// Counts the records matching the query. See [`Txn::count`].
    pub fn count<T: Record>(&self, query: &Query) -> Result<usize> {
        self.begin_txn(false)?.count(query)
    }

    /// Groups the records matching the query. See [`Txn::find_aggregate`].
    pub fn find_aggregate<T: Record>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<AggregateResult>> {
        self.begin_txn(false)?.find_aggregate(query, group_by)
    }

    /// Mutates every record matching the query in one transaction. See
    /// [`Txn::update_matching`].
    pub fn update_matching<T: Record>(
        &self,
        query: &Query,
        mutate: impl FnMut(&mut T) -> Result<()>,
    ) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.update_matching(query, mutate)?;
        txn.commit()
    }

    /// Deletes every record matching the query in one transaction. See
    /// [`Txn::delete_matching`].
    pub fn delete_matching<T: Record>(&self, query: &Query) -> Result<()> {
        let txn = self.begin_txn(true)?;
        txn.delete_matching::<T>(query)?;
        txn.commit()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("error while closing store: {e}");
        }
    }
}

/// Spawns the background GC thread: every tick it drives the engine's GC
/// entry point until a round reports no further progress.
fn spawn_gc_ticker(
    engine: &Arc<dyn KvEngine>,
    interval: Duration,
    reclaim_ratio: f64,
) -> GcTicker {
    let (stop, ticks) = mpsc::channel::<()>();
    let engine = Arc::clone(engine);
    let thread = std::thread::spawn(move || loop {
        match ticks.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => loop {
                match engine.run_gc(reclaim_ratio) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        log::warn!("storage gc round failed: {e}");
                        break;
                    }
                }
            },
            // Stop signal or the store went away.
            _ => return,
        }
    });
    GcTicker { stop, thread }
}
