//! RocksDB implementation of the engine traits.
//!
//! Uses a `TransactionDB` so every store operation runs inside a real
//! engine transaction with snapshot reads. Sequence state persists in the
//! same keyspace under the `_sequence:` prefix.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    DBAccess, DBIteratorWithThreadMode, Direction, IteratorMode, Options, ReadOptions,
    SnapshotWithThreadMode, Transaction, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};

use super::{prefix_successor, KvEngine, KvSequence, KvTransaction, ScanIter};
use crate::error::{Result, StoreError};
use crate::keys;

/// RocksDB-backed engine.
pub struct RocksEngine {
    db: Arc<TransactionDB>,
}

impl RocksEngine {
    /// Opens (or creates) a database at `path`.
    ///
    /// `opts` passes through to RocksDB untouched apart from
    /// `create_if_missing`, which the store enables by default.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let txn_opts = TransactionDBOptions::default();
        let db = TransactionDB::open(&opts, &txn_opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Returns the underlying database handle.
    pub fn db(&self) -> &Arc<TransactionDB> {
        &self.db
    }
}

impl KvEngine for RocksEngine {
    fn begin<'a>(&'a self, _writable: bool) -> Result<Box<dyn KvTransaction + 'a>> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_snapshot(true);
        let inner = self
            .db
            .transaction_opt(&WriteOptions::default(), &txn_opts);
        Ok(Box::new(RocksTxn { inner }))
    }

    fn sequence(&self, name: &str, bandwidth: u64) -> Result<Arc<dyn KvSequence>> {
        Ok(Arc::new(RocksSequence {
            db: Arc::clone(&self.db),
            key: keys::sequence_key(name),
            bandwidth: bandwidth.max(1),
            state: Mutex::new(None),
        }))
    }

    fn run_gc(&self, _reclaim_ratio: f64) -> Result<bool> {
        // RocksDB reclaims dead data through background compaction on its
        // own schedule; there is never explicit work left for a caller.
        Ok(false)
    }
}

struct RocksTxn<'db> {
    inner: Transaction<'db, TransactionDB>,
}

impl KvTransaction for RocksTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // Bind the transaction's snapshot so every read in the transaction
        // observes the same version, merged with the transaction's own
        // uncommitted writes.
        let snapshot = self.inner.snapshot();
        let mut readopts = ReadOptions::default();
        readopts.set_snapshot(&snapshot);
        Ok(self.inner.get_opt(key, &readopts)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.inner.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Ok(self.inner.delete(key)?)
    }

    fn scan<'a>(
        &'a self,
        prefix: &[u8],
        start: Option<&[u8]>,
        reverse: bool,
    ) -> Result<ScanIter<'a>> {
        let snapshot = self.inner.snapshot();
        let mut readopts = ReadOptions::default();
        readopts.set_snapshot(&snapshot);

        let inner = if reverse {
            match prefix_successor(prefix) {
                Some(upper) => self
                    .inner
                    .iterator_opt(IteratorMode::From(&upper, Direction::Reverse), readopts),
                None => self.inner.iterator_opt(IteratorMode::End, readopts),
            }
        } else {
            let from = start.unwrap_or(prefix);
            self.inner
                .iterator_opt(IteratorMode::From(from, Direction::Forward), readopts)
        };

        Ok(Box::new(PrefixScan {
            _snapshot: snapshot,
            inner,
            prefix: prefix.to_vec(),
            reverse,
            entered: false,
            done: false,
        }))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        Ok(self.inner.commit()?)
    }
}

/// Bounds a raw engine iterator to one key prefix.
///
/// Forward scans start inside the prefix range and stop at the first key
/// past it. Reverse scans start at the range's upper bound, so keys before
/// the first in-prefix key are skipped, and the scan ends once keys stop
/// carrying the prefix. Holds the snapshot the iterator reads from so it
/// stays valid for the scan's lifetime.
struct PrefixScan<'a, D: DBAccess> {
    _snapshot: SnapshotWithThreadMode<'a, D>,
    inner: DBIteratorWithThreadMode<'a, D>,
    prefix: Vec<u8>,
    reverse: bool,
    entered: bool,
    done: bool,
}

impl<D: DBAccess> Iterator for PrefixScan<'_, D> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.inner.next() {
                None => self.done = true,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(StoreError::Engine(e.to_string())));
                }
                Some(Ok((key, value))) => {
                    if key.starts_with(&self.prefix) {
                        self.entered = true;
                        return Some(Ok((key.into_vec(), value.into_vec())));
                    }
                    if !self.reverse || self.entered {
                        self.done = true;
                    }
                    // Reverse scans may open on keys above the prefix
                    // range (the upper bound itself); keep descending.
                }
            }
        }
        None
    }
}

#[derive(Clone, Copy)]
struct Lease {
    next: u64,
    until: u64,
}

/// Durable sequence allocator over the shared keyspace.
///
/// Leases `bandwidth` values at a time by advancing the persisted
/// watermark, then hands them out from memory under a mutex.
struct RocksSequence {
    db: Arc<TransactionDB>,
    key: Vec<u8>,
    bandwidth: u64,
    state: Mutex<Option<Lease>>,
}

impl RocksSequence {
    fn lease(&self) -> Result<Lease> {
        let start = match self.db.get(&self.key)? {
            Some(bytes) => decode_watermark(&bytes)?,
            None => 0,
        };
        let until = start.saturating_add(self.bandwidth);
        self.db.put(&self.key, until.to_be_bytes())?;
        Ok(Lease { next: start, until })
    }
}

impl KvSequence for RocksSequence {
    fn next(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let mut lease = match state.take() {
            Some(lease) if lease.next < lease.until => lease,
            _ => self.lease()?,
        };
        let value = lease.next;
        lease.next += 1;
        *state = Some(lease);
        Ok(value)
    }

    fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(lease) = state.take() {
            if lease.next < lease.until {
                self.db.put(&self.key, lease.next.to_be_bytes())?;
            }
        }
        Ok(())
    }
}

fn decode_watermark(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Engine("corrupt sequence watermark".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_engine() -> (RocksEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        (RocksEngine::open(dir.path(), opts).unwrap(), dir)
    }

    #[test]
    fn test_put_get_delete_in_transaction() {
        let (engine, _dir) = open_test_engine();

        let txn = engine.begin(true).unwrap();
        txn.put(b"k1", b"v1").unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        txn.commit().unwrap();

        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        txn.delete(b"k1").unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), None);
        txn.commit().unwrap();
    }

    #[test]
    fn test_uncommitted_writes_are_discarded() {
        let (engine, _dir) = open_test_engine();

        {
            let txn = engine.begin(true).unwrap();
            txn.put(b"k1", b"v1").unwrap();
            // Dropped without commit.
        }

        let txn = engine.begin(false).unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), None);
    }

    #[test]
    fn test_scan_respects_prefix_and_direction() {
        let (engine, _dir) = open_test_engine();

        let txn = engine.begin(true).unwrap();
        for key in [&b"a:1"[..], b"a:2", b"a:3", b"b:1"] {
            txn.put(key, b"v").unwrap();
        }
        txn.commit().unwrap();

        let txn = engine.begin(false).unwrap();
        let forward: Vec<_> = txn
            .scan(b"a:", None, false)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(forward, vec![b"a:1".to_vec(), b"a:2".to_vec(), b"a:3".to_vec()]);

        let backward: Vec<_> = txn
            .scan(b"a:", None, true)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(backward, vec![b"a:3".to_vec(), b"a:2".to_vec(), b"a:1".to_vec()]);
    }

    #[test]
    fn test_scan_resumes_from_start_key() {
        let (engine, _dir) = open_test_engine();

        let txn = engine.begin(true).unwrap();
        for key in [&b"p:1"[..], b"p:2", b"p:3"] {
            txn.put(key, b"v").unwrap();
        }
        txn.commit().unwrap();

        let txn = engine.begin(false).unwrap();
        let resumed: Vec<_> = txn
            .scan(b"p:", Some(b"p:2"), false)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(resumed, vec![b"p:2".to_vec(), b"p:3".to_vec()]);
    }

    #[test]
    fn test_sequence_leases_and_releases() {
        let (engine, _dir) = open_test_engine();

        let seq = engine.sequence("Item", 5).unwrap();
        for expected in 0..7 {
            assert_eq!(seq.next().unwrap(), expected);
        }
        seq.release().unwrap();

        // A fresh handle resumes at the released watermark, not the end of
        // the leased band.
        let seq = engine.sequence("Item", 5).unwrap();
        assert_eq!(seq.next().unwrap(), 7);
    }

    #[test]
    fn test_gc_reports_no_pending_work() {
        let (engine, _dir) = open_test_engine();
        assert!(!engine.run_gc(0.5).unwrap());
    }
}
