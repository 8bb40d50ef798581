//! In-memory implementation of the engine traits.
//!
//! An ordered map behind a lock, with snapshot-on-begin transactions and
//! buffered writes applied on commit. Used by unit tests and by embedders
//! that want store semantics without touching disk; not built for large
//! data sets.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{prefix_successor, KvEngine, KvSequence, KvTransaction, ScanIter};
use crate::error::Result;
use crate::keys;

type Keyspace = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory engine.
#[derive(Default)]
pub struct MemoryEngine {
    state: Arc<RwLock<Keyspace>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvEngine for MemoryEngine {
    fn begin<'a>(&'a self, _writable: bool) -> Result<Box<dyn KvTransaction + 'a>> {
        Ok(Box::new(MemoryTxn {
            snapshot: self.state.read().clone(),
            writes: Mutex::new(BTreeMap::new()),
            shared: Arc::clone(&self.state),
        }))
    }

    fn sequence(&self, name: &str, bandwidth: u64) -> Result<Arc<dyn KvSequence>> {
        Ok(Arc::new(MemorySequence {
            state: Arc::clone(&self.state),
            key: keys::sequence_key(name),
            bandwidth: bandwidth.max(1),
            lease: Mutex::new(None),
        }))
    }

    fn run_gc(&self, _reclaim_ratio: f64) -> Result<bool> {
        Ok(false)
    }
}

struct MemoryTxn {
    snapshot: Keyspace,
    // None marks a delete.
    writes: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    shared: Arc<RwLock<Keyspace>>,
}

impl MemoryTxn {
    /// Snapshot with this transaction's own writes applied.
    fn effective(&self) -> Keyspace {
        let mut view = self.snapshot.clone();
        for (key, write) in self.writes.lock().iter() {
            match write {
                Some(value) => view.insert(key.clone(), value.clone()),
                None => view.remove(key),
            };
        }
        view
    }
}

impl KvTransaction for MemoryTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(write) = self.writes.lock().get(key) {
            return Ok(write.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes.lock().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.writes.lock().insert(key.to_vec(), None);
        Ok(())
    }

    fn scan<'a>(
        &'a self,
        prefix: &[u8],
        start: Option<&[u8]>,
        reverse: bool,
    ) -> Result<ScanIter<'a>> {
        let lower = start.unwrap_or(prefix).to_vec();
        let upper = match prefix_successor(prefix) {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };

        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .effective()
            .range((Bound::Included(lower), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if reverse {
            entries.reverse();
        }

        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut shared = self.shared.write();
        for (key, write) in self.writes.into_inner() {
            match write {
                Some(value) => shared.insert(key, value),
                None => shared.remove(&key),
            };
        }
        Ok(())
    }
}

struct MemorySequence {
    state: Arc<RwLock<Keyspace>>,
    key: Vec<u8>,
    bandwidth: u64,
    lease: Mutex<Option<(u64, u64)>>,
}

impl KvSequence for MemorySequence {
    fn next(&self) -> Result<u64> {
        let mut lease = self.lease.lock();
        let (next, until) = match *lease {
            Some((next, until)) if next < until => (next, until),
            _ => {
                let mut state = self.state.write();
                let start = state
                    .get(&self.key)
                    .and_then(|b| b.as_slice().try_into().ok())
                    .map(u64::from_be_bytes)
                    .unwrap_or(0);
                let until = start.saturating_add(self.bandwidth);
                state.insert(self.key.clone(), until.to_be_bytes().to_vec());
                (start, until)
            }
        };
        *lease = Some((next + 1, until));
        Ok(next)
    }

    fn release(&self) -> Result<()> {
        let mut lease = self.lease.lock();
        if let Some((next, until)) = lease.take() {
            if next < until {
                self.state
                    .write()
                    .insert(self.key.clone(), next.to_be_bytes().to_vec());
            }
        }
        Ok(())
    }
}
