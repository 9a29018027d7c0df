#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::backend::{BackendError, KvBackend, KvConnection, KvWrite, WriteBatch};

#[derive(Debug, Default)]
struct MemoryKeyspace {
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    sets: BTreeMap<String, BTreeSet<String>>,
    sorted_sets: BTreeMap<String, BTreeMap<String, i64>>,
    applied_writes: u64,
}

impl MemoryKeyspace {
    fn apply(&mut self, write: KvWrite) {
        match write {
            KvWrite::HashSet { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            KvWrite::SetAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            KvWrite::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            KvWrite::SortedSetAdd { key, score, member } => {
                self.sorted_sets.entry(key).or_default().insert(member, score);
            }
        }
        self.applied_writes += 1;
    }
}

/// In-process backend with the same hash/set/sorted-set semantics as Redis.
///
/// Used for development (`redis_host = "memory"`) and by the test suites.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryKeyspace>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of individual write commands applied so far.
    pub fn applied_writes(&self) -> u64 {
        self.lock().map(|k| k.applied_writes).unwrap_or(0)
    }

    /// Makes every subsequent checkout fail, as a dropped backend connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes a hash outright. Only used to simulate records vanishing under a listing.
    pub fn remove_hash(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.lock()?.hashes.remove(key).is_some())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryKeyspace>, BackendError> {
        self.inner
            .lock()
            .map_err(|_| BackendError::Unavailable("memory backend lock poisoned".to_string()))
    }
}

impl KvBackend for MemoryBackend {
    fn checkout(&self) -> Result<Box<dyn KvConnection + '_>, BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "memory backend marked unavailable".to_string(),
            ));
        }
        Ok(Box::new(MemoryConnection { backend: self }))
    }
}

struct MemoryConnection<'a> {
    backend: &'a MemoryBackend,
}

impl KvConnection for MemoryConnection<'_> {
    fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>, BackendError> {
        Ok(self.backend.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    fn exists(&mut self, key: &str) -> Result<bool, BackendError> {
        let keyspace = self.backend.lock()?;
        Ok(keyspace.hashes.contains_key(key)
            || keyspace.sets.contains_key(key)
            || keyspace.sorted_sets.contains_key(key))
    }

    fn set_members(&mut self, key: &str) -> Result<BTreeSet<String>, BackendError> {
        Ok(self.backend.lock()?.sets.get(key).cloned().unwrap_or_default())
    }

    fn set_contains(&mut self, key: &str, member: &str) -> Result<bool, BackendError> {
        Ok(self
            .backend
            .lock()?
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    fn sorted_set_rev_with_scores(
        &mut self,
        key: &str,
    ) -> Result<Vec<(String, i64)>, BackendError> {
        let keyspace = self.backend.lock()?;
        let Some(zset) = keyspace.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(String, i64)> = zset
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(members)
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), BackendError> {
        let mut keyspace = self.backend.lock()?;
        for write in batch.into_writes() {
            keyspace.apply(write);
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<(), BackendError> {
        self.backend.lock().map(|_| ())
    }
}
