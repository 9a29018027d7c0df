#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend command {command} failed: {detail}")]
    Command {
        command: &'static str,
        detail: String,
    },
}

/// A single mutation against the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum KvWrite {
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    SortedSetAdd {
        key: String,
        score: i64,
        member: String,
    },
}

impl KvWrite {
    pub fn command(&self) -> &'static str {
        match self {
            Self::HashSet { .. } => "HSET",
            Self::SetAdd { .. } => "SADD",
            Self::SetRemove { .. } => "SREM",
            Self::SortedSetAdd { .. } => "ZADD",
        }
    }
}

/// Mutations applied as one unit: either all of them land or none do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<KvWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_set(&mut self, key: String, fields: Vec<(String, String)>) -> &mut Self {
        // HSET with no field/value pairs is a protocol error.
        if !fields.is_empty() {
            self.writes.push(KvWrite::HashSet { key, fields });
        }
        self
    }

    pub fn set_add(&mut self, key: String, member: impl Into<String>) -> &mut Self {
        self.writes.push(KvWrite::SetAdd {
            key,
            member: member.into(),
        });
        self
    }

    pub fn set_remove(&mut self, key: String, member: impl Into<String>) -> &mut Self {
        self.writes.push(KvWrite::SetRemove {
            key,
            member: member.into(),
        });
        self
    }

    pub fn sorted_set_add(
        &mut self,
        key: String,
        score: i64,
        member: impl Into<String>,
    ) -> &mut Self {
        self.writes.push(KvWrite::SortedSetAdd {
            key,
            score,
            member: member.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<KvWrite> {
        self.writes
    }
}

/// One checked-out backend connection. Never shared between two in-flight requests.
pub trait KvConnection {
    fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>, BackendError>;
    fn exists(&mut self, key: &str) -> Result<bool, BackendError>;
    fn set_members(&mut self, key: &str) -> Result<BTreeSet<String>, BackendError>;
    fn set_contains(&mut self, key: &str, member: &str) -> Result<bool, BackendError>;
    /// Members with their scores, highest score first.
    fn sorted_set_rev_with_scores(&mut self, key: &str) -> Result<Vec<(String, i64)>, BackendError>;
    fn apply(&mut self, batch: WriteBatch) -> Result<(), BackendError>;
    fn ping(&mut self) -> Result<(), BackendError>;
}

/// Pool of backend connections.
pub trait KvBackend: Send + Sync {
    fn checkout(&self) -> Result<Box<dyn KvConnection + '_>, BackendError>;
}
