#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::common::{ContractViolation, UnixTimeSecs};
use crate::form::validate_token;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("entry_id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One visitor submission. Field names and values are whatever the visitor posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub submitted: UnixTimeSecs,
    pub fields: BTreeMap<String, String>,
}

/// An entry as handed to the renderer.
///
/// `submitted_display` is empty when the deployment keeps an unordered entry index and the
/// submission time is not recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryView {
    pub id: EntryId,
    pub submitted: u64,
    pub submitted_display: String,
    pub fields: BTreeMap<String, String>,
}
