#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::form::{Identity, OwnerId};

/// Flash message categories, in the order they are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Info,
    Success,
    Warning,
    Error,
}

impl FlashCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[Self::Info, Self::Success, Self::Warning, Self::Error]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashMessage {
    #[serde(rename = "type")]
    pub category: FlashCategory,
    pub text: String,
}

/// Everything the signed session cookie carries.
///
/// `dirty` is never serialized; it records whether the cookie has to be re-issued on the
/// current response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    admin: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    flashes: BTreeMap<FlashCategory, Vec<String>>,
    #[serde(skip)]
    dirty: bool,
}

impl SessionState {
    pub fn identity(&self) -> Option<Identity> {
        if let Some(uid) = self.uid.as_deref() {
            return OwnerId::new(uid).ok().map(Identity::Owner);
        }
        if self.admin {
            return Some(Identity::Admin);
        }
        None
    }

    pub fn log_in(&mut self, identity: Identity) {
        match identity {
            Identity::Owner(owner) => {
                self.uid = Some(owner.as_str().to_string());
                self.admin = false;
            }
            Identity::Admin => {
                self.uid = None;
                self.admin = true;
            }
        }
        self.dirty = true;
    }

    pub fn add_flash(&mut self, category: FlashCategory, text: impl Into<String>) {
        self.flashes.entry(category).or_default().push(text.into());
        self.dirty = true;
    }

    /// Removes and returns every pending flash. The session is only marked dirty when
    /// something was actually drained.
    pub fn drain_flashes(&mut self) -> Vec<FlashMessage> {
        if self.flashes.is_empty() {
            return Vec::new();
        }
        let flashes = std::mem::take(&mut self.flashes);
        self.dirty = true;
        flashes
            .into_iter()
            .flat_map(|(category, texts)| {
                texts
                    .into_iter()
                    .map(move |text| FlashMessage { category, text })
            })
            .collect()
    }

    pub fn pending_flash_count(&self) -> usize {
        self.flashes.values().map(Vec::len).sum()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
