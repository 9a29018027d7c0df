#![forbid(unsafe_code)]

use formic_kernel_contracts::entry::EntryId;
use formic_kernel_contracts::form::{FormId, OwnerId};

pub const MULTI_TENANT_PREFIX: &str = "formic";
pub const SINGLE_TENANT_PREFIX: &str = "formic-admin";

/// Flat key layout over the backend. Every relation lives under its own key:
///
/// ```text
/// <prefix>:form:<id>                 hash   ID / Name / RedirectURL
/// <prefix>:form:<id>:fields          set    field names ever submitted
/// <prefix>:form:<id>:entries         zset or set of entry ids
/// <prefix>:form:<id>:entry:<eid>     hash   submitted field values
/// <prefix>:<uid>:forms               set    owner's active form ids
/// <prefix>:<uid>:deletedForms        set    owner's soft-deleted form ids
/// <prefix>:forms / :deletedForms     set    single-tenant equivalents
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    pub fn form(&self, id: &FormId) -> String {
        self.key(&["form", id.as_str()])
    }

    pub fn form_fields(&self, id: &FormId) -> String {
        self.key(&["form", id.as_str(), "fields"])
    }

    pub fn form_entries(&self, id: &FormId) -> String {
        self.key(&["form", id.as_str(), "entries"])
    }

    pub fn entry(&self, form: &FormId, entry: &EntryId) -> String {
        self.key(&["form", form.as_str(), "entry", entry.as_str()])
    }

    pub fn owner_forms(&self, owner: &OwnerId) -> String {
        self.key(&[owner.as_str(), "forms"])
    }

    pub fn owner_deleted_forms(&self, owner: &OwnerId) -> String {
        self.key(&[owner.as_str(), "deletedForms"])
    }

    pub fn global_forms(&self) -> String {
        self.key(&["forms"])
    }

    pub fn global_deleted_forms(&self) -> String {
        self.key(&["deletedForms"])
    }
}
