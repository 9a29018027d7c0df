#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use formic_kernel_contracts::entry::{Entry, EntryView};
use formic_kernel_contracts::form::{Form, FormDraft, FormId, Identity};
use formic_kernel_contracts::DeploymentVariant;

use crate::backend::KvBackend;
use crate::store::{FormStore, StorageError};

/// Typed repository interface the HTTP layer is written against.
pub trait FormRecordRepo: Send + Sync {
    fn variant(&self) -> DeploymentVariant;

    fn create_form_row(&self, identity: &Identity, draft: &FormDraft) -> Result<Form, StorageError>;
    fn get_form_row(&self, id: &FormId) -> Result<Option<Form>, StorageError>;
    fn form_rows(&self, identity: &Identity) -> Result<Vec<Form>, StorageError>;
    fn update_form_row(&self, id: &FormId, draft: &FormDraft) -> Result<bool, StorageError>;
    fn delete_form_row(&self, identity: &Identity, id: &FormId) -> Result<(), StorageError>;
    fn owns_form_row(&self, identity: &Identity, id: &FormId) -> Result<bool, StorageError>;

    fn field_names(&self, id: &FormId) -> Result<BTreeSet<String>, StorageError>;
    fn append_entry_row(
        &self,
        id: &FormId,
        fields: BTreeMap<String, String>,
    ) -> Result<Entry, StorageError>;
    fn entry_rows(&self, id: &FormId) -> Result<Vec<EntryView>, StorageError>;

    fn ping(&self) -> Result<(), StorageError>;
}

impl<B: KvBackend> FormRecordRepo for FormStore<B> {
    fn variant(&self) -> DeploymentVariant {
        self.layout().variant
    }

    fn create_form_row(
        &self,
        identity: &Identity,
        draft: &FormDraft,
    ) -> Result<Form, StorageError> {
        self.create_form(identity, draft)
    }

    fn get_form_row(&self, id: &FormId) -> Result<Option<Form>, StorageError> {
        self.get_form(id)
    }

    fn form_rows(&self, identity: &Identity) -> Result<Vec<Form>, StorageError> {
        self.list_forms(identity)
    }

    fn update_form_row(&self, id: &FormId, draft: &FormDraft) -> Result<bool, StorageError> {
        self.update_form(id, draft)
    }

    fn delete_form_row(&self, identity: &Identity, id: &FormId) -> Result<(), StorageError> {
        self.delete_form(identity, id)
    }

    fn owns_form_row(&self, identity: &Identity, id: &FormId) -> Result<bool, StorageError> {
        self.owns_form(identity, id)
    }

    fn field_names(&self, id: &FormId) -> Result<BTreeSet<String>, StorageError> {
        self.list_fields(id)
    }

    fn append_entry_row(
        &self,
        id: &FormId,
        fields: BTreeMap<String, String>,
    ) -> Result<Entry, StorageError> {
        self.submit_entry(id, fields)
    }

    fn entry_rows(&self, id: &FormId) -> Result<Vec<EntryView>, StorageError> {
        self.list_entries(id)
    }

    fn ping(&self) -> Result<(), StorageError> {
        FormStore::ping(self)
    }
}
