#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use formic_kernel_contracts::entry::{Entry, EntryId, EntryView};
use formic_kernel_contracts::form::{Form, FormDraft, FormId, Identity};
use formic_kernel_contracts::{ContractViolation, DeploymentVariant, Validate};

use crate::backend::{BackendError, KvBackend, KvConnection, WriteBatch};
use crate::clock::{Clock, SystemClock};
use crate::ids::{new_id, MULTI_TENANT_ID_BYTES, SINGLE_TENANT_ID_BYTES};
use crate::keyspace::{Keyspace, MULTI_TENANT_PREFIX, SINGLE_TENANT_PREFIX};

const MAX_ID_ATTEMPTS: u32 = 8;
const SUBMITTED_DISPLAY_FORMAT: &str = "%b %e %H:%M:%S";

const FIELD_ID: &str = "ID";
const FIELD_NAME: &str = "Name";
const FIELD_REDIRECT_URL: &str = "RedirectURL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// User input failed validation. Nothing was written.
    #[error(transparent)]
    Validation(#[from] ContractViolation),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("identifier space exhausted after {attempts} attempts")]
    IdExhausted { attempts: u32 },
}

impl StorageError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// How records are laid out for one deployment variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub variant: DeploymentVariant,
    pub keyspace: Keyspace,
    pub id_bytes: usize,
    /// Entries indexed in a sorted set scored by submission time (most recent first on read),
    /// instead of a plain set.
    pub ordered_entries: bool,
}

impl StoreLayout {
    pub fn for_variant(variant: DeploymentVariant) -> Self {
        match variant {
            DeploymentVariant::MultiTenant => Self {
                variant,
                keyspace: Keyspace::new(MULTI_TENANT_PREFIX),
                id_bytes: MULTI_TENANT_ID_BYTES,
                ordered_entries: true,
            },
            DeploymentVariant::SingleTenant => Self {
                variant,
                keyspace: Keyspace::new(SINGLE_TENANT_PREFIX),
                id_bytes: SINGLE_TENANT_ID_BYTES,
                ordered_entries: false,
            },
        }
    }
}

/// Forms, field registries, entries and ownership sets on top of a key-value backend.
///
/// Authorization is not checked here; callers decide who may touch which form and use
/// [`FormStore::owns_form`] to do so.
pub struct FormStore<B> {
    backend: B,
    layout: StoreLayout,
    clock: Arc<dyn Clock>,
}

impl<B: KvBackend> FormStore<B> {
    pub fn new(backend: B, layout: StoreLayout) -> Self {
        Self::with_clock(backend, layout, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, layout: StoreLayout, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            layout,
            clock,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn create_form(
        &self,
        identity: &Identity,
        draft: &FormDraft,
    ) -> Result<Form, StorageError> {
        draft.validate()?;
        let mut conn = self.backend.checkout()?;
        let keyspace = &self.layout.keyspace;
        let id = self.allocate_id(conn.as_mut(), |raw| {
            FormId::new(raw).map(|id| (keyspace.form(&id), id))
        })?;

        let mut batch = WriteBatch::new();
        batch
            .hash_set(
                keyspace.form(&id),
                vec![
                    (FIELD_ID.to_string(), id.as_str().to_string()),
                    (FIELD_NAME.to_string(), draft.name.clone()),
                    (FIELD_REDIRECT_URL.to_string(), draft.redirect_url.clone()),
                ],
            )
            .set_add(self.active_set(identity), id.as_str());
        conn.apply(batch)?;

        tracing::info!(form_id = %id, "form created");
        Ok(Form {
            id,
            name: draft.name.clone(),
            redirect_url: draft.redirect_url.clone(),
        })
    }

    pub fn get_form(&self, id: &FormId) -> Result<Option<Form>, StorageError> {
        let mut conn = self.backend.checkout()?;
        self.read_form(conn.as_mut(), id)
    }

    /// Forms in the caller's active set, ordered by name. Ids whose hash has gone missing
    /// are skipped.
    pub fn list_forms(&self, identity: &Identity) -> Result<Vec<Form>, StorageError> {
        let mut conn = self.backend.checkout()?;
        let members = conn.set_members(&self.active_set(identity))?;
        let mut forms = Vec::with_capacity(members.len());
        for member in members {
            let Ok(id) = FormId::new(member) else {
                continue;
            };
            if let Some(form) = self.read_form(conn.as_mut(), &id)? {
                forms.push(form);
            }
        }
        forms.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(forms)
    }

    /// Overwrites name and redirect URL. Returns `false`, writing nothing, when the form
    /// does not exist.
    pub fn update_form(&self, id: &FormId, draft: &FormDraft) -> Result<bool, StorageError> {
        draft.validate()?;
        let mut conn = self.backend.checkout()?;
        if self.read_form(conn.as_mut(), id)?.is_none() {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.hash_set(
            self.layout.keyspace.form(id),
            vec![
                (FIELD_NAME.to_string(), draft.name.clone()),
                (FIELD_REDIRECT_URL.to_string(), draft.redirect_url.clone()),
            ],
        );
        conn.apply(batch)?;
        tracing::info!(form_id = %id, "form updated");
        Ok(true)
    }

    /// Soft delete: moves the id from the active set to the deleted set. The form hash,
    /// its field registry and its entries stay where they are.
    pub fn delete_form(&self, identity: &Identity, id: &FormId) -> Result<(), StorageError> {
        let mut conn = self.backend.checkout()?;
        let mut batch = WriteBatch::new();
        batch
            .set_add(self.deleted_set(identity), id.as_str())
            .set_remove(self.active_set(identity), id.as_str());
        conn.apply(batch)?;
        tracing::info!(form_id = %id, "form moved to deleted set");
        Ok(())
    }

    pub fn owns_form(&self, identity: &Identity, id: &FormId) -> Result<bool, StorageError> {
        let mut conn = self.backend.checkout()?;
        Ok(conn.set_contains(&self.active_set(identity), id.as_str())?)
    }

    pub fn list_fields(&self, id: &FormId) -> Result<BTreeSet<String>, StorageError> {
        let mut conn = self.backend.checkout()?;
        Ok(conn.set_members(&self.layout.keyspace.form_fields(id))?)
    }

    pub fn register_field(&self, id: &FormId, name: &str) -> Result<(), StorageError> {
        let mut conn = self.backend.checkout()?;
        let mut batch = WriteBatch::new();
        batch.set_add(self.layout.keyspace.form_fields(id), name);
        conn.apply(batch)?;
        Ok(())
    }

    /// Stores one submission as-is. Every submitted name joins the form's field registry.
    /// Existence of the form is the caller's concern.
    pub fn submit_entry(
        &self,
        form_id: &FormId,
        fields: BTreeMap<String, String>,
    ) -> Result<Entry, StorageError> {
        let mut conn = self.backend.checkout()?;
        let keyspace = &self.layout.keyspace;
        let entry_id = self.allocate_id(conn.as_mut(), |raw| {
            EntryId::new(raw).map(|id| (keyspace.entry(form_id, &id), id))
        })?;
        let submitted = self.clock.now();

        let mut batch = WriteBatch::new();
        batch.hash_set(
            keyspace.entry(form_id, &entry_id),
            fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        );
        for name in fields.keys() {
            batch.set_add(keyspace.form_fields(form_id), name.as_str());
        }
        let index_key = keyspace.form_entries(form_id);
        if self.layout.ordered_entries {
            let score = i64::try_from(submitted.0).unwrap_or(i64::MAX);
            batch.sorted_set_add(index_key, score, entry_id.as_str());
        } else {
            batch.set_add(index_key, entry_id.as_str());
        }
        conn.apply(batch)?;

        tracing::info!(
            form_id = %form_id,
            entry_id = entry_id.as_str(),
            field_count = fields.len(),
            "entry stored"
        );
        Ok(Entry {
            id: entry_id,
            submitted,
            fields,
        })
    }

    /// Entries of a form, most recent first when the layout keeps a time-ordered index.
    pub fn list_entries(&self, form_id: &FormId) -> Result<Vec<EntryView>, StorageError> {
        let mut conn = self.backend.checkout()?;
        let keyspace = &self.layout.keyspace;
        let index_key = keyspace.form_entries(form_id);
        let indexed: Vec<(String, Option<i64>)> = if self.layout.ordered_entries {
            conn.sorted_set_rev_with_scores(&index_key)?
                .into_iter()
                .map(|(member, score)| (member, Some(score)))
                .collect()
        } else {
            conn.set_members(&index_key)?
                .into_iter()
                .map(|member| (member, None))
                .collect()
        };

        let mut entries = Vec::with_capacity(indexed.len());
        for (member, score) in indexed {
            let Ok(entry_id) = EntryId::new(member) else {
                continue;
            };
            let fields = conn.hash_get_all(&keyspace.entry(form_id, &entry_id))?;
            let submitted = score.map(|s| u64::try_from(s).unwrap_or(0)).unwrap_or(0);
            entries.push(EntryView {
                id: entry_id,
                submitted,
                submitted_display: score.map(format_submitted).unwrap_or_default(),
                fields,
            });
        }
        Ok(entries)
    }

    pub fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.backend.checkout()?;
        Ok(conn.ping()?)
    }

    fn read_form(
        &self,
        conn: &mut dyn KvConnection,
        id: &FormId,
    ) -> Result<Option<Form>, StorageError> {
        let mut hash = conn.hash_get_all(&self.layout.keyspace.form(id))?;
        let stored_id = hash.remove(FIELD_ID).unwrap_or_default();
        if stored_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(Form {
            id: id.clone(),
            name: hash.remove(FIELD_NAME).unwrap_or_default(),
            redirect_url: hash.remove(FIELD_REDIRECT_URL).unwrap_or_default(),
        }))
    }

    fn allocate_id<T, F>(
        &self,
        conn: &mut dyn KvConnection,
        mut keyed: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut(String) -> Result<(String, T), ContractViolation>,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let (key, id) = keyed(new_id(self.layout.id_bytes))?;
            if !conn.exists(&key)? {
                return Ok(id);
            }
            tracing::warn!(key = key.as_str(), "generated identifier collided, redrawing");
        }
        Err(StorageError::IdExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    fn active_set(&self, identity: &Identity) -> String {
        match identity {
            Identity::Owner(owner) => self.layout.keyspace.owner_forms(owner),
            Identity::Admin => self.layout.keyspace.global_forms(),
        }
    }

    fn deleted_set(&self, identity: &Identity) -> String {
        match identity {
            Identity::Owner(owner) => self.layout.keyspace.owner_deleted_forms(owner),
            Identity::Admin => self.layout.keyspace.global_deleted_forms(),
        }
    }
}

/// Renders a submission time as `Jan  2 15:04:05` (UTC).
pub fn format_submitted(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.format(SUBMITTED_DISPLAY_FORMAT).to_string())
        .unwrap_or_default()
}
