#![forbid(unsafe_code)]

use serde::Serialize;

use crate::common::{ContractViolation, Validate};

const MAX_TOKEN_LEN: usize = 64;
const MAX_OWNER_ID_LEN: usize = 128;

/// Lowercase-hex form identifier.
///
/// Identifiers are spliced into colon-separated storage keys, so anything outside
/// `[0-9a-z]` is rejected rather than allowed to address a neighbouring key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FormId(String);

impl FormId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("form_id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity-provider profile id of a form owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "owner_id",
                reason: "must not be empty",
            });
        }
        if id.len() > MAX_OWNER_ID_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "owner_id",
                reason: "must be <= 128 chars",
            });
        }
        if id.chars().any(|c| c == ':' || c.is_whitespace() || c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "owner_id",
                reason: "must not contain ':' or whitespace",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The caller identity the gate attaches to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Multi-tenant owner, scoped to the forms in its own active set.
    Owner(OwnerId),
    /// Single-tenant administrator, scoped to the global form set.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Form {
    pub id: FormId,
    pub name: String,
    pub redirect_url: String,
}

/// User-editable part of a form, as submitted by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormDraft {
    pub name: String,
    pub redirect_url: String,
}

impl FormDraft {
    pub fn v1(name: impl Into<String>, redirect_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            redirect_url: redirect_url.into(),
        }
    }
}

impl Validate for FormDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.is_empty() {
            return Err(ContractViolation::MissingValue {
                field: "name",
                message: "Form name can't be empty",
            });
        }
        if self.redirect_url.is_empty() {
            return Err(ContractViolation::MissingValue {
                field: "redirect_url",
                message: "Redirect URL can't be empty",
            });
        }
        // The redirect URL ends up verbatim in a Location header.
        if self.redirect_url.chars().any(char::is_control) {
            return Err(ContractViolation::RejectedValue {
                field: "redirect_url",
                message: "Redirect URL can't contain control characters",
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_token(field: &'static str, id: &str) -> Result<(), ContractViolation> {
    if id.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if id.len() > MAX_TOKEN_LEN {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be <= 64 chars",
        });
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be lowercase alphanumeric",
        });
    }
    Ok(())
}
