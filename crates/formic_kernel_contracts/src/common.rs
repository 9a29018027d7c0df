#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeSecs(pub u64);

/// Which deployment shape the store and gate run in.
///
/// `MultiTenant` keeps one active/deleted form set per owner identity and indexes entries by
/// submission time. `SingleTenant` keeps one global form set, an unordered entry index and a
/// boolean admin marker in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentVariant {
    MultiTenant,
    SingleTenant,
}

impl DeploymentVariant {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MultiTenant => "multi",
            Self::SingleTenant => "single",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "multi" | "multi_tenant" | "multi-tenant" => Some(Self::MultiTenant),
            "single" | "single_tenant" | "single-tenant" => Some(Self::SingleTenant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// A required user-supplied value was empty. `message` is safe to show to the user.
    #[error("{message}")]
    MissingValue {
        field: &'static str,
        message: &'static str,
    },
    /// A user-supplied value was present but unusable. `message` is safe to show to the user.
    #[error("{message}")]
    RejectedValue {
        field: &'static str,
        message: &'static str,
    },
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

impl ContractViolation {
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingValue { field, .. }
            | Self::RejectedValue { field, .. }
            | Self::InvalidValue { field, .. } => field,
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}
