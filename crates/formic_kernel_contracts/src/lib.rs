#![forbid(unsafe_code)]

pub mod common;
pub mod entry;
pub mod form;
pub mod session;

pub use common::{ContractViolation, DeploymentVariant, UnixTimeSecs, Validate};
