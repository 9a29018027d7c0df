#![forbid(unsafe_code)]

pub mod allow_list;
pub mod identity_provider;
