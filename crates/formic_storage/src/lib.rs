#![forbid(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod ids;
pub mod keyspace;
pub mod memory;
pub mod redis_backend;
pub mod repo;
pub mod store;

pub use backend::{BackendError, KvBackend, KvConnection, KvWrite, WriteBatch};
pub use store::{FormStore, StorageError, StoreLayout};
