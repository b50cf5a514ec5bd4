//! Ports - interfaces the domain needs from infrastructure

mod backend;

pub use backend::{BackendResult, SyncBackend};
