//! Trace persistence for the MITM capture addon.

pub mod db;
pub mod entities;
pub mod store;

pub use store::{NewTrace, StorageError, StorageResult, TraceCompletion, TraceStorage, TraceStore};
