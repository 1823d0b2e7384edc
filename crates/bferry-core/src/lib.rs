//! bferry core - transfer orchestration
//!
//! This crate fans bulk uploads and downloads out across a bounded worker
//! pool, and downloads large objects as parallel byte ranges reassembled
//! with positional writes. The wire protocol lives behind [`ObjectStore`].

pub mod engine;
mod error;
mod manager;
pub mod options;
pub mod paths;
pub mod store;

pub use engine::TransferBatch;
pub use error::*;
pub use manager::*;
pub use store::{FsStore, HttpStore, ObjectStore};

pub use bferry_types as types;
