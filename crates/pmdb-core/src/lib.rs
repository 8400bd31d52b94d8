//! Shared types and error taxonomy for the storage and collaboration engine.
//!
//! This crate has no database dependency of its own beyond the `rusqlite`
//! conversion on [`Error`]; `pmdb-engine` is where the schema, transactions,
//! and the importer/checkout/commit algorithms live.

pub mod cancel;
pub mod error;
pub mod types;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use types::*;
