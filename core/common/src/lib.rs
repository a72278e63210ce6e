//! Common utilities and types shared across the vault sync crates.
//!
//! This module provides the error type and the vault-relative path type used
//! by the manifest builder, the delta engine and the sync client.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::VaultPath;
