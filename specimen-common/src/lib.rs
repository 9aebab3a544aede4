//! # Specimen Common Library
//!
//! Shared code for the specimen tracker including:
//! - Database bootstrap, migrations and record types
//! - Error taxonomy
//! - Configuration loading
//! - External identifier obfuscation
//! - Timestamp and URI name utilities

pub mod config;
pub mod db;
pub mod error;
pub mod obfuscate;
pub mod slug;
pub mod time;

pub use error::{Error, Result};
pub use obfuscate::{Obfuscator, ResourceKind};
