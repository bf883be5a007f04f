//! # KSDB Common Library
//!
//! Shared code for the karaoke song database:
//! - Error and result types
//! - Layered configuration loading
//! - Database pool, schema migrations, models and queries
//! - UltraStar TXT parsing and writing
//! - Pagination arithmetic

pub mod config;
pub mod db;
pub mod error;
pub mod pagination;
pub mod ultrastar;

pub use error::{Error, Result};
