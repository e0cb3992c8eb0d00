//! # Localist Common Library
//!
//! Shared code for the Localist venue pipeline:
//! - Database initialization, schema and row models
//! - Pipeline event types and the EventBus
//! - Bootstrap configuration loading
//! - Opaque payload bag for audit-only JSON columns
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod payload;
pub mod time;

pub use error::{Error, Result};
pub use payload::Payload;
