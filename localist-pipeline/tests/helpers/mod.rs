//! Test Helper Utilities
//!
//! Shared setup for localist-pipeline integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fixtures;

pub use db_utils::{create_test_db, insert_bronze, register_source, test_context};
pub use fixtures::{raw_venue, write_json, NewRecordBuilder};
