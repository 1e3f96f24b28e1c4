//! Tests for the orchestrator module.
//!
//! Test organization:
//! - `common`: Shared fixtures and mock strategy setup
//! - `workflow`: Existing, no-op, created and rolled back runs
//! - `migrations`: Migration selection, strict and lenient failures

mod common;
mod migrations;
