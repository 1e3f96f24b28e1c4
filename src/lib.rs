//! Transactional package updates across many GitLab repositories.
//!
//! Each repository gets one merge request carrying the package version
//! bumps and, optionally, source migrations produced by an external tool.
//! Every change is registered on a per repository transaction and rolled
//! back if a later step fails.
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod forge;
pub mod migration;
pub mod orchestrator;
pub mod repo;
pub mod report;
pub mod strategy;
pub mod tracking;
pub mod transaction;
pub mod updater;
pub mod version;

pub use error::{FleetbumpError, Result};

#[cfg(test)]
pub mod test_helpers;
