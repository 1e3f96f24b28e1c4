//! Per-repository transaction with compensating rollback actions.
//!
//! Every mutation a strategy performs registers an action that undoes it.
//! On failure the actions run newest first; on success they are dropped
//! without running.
use log::*;
use serde::Serialize;
use std::fmt::Write;

use crate::{error::Result, strategy::StrategyKind};

/// A registered compensating operation.
pub type RollbackAction = Box<dyn FnOnce() -> Result<()>>;

/// Rollback action that returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRollbackAction {
    pub action: String,
    pub error: String,
}

/// Outcome of draining the rollback stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    /// True when every action succeeded.
    pub success: bool,
    /// Descriptions of the actions that ran successfully, in run order.
    pub completed_actions: Vec<String>,
    pub failed_actions: Vec<FailedRollbackAction>,
    pub warnings: Vec<String>,
}

impl RollbackResult {
    /// Human readable summary for logs and reports.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let status = if self.success {
            "completed"
        } else {
            "completed with failures"
        };
        let _ = writeln!(out, "Rollback {status}");
        let _ = writeln!(
            out,
            "Completed actions: {}",
            self.completed_actions.len()
        );
        for action in &self.completed_actions {
            let _ = writeln!(out, "  - {action}");
        }
        if !self.failed_actions.is_empty() {
            let _ =
                writeln!(out, "Failed actions: {}", self.failed_actions.len());
            for failed in &self.failed_actions {
                let _ = writeln!(out, "  - {}: {}", failed.action, failed.error);
            }
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {warning}");
            }
        }
        out
    }
}

/// Rollback bookkeeping for one repository attempt.
pub struct Transaction {
    repository_id: String,
    strategy: StrategyKind,
    actions: Vec<(RollbackAction, String)>,
    created_branch: Option<String>,
}

impl Transaction {
    pub fn new(repository_id: impl Into<String>, strategy: StrategyKind) -> Self {
        Self {
            repository_id: repository_id.into(),
            strategy,
            actions: vec![],
            created_branch: None,
        }
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Branch created during this attempt, if any.
    pub fn created_branch(&self) -> Option<&str> {
        self.created_branch.as_deref()
    }

    pub fn set_created_branch(&mut self, branch: impl Into<String>) {
        self.created_branch = Some(branch.into());
    }

    /// Number of registered, not yet executed actions.
    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn add_rollback_action(
        &mut self,
        action: impl FnOnce() -> Result<()> + 'static,
        description: impl Into<String>,
    ) {
        let description = description.into();
        debug!(
            "[{}] registered rollback action: {description}",
            self.repository_id
        );
        self.actions.push((Box::new(action), description));
    }

    /// Runs every registered action newest first. A failing action is
    /// recorded and the remaining ones still run. The stack is empty
    /// afterwards.
    pub fn execute_rollback(&mut self) -> RollbackResult {
        let mut result = RollbackResult {
            success: true,
            ..Default::default()
        };

        if self.actions.is_empty() {
            result.warnings.push("no rollback actions registered".into());
            return result;
        }

        warn!(
            "[{}] rolling back {} actions ({} strategy)",
            self.repository_id,
            self.actions.len(),
            self.strategy
        );

        while let Some((action, description)) = self.actions.pop() {
            match action() {
                Ok(()) => {
                    info!("[{}] rolled back: {description}", self.repository_id);
                    result.completed_actions.push(description);
                }
                Err(err) => {
                    error!(
                        "[{}] rollback action failed: {description}: {err}",
                        self.repository_id
                    );
                    result.success = false;
                    result.failed_actions.push(FailedRollbackAction {
                        action: description,
                        error: err.to_string(),
                    });
                }
            }
        }

        if let Some(branch) = &self.created_branch
            && !result.success
        {
            result.warnings.push(format!(
                "branch {branch} may need manual cleanup"
            ));
        }

        result
    }

    /// Drops every registered action without running it.
    pub fn clear_rollback_actions(&mut self) {
        debug!(
            "[{}] clearing {} rollback actions",
            self.repository_id,
            self.actions.len()
        );
        self.actions.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                "[{}] transaction dropped with {} unexecuted rollback actions",
                self.repository_id,
                self.actions.len()
            );
        }
    }
}
