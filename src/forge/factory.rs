//! Factory for creating forge implementations based on configuration.
use std::rc::Rc;

use crate::{
    error::Result,
    forge::{
        config::RemoteConfig,
        gitlab::Gitlab,
        manager::ForgeManager,
        transport::{
            AutoConfirm, Clock, ConfirmLongWait, SystemClock, TerminalConfirm,
        },
    },
};

/// Factory for creating forge implementations.
pub struct ForgeFactory;

impl ForgeFactory {
    /// Create a ForgeManager backed by the GitLab API client.
    ///
    /// Interactive runs ask on the terminal before long rate limit waits,
    /// non-interactive runs decline them.
    pub fn create(config: &RemoteConfig, interactive: bool) -> Result<ForgeManager> {
        let clock: Rc<dyn Clock> = Rc::new(SystemClock);
        let confirm: Rc<dyn ConfirmLongWait> = if interactive {
            Rc::new(TerminalConfirm)
        } else {
            Rc::new(AutoConfirm(false))
        };
        let gitlab = Gitlab::new(config.clone(), clock, confirm)?;
        Ok(ForgeManager::new(Box::new(gitlab)))
    }
}
