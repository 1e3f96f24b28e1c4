//! Command execution for fleetbump.
//!
//! - **update**: apply package updates (and migrations) to every selected
//!   repository, write the run report and record opened merge requests
//! - **status**: refresh the state of every recorded merge request
use std::{io::IsTerminal, rc::Rc};

use crate::{
    cli::Args,
    config::Config,
    error::Result,
    forge::{factory::ForgeFactory, manager::ForgeManager},
};

/// Merge request state refresh for the tracking file.
pub mod status;

/// Multi repository update run.
pub mod update;

/// Connects to the configured remote. Long rate limit waits are only
/// confirmed interactively when stdin is a terminal.
pub fn create_forge(args: &Args, config: &Config) -> Result<Rc<ForgeManager>> {
    let token = config.token(args.token())?;
    let remote = config.remote_config(token)?;
    let interactive = std::io::stdin().is_terminal();
    Ok(Rc::new(ForgeFactory::create(&remote, interactive)?))
}
