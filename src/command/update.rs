use log::*;
use std::rc::Rc;

use crate::{
    config::Config,
    error::{FleetbumpError, Result},
    forge::manager::ForgeManager,
    migration::{
        catalog::MigrationCatalog, gateway::MigrationGateway,
        process::SystemProcessRunner,
    },
    orchestrator::{UpdateOrchestrator, config::OrchestratorConfig},
    report::RunReport,
    strategy::{RepositoryInfo, RepositoryStrategy, create_strategy},
    tracking::{TrackedMergeRequest, TrackingState},
};

/// Processes every selected repository in order, then writes the report
/// and the tracking file. Per repository failures do not stop the run.
pub fn execute(config: &Config, forge: Rc<ForgeManager>) -> Result<RunReport> {
    let orchestrator_config = Rc::new(
        OrchestratorConfig::builder()
            .packages(config.packages.clone())
            .allow_downgrade(config.allow_downgrade)
            .migrations(config.migrations.clone())
            .build()?,
    );

    let catalog = Rc::new(load_catalog(config)?);

    let gateway = Rc::new(MigrationGateway::new(
        config.tool.clone(),
        Rc::new(SystemProcessRunner),
    ));

    let strategy: Rc<dyn RepositoryStrategy> = Rc::from(create_strategy(
        config.strategy,
        Rc::clone(&forge),
        gateway,
        config.work_dir.clone(),
    ));

    let orchestrator = UpdateOrchestrator::builder()
        .config(orchestrator_config)
        .strategy(strategy)
        .catalog(catalog)
        .build()?;

    let repositories = resolve_repositories(config, &forge)?;
    info!("processing {} repositories", repositories.len());

    let configured: Vec<(String, String)> = config
        .packages
        .iter()
        .map(|p| (p.name.clone(), p.target_version.clone()))
        .collect();

    let mut report =
        RunReport::new(config.strategy, config.dry_run, config.packages.clone());
    let mut tracking = TrackingState::load(&config.tracking_file)?;
    let mut tracked = 0;

    for (index, repo) in repositories.iter().enumerate() {
        info!(
            "[{}/{}] {}",
            index + 1,
            repositories.len(),
            repo.path_with_namespace
        );

        let outcome = orchestrator.process_repository(repo);

        for entry in TrackedMergeRequest::from_outcome(repo, &outcome, &configured)
        {
            tracking.upsert(entry);
            tracked += 1;
        }

        report.add(repo, &outcome);
    }

    info!(
        "done: {} created, {} existing, {} unchanged, {} failed",
        report.created, report.existing, report.unchanged, report.failed
    );

    report.write(&config.report_file)?;

    if tracked > 0 {
        tracking.save(&config.tracking_file)?;
    }

    Ok(report)
}

fn load_catalog(config: &Config) -> Result<MigrationCatalog> {
    if !config.migrations.enabled {
        return Ok(MigrationCatalog::default());
    }

    let Some(path) = &config.migrations.config_file else {
        warn!("migrations enabled without a config_file, none will apply");
        return Ok(MigrationCatalog::default());
    };

    let catalog = MigrationCatalog::load(path)?;
    let problems = catalog.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("{problem}");
        }
        return Err(FleetbumpError::invalid_config(format!(
            "{} problem(s) in {}",
            problems.len(),
            path.display()
        )));
    }

    Ok(catalog)
}

/// Explicit repositories when listed, else every project of the group.
/// Archived projects are skipped; the result is capped by
/// `max_repositories`.
pub fn resolve_repositories(
    config: &Config,
    forge: &ForgeManager,
) -> Result<Vec<RepositoryInfo>> {
    let mut repositories = if !config.repositories.is_empty() {
        let mut found = vec![];
        for id_or_path in &config.repositories {
            match forge.get_project(id_or_path) {
                Ok(project) => found.push(project),
                Err(err) => error!("skipping repository {id_or_path}: {err}"),
            }
        }
        found
    } else if let Some(group) = &config.group {
        forge.list_projects(Some(group.clone()))?
    } else {
        return Err(FleetbumpError::invalid_config(
            "no repositories or group configured",
        ));
    };

    repositories.retain(|repo| {
        if repo.archived {
            info!("skipping archived repository {}", repo.path_with_namespace);
        }
        !repo.archived
    });

    if let Some(max) = config.max_repositories
        && repositories.len() > max
    {
        info!("limiting run to the first {max} of {} repositories", repositories.len());
        repositories.truncate(max);
    }

    Ok(repositories)
}
