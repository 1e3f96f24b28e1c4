//! Markdown report of a run.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fs, path::Path};

use crate::{
    config::package::PackageUpdateSpec,
    error::Result,
    orchestrator::{SuccessKind, UpdateOutcome},
    strategy::{RepositoryInfo, StrategyKind},
};

pub const REPORT_TEMPLATE: &str = r#"# Package Update Report

Generated: {{ generated_at }}
Strategy: {{ strategy }}{% if dry_run %} (dry run){% endif %}

## Packages

{% for package in packages -%}
- **{{ package.name }}** → {{ package.target_version }}
{% endfor %}
## Summary

- **Repositories**: {{ rows | length }}
- **Created**: {{ created }}
- **Existing**: {{ existing }}
- **No changes**: {{ unchanged }}
- **Failed**: {{ failed }}

## Repositories

| Repository | Outcome | Merge Request |
|---|---|---|
{% for row in rows -%}
| {{ row.repository }} | {{ row.outcome }} | {% if row.merge_request_url %}[!{{ row.merge_request_iid }}]({{ row.merge_request_url }}){% endif %} |
{% endfor %}
{%- for row in rows %}{% if row.details %}
### {{ row.repository }}

{% if row.packages %}Updated: {{ row.packages | join(sep=", ") }}

{% endif -%}
{% if row.migration %}Migrations: {{ row.migration }}

{% endif -%}
{% if row.error %}Error: {{ row.error }}

{% endif -%}
{% if row.rollback %}```
{{ row.rollback }}```

{% endif -%}
{% endif %}{% endfor -%}
"#;

/// One repository line of the report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportRow {
    pub repository: String,
    pub outcome: String,
    pub merge_request_iid: Option<u64>,
    pub merge_request_url: Option<String>,
    /// `Name old → new` for every updated package.
    pub packages: Vec<String>,
    pub migration: Option<String>,
    pub error: Option<String>,
    pub rollback: Option<String>,
    /// Whether the row gets its own section.
    pub details: bool,
}

impl ReportRow {
    pub fn new(repo: &RepositoryInfo, outcome: &UpdateOutcome) -> Self {
        let mut row = Self {
            repository: repo.path_with_namespace.clone(),
            outcome: outcome.label().into(),
            ..Default::default()
        };

        if let Some(mr) = outcome.merge_request() {
            row.merge_request_iid = Some(mr.iid);
            row.merge_request_url = Some(mr.web_url.clone());
        }

        match outcome {
            UpdateOutcome::Success(SuccessKind::Created(change)) => {
                row.packages = change
                    .updated_packages
                    .iter()
                    .map(|p| {
                        format!("{} {} → {}", p.name, p.previous_version, p.new_version)
                    })
                    .collect();
                row.migration = change.migration.as_ref().map(|m| {
                    if m.success {
                        m.summary.clone()
                    } else {
                        format!("{} ({})", m.summary, m.errors.join("; "))
                    }
                });
            }
            UpdateOutcome::FailedNoRollbackNeeded { error } => {
                row.error = Some(error.clone());
            }
            UpdateOutcome::FailedRolledBack { error, rollback } => {
                row.error = Some(error.clone());
                row.rollback = Some(rollback.report());
            }
            _ => {}
        }

        row.details = !row.packages.is_empty() || row.error.is_some();
        row
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub dry_run: bool,
    pub packages: Vec<PackageUpdateSpec>,
    pub rows: Vec<ReportRow>,
    pub created: usize,
    pub existing: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn new(
        strategy: StrategyKind,
        dry_run: bool,
        packages: Vec<PackageUpdateSpec>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            strategy,
            dry_run,
            packages,
            rows: vec![],
            created: 0,
            existing: 0,
            unchanged: 0,
            failed: 0,
        }
    }

    pub fn add(&mut self, repo: &RepositoryInfo, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Success(SuccessKind::Created(_)) => self.created += 1,
            UpdateOutcome::Success(SuccessKind::Existing(_)) => self.existing += 1,
            UpdateOutcome::Success(SuccessKind::NoChanges) => self.unchanged += 1,
            _ => self.failed += 1,
        }
        self.rows.push(ReportRow::new(repo, outcome));
    }

    pub fn render(&self) -> Result<String> {
        let mut tera = tera::Tera::default();
        tera.add_raw_template("report", REPORT_TEMPLATE)?;
        let context = tera::Context::from_serialize(self)?;
        Ok(tera.render("report", &context)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render()?)?;
        log::info!("report written to {}", path.display());
        Ok(())
    }
}
