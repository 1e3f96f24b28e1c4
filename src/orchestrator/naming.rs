//! Branch names, titles, commit messages and the merge request
//! description.
use serde::Serialize;

use crate::{
    config::package::PackageUpdateSpec,
    error::Result,
    migration::result::MigrationResult,
    updater::PackageChange,
};

pub const DESCRIPTION_TEMPLATE: &str = r#"{% if packages | length == 1 -%}
This merge request updates **{{ packages[0].name }}** from {{ packages[0].previous_version }} to version **{{ packages[0].new_version }}**.
{%- else -%}
This merge request updates **{{ packages | length }} NuGet packages**:

{% for package in packages -%}
- **{{ package.name }}** {{ package.previous_version }} → {{ package.new_version }}
{% endfor -%}
{%- endif %}

### Modified Files:
{% for file in modified_files -%}
- `{{ file }}`
{% endfor %}
{%- if migration %}
### Code Migrations:
{{ migration.summary }}
{% if migration.applied_rules %}
Applied rules: {{ migration.applied_rules | join(sep=", ") }}
{% endif -%}
{% for file in migration.modified_files -%}
- `{{ file }}`
{% endfor -%}
{% if not migration.success %}
> Migrations did not complete; only the package update is included.
{% for error in migration.errors -%}
> - {{ error }}
{% endfor -%}
{% endif -%}
{% endif %}
**Target Branch:** `{{ target_branch }}`

Please review the changes and merge when ready.
"#;

/// Branch holding the changes for a run over `packages`.
pub fn branch_name(packages: &[PackageUpdateSpec]) -> String {
    match packages {
        [package] => format!(
            "update-{}-to-{}",
            package.name.to_lowercase().replace('.', "-"),
            package.target_version.replace('.', "_")
        ),
        _ => format!("update-multiple-packages-{}-packages", packages.len()),
    }
}

/// Title of the merge request, also used to find an existing one.
pub fn merge_request_title(packages: &[PackageUpdateSpec]) -> String {
    match packages {
        [package] => format!(
            "Update {} to version {}",
            package.name, package.target_version
        ),
        _ => format!(
            "Update packages: {}",
            packages
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub fn file_commit_message(changes: &[PackageChange], path: &str) -> String {
    match changes {
        [change] => format!(
            "Update {} to version {} in {path}",
            change.name, change.new_version
        ),
        _ => format!(
            "Update {} packages in {path}: {}",
            changes.len(),
            changes
                .iter()
                .map(|c| format!("{} to {}", c.name, c.new_version))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Message of the single package update commit of the local strategy.
pub fn package_commit_message(changes: &[PackageChange]) -> String {
    match changes {
        [change] => format!(
            "Update {} to version {}",
            change.name, change.new_version
        ),
        _ => format!(
            "Update packages: {}",
            changes
                .iter()
                .map(|c| format!("{} to {}", c.name, c.new_version))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub fn migration_commit_message(result: &MigrationResult) -> String {
    let mut message = String::from("Apply code migrations");
    if !result.applied_rules.is_empty() {
        message.push_str(&format!(": {}", result.applied_rules.join(", ")));
    }
    message
}

#[derive(Serialize)]
struct DescriptionContext<'a> {
    packages: &'a [PackageChange],
    modified_files: &'a [String],
    migration: Option<&'a MigrationResult>,
    target_branch: &'a str,
}

/// Markdown description listing what actually changed.
pub fn merge_request_description(
    packages: &[PackageChange],
    modified_files: &[String],
    migration: Option<&MigrationResult>,
    target_branch: &str,
) -> Result<String> {
    let mut tera = tera::Tera::default();
    tera.add_raw_template("description", DESCRIPTION_TEMPLATE)?;

    let context = tera::Context::from_serialize(DescriptionContext {
        packages,
        modified_files,
        migration,
        target_branch,
    })?;

    Ok(tera.render("description", &context)?)
}
