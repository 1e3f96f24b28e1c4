use log::*;
use regex::{Captures, Regex};
use std::{cmp::Ordering, ops::Range};

use crate::{
    config::package::PackageUpdateSpec,
    error::Result,
    updater::{PackageChange, FileUpdate},
    version,
};

/// File extension of the project files this updater handles.
pub const CSPROJ_EXTENSION: &str = "csproj";

/// Rewrites `PackageReference` versions in MSBuild project files.
///
/// Both the attribute form
/// `<PackageReference Include="X" Version="1.0.0" />` and the child
/// element form `<PackageReference Include="X"><Version>1.0.0</Version>`
/// are supported. Only the version text is replaced, so the rest of the
/// file (attribute order, indentation, line endings) is left untouched.
pub struct CsprojUpdater {
    allow_downgrade: bool,
    reference: Regex,
    include: Regex,
    version_attr: Regex,
    version_element: Regex,
}

/// A version value found in the file.
struct VersionSite {
    range: Range<usize>,
    value: String,
}

impl CsprojUpdater {
    pub fn new(allow_downgrade: bool) -> Result<Self> {
        Ok(Self {
            allow_downgrade,
            reference: Regex::new(
                r"(?is)<PackageReference\b(?P<attrs>[^>]*?)(?:/>|>(?P<body>.*?)</PackageReference\s*>)",
            )?,
            include: Regex::new(
                r#"(?i)\bInclude\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
            )?,
            version_attr: Regex::new(
                r#"(?i)\bVersion\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
            )?,
            version_element: Regex::new(
                r"(?is)<Version\s*>\s*(?P<value>[^<]*?)\s*</Version\s*>",
            )?,
        })
    }

    fn quoted<'a>(caps: &Captures<'a>) -> Option<regex::Match<'a>> {
        caps.name("dq").or_else(|| caps.name("sq"))
    }

    /// Every version value referencing `package`, in file order.
    fn find_sites(&self, content: &str, package: &str) -> Vec<VersionSite> {
        let mut sites = vec![];

        for reference in self.reference.captures_iter(content) {
            let Some(attrs) = reference.name("attrs") else {
                continue;
            };

            let included = self
                .include
                .captures(attrs.as_str())
                .and_then(|caps| Self::quoted(&caps).map(|m| m.as_str().trim().to_string()));

            match included {
                Some(name) if name.eq_ignore_ascii_case(package) => {}
                _ => continue,
            }

            if let Some(caps) = self.version_attr.captures(attrs.as_str())
                && let Some(value) = Self::quoted(&caps)
            {
                let offset = attrs.start();
                sites.push(VersionSite {
                    range: offset + value.start()..offset + value.end(),
                    value: value.as_str().to_string(),
                });
                continue;
            }

            if let Some(body) = reference.name("body")
                && let Some(caps) = self.version_element.captures(body.as_str())
                && let Some(value) = caps.name("value")
            {
                let offset = body.start();
                sites.push(VersionSite {
                    range: offset + value.start()..offset + value.end(),
                    value: value.as_str().to_string(),
                });
            }
        }

        sites
    }

    /// Whether moving `current` to `target` is allowed.
    fn should_update(&self, package: &str, current: &str, target: &str) -> bool {
        if current == target {
            return false;
        }

        match version::compare(current, target) {
            Some(Ordering::Equal) => false,
            Some(Ordering::Greater) if !self.allow_downgrade => {
                info!(
                    "skipping downgrade of {package} from {current} to {target}"
                );
                false
            }
            Some(_) => true,
            None => {
                warn!(
                    "could not compare versions {current} and {target} for {package}: updating anyway"
                );
                true
            }
        }
    }

    /// Applies one package to `content`. Returns the new content and the
    /// change made, if any.
    pub fn update_package(
        &self,
        content: &str,
        package: &PackageUpdateSpec,
    ) -> (String, Option<PackageChange>) {
        let sites = self.find_sites(content, &package.name);

        if sites.is_empty() {
            return (content.to_string(), None);
        }

        let previous_version = sites[0].value.clone();
        let mut updated = content.to_string();
        let mut changed = false;

        // replace back to front so earlier ranges stay valid
        for site in sites.iter().rev() {
            if self.should_update(&package.name, &site.value, &package.target_version) {
                updated.replace_range(site.range.clone(), &package.target_version);
                changed = true;
            }
        }

        if !changed {
            return (content.to_string(), None);
        }

        (
            updated,
            Some(PackageChange {
                name: package.name.clone(),
                previous_version,
                new_version: package.target_version.clone(),
            }),
        )
    }

    /// Applies every package to `content` in one pass.
    pub fn update(
        &self,
        content: &str,
        packages: &[PackageUpdateSpec],
    ) -> FileUpdate {
        let mut current = content.to_string();
        let mut changes = vec![];

        for package in packages {
            let (next, change) = self.update_package(&current, package);
            if let Some(change) = change {
                debug!(
                    "{}: {} -> {}",
                    change.name, change.previous_version, change.new_version
                );
                changes.push(change);
                current = next;
            }
        }

        FileUpdate {
            modified: !changes.is_empty(),
            content: current,
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, version: &str) -> PackageUpdateSpec {
        PackageUpdateSpec::new(name, version)
    }

    const PROJECT: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="12.0.1" />
    <PackageReference Include="Serilog">
      <Version>2.10.0</Version>
    </PackageReference>
    <PackageReference Version="1.0.0" Include="Polly" PrivateAssets="all" />
  </ItemGroup>
</Project>
"#;

    #[test]
    fn updates_attribute_form() {
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(PROJECT, &[spec("Newtonsoft.Json", "13.0.3")]);

        assert!(outcome.modified);
        assert!(outcome.content.contains(
            r#"<PackageReference Include="Newtonsoft.Json" Version="13.0.3" />"#
        ));
        assert_eq!(outcome.changes[0].previous_version, "12.0.1");
    }

    #[test]
    fn updates_element_form() {
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(PROJECT, &[spec("serilog", "3.1.1")]);

        assert!(outcome.modified);
        assert!(outcome.content.contains("<Version>3.1.1</Version>"));
        assert_eq!(outcome.changes[0].name, "serilog");
    }

    #[test]
    fn keeps_attribute_order_and_other_attributes() {
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(PROJECT, &[spec("Polly", "8.2.0")]);

        assert!(outcome.content.contains(
            r#"<PackageReference Version="8.2.0" Include="Polly" PrivateAssets="all" />"#
        ));
        assert_eq!(outcome.content.len(), PROJECT.len());
    }

    #[test]
    fn same_version_is_a_no_op() {
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(PROJECT, &[spec("Newtonsoft.Json", "12.0.1")]);

        assert!(!outcome.modified);
        assert_eq!(outcome.content, PROJECT);
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn downgrade_is_skipped_unless_allowed() {
        let content = r#"<PackageReference Include="P" Version="2.0.0" />"#;

        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(content, &[spec("P", "1.0.0")]);
        assert!(!outcome.modified);
        assert_eq!(outcome.content, content);

        let updater = CsprojUpdater::new(true).unwrap();
        let outcome = updater.update(content, &[spec("P", "1.0.0")]);
        assert!(outcome.modified);
        assert_eq!(outcome.content, r#"<PackageReference Include="P" Version="1.0.0" />"#);
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let content = "<ItemGroup>\r\n  <PackageReference Include=\"P\" Version=\"1.0.0\" />\r\n</ItemGroup>\r\n";
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(content, &[spec("P", "2.0.0")]);

        assert_eq!(
            outcome.content,
            "<ItemGroup>\r\n  <PackageReference Include=\"P\" Version=\"2.0.0\" />\r\n</ItemGroup>\r\n"
        );
    }

    #[test]
    fn does_not_match_package_name_prefixes() {
        let content = r#"<PackageReference Include="Serilog.Sinks.Console" Version="4.0.0" />"#;
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(content, &[spec("Serilog", "3.1.1")]);
        assert!(!outcome.modified);
    }

    #[test]
    fn applies_several_packages_in_one_pass() {
        let updater = CsprojUpdater::new(false).unwrap();
        let outcome = updater.update(
            PROJECT,
            &[
                spec("Newtonsoft.Json", "13.0.3"),
                spec("Serilog", "3.1.1"),
                spec("Missing.Package", "1.0.0"),
            ],
        );

        assert_eq!(outcome.changes.len(), 2);
        assert!(outcome.content.contains(r#"Version="13.0.3""#));
        assert!(outcome.content.contains("<Version>3.1.1</Version>"));
    }
}
