use log::*;
use std::collections::BTreeMap;

use crate::{
    config::Config,
    error::{FleetbumpError, Result},
    forge::manager::ForgeManager,
    tracking::TrackingState,
};

/// Refreshes every tracked merge request, rewrites the tracking file and
/// returns the number of entries per state.
pub fn execute(
    config: &Config,
    forge: &ForgeManager,
) -> Result<BTreeMap<String, usize>> {
    if !config.tracking_file.exists() {
        return Err(FleetbumpError::invalid_config(format!(
            "tracking file not found: {}",
            config.tracking_file.display()
        )));
    }

    let mut tracking = TrackingState::load(&config.tracking_file)?;
    info!(
        "checking {} tracked merge requests",
        tracking.merge_requests.len()
    );

    let changed = tracking.refresh(forge);
    info!("{changed} merge request(s) changed state");

    if config.dry_run {
        warn!("dry_run: would rewrite {}", config.tracking_file.display());
    } else {
        tracking.save(&config.tracking_file)?;
    }

    let counts = tracking.counts();
    for (state, count) in &counts {
        info!("{state}: {count}");
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        test_helpers::{create_forge_manager, create_mock_forge},
        tracking::TrackedMergeRequest,
    };

    fn tracked(iid: u64, url: &str) -> TrackedMergeRequest {
        TrackedMergeRequest {
            repository_id: 42,
            repository_name: "orders-service".into(),
            package_name: "Serilog".into(),
            new_version: "3.1.1".into(),
            merge_request_url: url.into(),
            merge_request_iid: iid,
            target_branch: "main".into(),
            source_branch: "update-serilog-to-3_1_1".into(),
            existed: false,
            status: "opened".into(),
            last_checked: None,
        }
    }

    #[test]
    fn refreshes_and_rewrites_tracking_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracking.json");

        let mut state = TrackingState::default();
        state.upsert(tracked(2, "https://b"));
        state.upsert(tracked(1, "https://a"));
        state.save(&path).unwrap();

        let mut mock = create_mock_forge(false);
        mock.expect_get_merge_request_state()
            .returning(|_, iid| Ok(Some(if iid == 1 { "merged" } else { "opened" }.into())));
        let forge = create_forge_manager(mock);

        let config = Config {
            tracking_file: path.clone(),
            ..Default::default()
        };

        let counts = execute(&config, &forge).unwrap();
        assert_eq!(counts.get("merged"), Some(&1));
        assert_eq!(counts.get("opened"), Some(&1));

        let saved = TrackingState::load(&path).unwrap();
        assert_eq!(saved.merge_requests[0].status, "merged");
        assert!(saved.merge_requests[0].last_checked.is_some());
    }

    #[test]
    fn missing_tracking_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let forge = create_forge_manager(create_mock_forge(false));
        let config = Config {
            tracking_file: dir.path().join("missing.json"),
            ..Default::default()
        };

        assert!(matches!(
            execute(&config, &forge),
            Err(FleetbumpError::InvalidConfig(_))
        ));
    }
}
