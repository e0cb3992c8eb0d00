//! Configuration loading and root folder resolution
//!
//! Tests that touch LOCALIST_ROOT_FOLDER are marked #[serial] so they do
//! not race on the process environment.

use localist_common::config::{
    resolve_root_folder, FetcherConfig, LocalistConfig, ROOT_FOLDER_ENV,
};
use localist_common::db::models::SourceType;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const FULL_CONFIG: &str = r#"
root_folder = "/srv/localist"
database_path = "data/catalog.db"

[logging]
level = "debug"

[matching]
similarity_threshold = 0.9
proximity_meters = 75.0

[scoring]
cooldown_minutes = 30

[coordinator]
event_triggers = false
reconciler_schedule = "5m"

[[sources]]
id = "eater"
name = "Eater Heatmaps"
source_type = "expert_list"
authority_weight = 0.9
min_request_interval_ms = 1500
city = "nyc"
schedule = "daily"
fetcher = { kind = "http_json", url = "https://example.test/eater.json", max_pages = 3 }

[[sources]]
id = "dump"
source_type = "directory"
fetcher = { kind = "json_file", path = "/var/lib/localist/venues" }

[[curators]]
city = "nyc"
category = "restaurant"
target_venue_count = 10

[[algorithms]]
name = "critics"
expert_weight = 0.8
consumer_weight = 0.1
recency_weight = 0.1
boost_factors = { michelin_star = 10.0 }
"#;

#[test]
fn test_full_config_parses() {
    let config = LocalistConfig::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.matching.similarity_threshold, 0.9);
    assert_eq!(config.matching.proximity_meters, 75.0);
    assert_eq!(config.scoring.cooldown_minutes, 30);
    assert!(!config.coordinator.event_triggers);
    assert_eq!(config.coordinator.reconciler_schedule.as_deref(), Some("5m"));
    // Unspecified keys keep their defaults
    assert_eq!(config.coordinator.scorer_schedule.as_deref(), Some("1h"));

    assert_eq!(config.sources.len(), 2);
    let eater = &config.sources[0];
    assert_eq!(eater.source_type, SourceType::ExpertList);
    assert_eq!(eater.min_request_interval_ms, 1500);
    assert_eq!(
        eater.fetcher,
        FetcherConfig::HttpJson {
            url: "https://example.test/eater.json".to_string(),
            api_key_env: None,
            max_pages: Some(3),
        }
    );
    assert_eq!(config.sources[1].authority_weight, 1.0);
    assert!(config.sources[1].enabled);

    assert_eq!(config.curators[0].algorithm, "balanced");
    assert_eq!(config.algorithms[0].boost_factors["michelin_star"], 10.0);
    assert_eq!(config.algorithms[0].min_source_count, 1);
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = LocalistConfig::from_toml_str("").unwrap();
    assert_eq!(config.matching.similarity_threshold, 0.85);
    assert_eq!(config.matching.proximity_meters, 50.0);
    assert_eq!(config.scoring.cooldown_minutes, 60);
    assert!(config.coordinator.event_triggers);
    assert!(config.sources.is_empty());
}

#[test]
fn test_missing_file_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = LocalistConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_unparseable_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "matching = [").unwrap();
    assert!(LocalistConfig::load(Some(&path)).is_err());
}

#[test]
fn test_validation_rejects_bad_values() {
    let threshold = "[matching]\nsimilarity_threshold = 1.5\n";
    assert!(LocalistConfig::from_toml_str(threshold).is_err());

    let duplicate = r#"
[[sources]]
id = "a"
source_type = "directory"
fetcher = { kind = "json_file", path = "a.json" }

[[sources]]
id = "a"
source_type = "directory"
fetcher = { kind = "json_file", path = "b.json" }
"#;
    assert!(LocalistConfig::from_toml_str(duplicate).is_err());

    let anonymous_curator = "[[curators]]\ncity = \"nyc\"\n";
    assert!(LocalistConfig::from_toml_str(anonymous_curator).is_err());
}

#[test]
fn test_database_path_resolves_under_root() {
    let config = LocalistConfig::from_toml_str(FULL_CONFIG).unwrap();
    assert_eq!(
        config.resolve_database_path(Path::new("/srv/localist")),
        PathBuf::from("/srv/localist/data/catalog.db")
    );

    let defaults = LocalistConfig::default();
    assert_eq!(
        defaults.resolve_database_path(Path::new("/tmp/root")),
        PathBuf::from("/tmp/root/localist.db")
    );
}

#[test]
#[serial]
fn test_root_folder_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let config = LocalistConfig::from_toml_str(FULL_CONFIG).unwrap();
    let root = resolve_root_folder(Some(Path::new("/tmp/from-cli")), &config);
    assert_eq!(root, PathBuf::from("/tmp/from-cli"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_root_folder_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let config = LocalistConfig::from_toml_str(FULL_CONFIG).unwrap();
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/from-env"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_root_folder_falls_back_to_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let config = LocalistConfig::from_toml_str(FULL_CONFIG).unwrap();
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/srv/localist"));

    let root = resolve_root_folder(None, &LocalistConfig::default());
    assert!(!root.as_os_str().is_empty());
}
