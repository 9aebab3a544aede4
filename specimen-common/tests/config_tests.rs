//! Unit tests for configuration resolution
//!
//! Uses serial_test to prevent environment variable races: tests that set
//! SPECIMEN_ROOT_FOLDER are marked #[serial].

use serial_test::serial;
use specimen_common::config::{resolve_root_folder, TomlConfig, TrackerConfig, ROOT_FOLDER_ENV};
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(Some(Path::new("/from/cli")), ROOT_FOLDER_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_environment_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_default_root_is_not_empty() {
    env::remove_var(ROOT_FOLDER_ENV);
    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, &TomlConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("specimen"));
}

#[test]
fn test_layout_under_root() {
    let config = TrackerConfig::from_root("/srv/lab");
    assert_eq!(config.database_path, PathBuf::from("/srv/lab/specimen.db"));
    assert_eq!(config.store_path, PathBuf::from("/srv/lab/store"));
    assert_eq!(config.upload_path, PathBuf::from("/srv/lab/store/.upload"));
    assert_eq!(config.id_salt, "sagittarius");
    assert_eq!(config.id_min_length, 5);
}

#[test]
fn test_toml_overrides_layout() {
    let toml = TomlConfig::parse(
        r#"
        database = "meta/tracker.db"
        store_path = "/mnt/adapt"
        id_min_length = 8
        log_level = "debug"
        "#,
    )
    .unwrap();

    let config = TrackerConfig::resolve(Some(Path::new("/srv/lab")), toml);
    assert_eq!(config.database_path, PathBuf::from("/srv/lab/meta/tracker.db"));
    assert_eq!(config.store_path, PathBuf::from("/mnt/adapt"));
    assert_eq!(config.upload_path, PathBuf::from("/mnt/adapt/.upload"));
    assert_eq!(config.id_min_length, 8);
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let err = TomlConfig::parse("store_path = [").unwrap_err();
    assert!(matches!(err, specimen_common::Error::Config(_)));

    let err = TomlConfig::parse("colour = \"blue\"").unwrap_err();
    assert!(matches!(err, specimen_common::Error::Config(_)));
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(TomlConfig::load(Some(&missing)).is_err());
}

#[test]
fn test_explicit_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "id_salt = \"elsewhere\"\n").unwrap();

    let toml = TomlConfig::load(Some(&path)).unwrap();
    assert_eq!(toml.id_salt.as_deref(), Some("elsewhere"));
}

#[test]
fn test_ensure_directories_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig::from_root(dir.path().join("root"));
    config.ensure_directories().unwrap();

    assert!(config.root_folder.is_dir());
    assert!(config.store_path.is_dir());
    assert!(config.upload_path.is_dir());
}
