//! Configuration resolution tests
//!
//! Uses serial_test: these tests mutate process environment variables.

use serial_test::serial;
use sgre_common::config::{
    ENV_CACHE_ENABLED, ENV_CONFIG_PATH, ENV_DATA_DIR, ENV_ONEMAP_EMAIL, ENV_ONEMAP_PASSWORD,
};
use sgre_common::{Codec, Error, PipelineConfig};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    for var in [
        ENV_CONFIG_PATH,
        ENV_DATA_DIR,
        ENV_CACHE_ENABLED,
        ENV_ONEMAP_EMAIL,
        ENV_ONEMAP_PASSWORD,
    ] {
        env::remove_var(var);
    }
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_path_file_values() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        data_dir = "/srv/sgre"

        [storage]
        compression = "zstd"

        [geocoding]
        workers = 3
        email = "analyst@example.com"
        "#,
    );

    let config = PipelineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/srv/sgre"));
    assert_eq!(config.storage.compression, Codec::Zstd);
    assert_eq!(config.geocoding.workers, 3);
    assert_eq!(config.geocoding.email.as_deref(), Some("analyst@example.com"));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        data_dir = "/srv/sgre"
        [cache]
        enabled = true
        "#,
    );

    env::set_var(ENV_DATA_DIR, "/tmp/override");
    env::set_var(ENV_CACHE_ENABLED, "false");
    env::set_var(ENV_ONEMAP_EMAIL, "env@example.com");
    env::set_var(ENV_ONEMAP_PASSWORD, "secret");

    let config = PipelineConfig::load(Some(&path)).unwrap();
    clear_env();

    assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
    assert!(!config.cache.enabled);
    assert_eq!(config.geocoding.email.as_deref(), Some("env@example.com"));
    assert_eq!(config.geocoding.password.as_deref(), Some("secret"));
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[geocoding]\nworkers = 8\n");
    env::set_var(ENV_CONFIG_PATH, &path);

    let config = PipelineConfig::load(None).unwrap();
    clear_env();

    assert_eq!(config.geocoding.workers, 8);
}

#[test]
#[serial]
fn test_missing_env_config_falls_back_to_defaults() {
    clear_env();
    env::set_var(ENV_CONFIG_PATH, "/nonexistent/sgre/config.toml");

    let config = PipelineConfig::load(None).unwrap();
    clear_env();

    assert_eq!(config.geocoding, PipelineConfig::default().geocoding);
}

#[test]
#[serial]
fn test_missing_cli_config_is_an_error() {
    clear_env();
    let err = PipelineConfig::load(Some(std::path::Path::new("/nonexistent/config.toml")))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_invalid_cache_flag_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    env::set_var(ENV_CACHE_ENABLED, "sometimes");

    let result = PipelineConfig::load(Some(&path));
    clear_env();

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_malformed_toml_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[geocoding\nworkers = ");

    assert!(matches!(PipelineConfig::load(Some(&path)), Err(Error::Config(_))));
}
