//! Unit tests for configuration discovery and graceful degradation
//!
//! Tests:
//! - Missing config files do not cause failure (defaults are used)
//! - Priority order: explicit path → environment variable → platform dirs
//! - Malformed config files are reported as errors
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.

use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use whalemap_common::config::{find_config_file, load_config, LoggingConfig};
use whalemap_common::Error;

const TEST_ENV_VAR: &str = "WHALEMAP_COMMON_TEST_CONFIG";

#[derive(Debug, Default, Deserialize, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_var_used_when_no_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.toml");
    std::fs::write(&path, "port = 6001\n").unwrap();

    env::set_var(TEST_ENV_VAR, &path);
    let found = find_config_file(None, TEST_ENV_VAR, "sample.toml");
    env::remove_var(TEST_ENV_VAR);

    assert_eq!(found, Some(path));
}

#[test]
#[serial]
fn test_explicit_path_overrides_env_var() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = dir.path().join("explicit.toml");
    let from_env = dir.path().join("env.toml");
    std::fs::write(&explicit, "port = 1\n").unwrap();
    std::fs::write(&from_env, "port = 2\n").unwrap();

    env::set_var(TEST_ENV_VAR, &from_env);
    let (config, path): (SampleConfig, _) =
        load_config(Some(&explicit), TEST_ENV_VAR, "sample.toml").unwrap();
    env::remove_var(TEST_ENV_VAR);

    assert_eq!(config.port, Some(1));
    assert_eq!(path, Some(explicit));
}

#[test]
#[serial]
fn test_missing_explicit_file_falls_back_to_defaults() {
    env::remove_var(TEST_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let (config, path): (SampleConfig, _) =
        load_config(Some(&missing), TEST_ENV_VAR, "sample.toml").unwrap();

    assert_eq!(config, SampleConfig::default());
    assert!(path.is_none());
}

#[test]
#[serial]
fn test_logging_section_parsed() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

    let (config, _): (SampleConfig, _) =
        load_config(Some(file.path()), TEST_ENV_VAR, "sample.toml").unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.port, None);
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = \"not a number").unwrap();

    let result: whalemap_common::Result<(SampleConfig, _)> =
        load_config(Some(file.path()), TEST_ENV_VAR, "sample.toml");

    assert!(matches!(result, Err(Error::Config(_))));
}
