//! Tests for loading dfi.toml configuration

use dfi::config::{DfiConfig, CONFIG_FILE_NAME};
use dfi::error_stack;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_discover_defaults_without_file() {
    let dir = TempDir::new().unwrap();
    let config = DfiConfig::discover(dir.path()).unwrap();
    assert_eq!(config, DfiConfig::default());
}

#[test]
fn test_discover_reads_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[json]\npretty = true\n[errors]\ncapacity = 2\n",
    )
    .unwrap();
    let config = DfiConfig::discover(dir.path()).unwrap();
    assert!(config.json.pretty);
    assert_eq!(config.errors.capacity, 2);
}

#[test]
fn test_apply_sets_error_capacity() {
    let config = DfiConfig::from_toml("[errors]\ncapacity = 2\n").unwrap();
    config.apply();
    error_stack::clear();
    for message in ["one", "two", "three"] {
        error_stack::push(message);
    }
    assert_eq!(error_stack::drain(), vec!["three".to_string(), "two".to_string()]);
    error_stack::set_capacity(error_stack::DEFAULT_CAPACITY);
}

#[test]
fn test_resolve_descriptor_uses_search_paths() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("descriptors");
    fs::create_dir(&nested).unwrap();
    fs::write(nested.join("calc.descriptor"), ":header\n").unwrap();

    let mut config = DfiConfig::default();
    assert!(config.resolve_descriptor("calc.descriptor").is_none());
    config.descriptors.search_paths.push(dir.path().to_path_buf());
    config.descriptors.search_paths.push(nested.clone());
    assert_eq!(
        config.resolve_descriptor("calc.descriptor"),
        Some(nested.join("calc.descriptor"))
    );
}

#[test]
fn test_missing_file_is_an_error() {
    error_stack::clear();
    let dir = TempDir::new().unwrap();
    assert!(DfiConfig::from_file(dir.path().join("absent.toml")).is_err());
    assert!(!error_stack::is_empty());
    error_stack::clear();
}
