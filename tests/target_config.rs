//! Target description loading.

use std::fs;

use nacre::{TargetConfig, TargetOs};

#[test]
fn test_load_target_description() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.toml");
    fs::write(&path, "os = \"windows\"\ntrace_emit = true\n").unwrap();

    let config = TargetConfig::load(&path).unwrap();
    assert_eq!(config.os, TargetOs::Windows);
    assert!(config.trace_emit);
}

#[test]
fn test_unknown_os_family_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.toml");
    fs::write(&path, "os = \"solaris\"\n").unwrap();

    let err = TargetConfig::load(&path).unwrap_err();
    assert!(err.contains("failed to parse"), "unexpected error: {}", err);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = TargetConfig::load(&path).unwrap_err();
    assert!(err.contains("failed to read"), "unexpected error: {}", err);
}
