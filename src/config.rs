//! Target configuration types.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Operating-system family of the compilation target.
///
/// This is a closed set: the calling-convention map recognizes exactly
/// these families, and anything else is rejected when the target
/// description is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    Linux,
    Macos,
}

impl TargetOs {
    /// The OS family this build is running on.
    pub fn host() -> Result<TargetOs, String> {
        if cfg!(target_os = "windows") {
            Ok(TargetOs::Windows)
        } else if cfg!(target_os = "linux") {
            Ok(TargetOs::Linux)
        } else if cfg!(target_os = "macos") {
            Ok(TargetOs::Macos)
        } else {
            Err("unsupported host operating system".to_string())
        }
    }
}

/// Compilation target description (target.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub os: TargetOs,
    /// Trace emitted operations to stderr.
    #[serde(default)]
    pub trace_emit: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            os: TargetOs::host().unwrap_or(TargetOs::Linux),
            trace_emit: false,
        }
    }
}

impl TargetConfig {
    /// Load a target description from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_config() {
        let config: TargetConfig = toml::from_str("os = \"windows\"").unwrap();
        assert_eq!(config.os, TargetOs::Windows);
        assert!(!config.trace_emit);
    }

    #[test]
    fn test_unknown_os_family_is_rejected() {
        let result: Result<TargetConfig, _> = toml::from_str("os = \"plan9\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let config = TargetConfig {
            os: TargetOs::Macos,
            trace_emit: true,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: TargetConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.os, TargetOs::Macos);
        assert!(back.trace_emit);
    }
}
