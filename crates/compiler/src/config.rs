//! Middle-end configuration
//!
//! Options live in the `[middle-end]` table of a project `rill.toml`:
//!
//! ```toml
//! [middle-end]
//! # Dump the IR after the named passes (as S-expressions, at debug level)
//! dump = ["show", "await"]
//! # Re-check IR invariants after every pass
//! check = true
//! ```
//!
//! A missing file, a missing table and missing keys all fall back to the
//! defaults (no dumps, checking off).

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LowerConfig {
    /// Pass names whose output IR is dumped: `"show"`, `"rename"`, `"await"`.
    pub dump: Vec<String>,
    /// Run the IR checker after every pass.
    pub check: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectFile {
    #[serde(rename = "middle-end")]
    middle_end: LowerConfig,
}

impl LowerConfig {
    pub fn new() -> LowerConfig {
        LowerConfig::default()
    }

    /// Whether the named pass's output should be dumped.
    pub fn dumps(&self, pass: &str) -> bool {
        self.dump.iter().any(|d| d == pass)
    }

    /// Parse the `[middle-end]` table out of a project configuration.
    pub fn from_toml(content: &str) -> Result<LowerConfig, String> {
        let project: ProjectFile = toml::from_str(content)
            .map_err(|e| format!("Failed to parse middle-end config: {}", e))?;
        Ok(project.middle_end)
    }

    /// Load from a `rill.toml`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<LowerConfig, String> {
        if !path.exists() {
            return Ok(LowerConfig::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        LowerConfig::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LowerConfig::new();
        assert!(config.dump.is_empty());
        assert!(!config.check);
        assert!(!config.dumps("show"));
    }

    #[test]
    fn test_from_toml() {
        let config = LowerConfig::from_toml(
            r#"
            [middle-end]
            dump = ["show", "await"]
            check = true
            "#,
        )
        .unwrap();
        assert!(config.dumps("show"));
        assert!(config.dumps("await"));
        assert!(!config.dumps("rename"));
        assert!(config.check);
    }

    #[test]
    fn test_missing_table_is_default() {
        let config = LowerConfig::from_toml("[package]\nname = \"demo\"\n").unwrap();
        assert_eq!(config, LowerConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = LowerConfig::from_toml("[middle-end]\ndumps = []\n").unwrap_err();
        assert!(err.contains("Failed to parse"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rill.toml");
        std::fs::write(&path, "[middle-end]\ncheck = true\n").unwrap();
        let config = LowerConfig::load(&path).unwrap();
        assert!(config.check);
        // Missing files fall back to defaults.
        let config = LowerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LowerConfig::default());
    }
}
