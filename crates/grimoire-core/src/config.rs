//! Host configuration for the tool subsystem.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ToolResult;

/// Conventional subdirectory scanned for tools inside a workspace.
pub const WORKSPACE_TOOLS_DIR: &str = ".grimoire/tools";

/// Conventional subdirectory scanned for tools under the user home.
pub const USER_TOOLS_DIR: &str = ".grimoire/tools";

/// Complete tool-subsystem configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrimoireConfig {
    /// Explicit custom tools directory. When set, only this directory is
    /// scanned and every tool found is tagged with the `custom` source.
    pub tools_dir: Option<PathBuf>,
    /// Runner and installer settings for packaged tools.
    pub runner: RunnerConfig,
}

/// Runner and installer settings for packaged tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Binary used to run packaged tools and install bun lockfiles.
    pub bun_bin: String,
    /// Binary used to install npm lockfiles.
    pub npm_bin: String,
    /// Timeout in seconds for subprocess execution and installs.
    pub timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bun_bin: "bun".to_owned(),
            npm_bin: "npm".to_owned(),
            timeout_seconds: 120,
        }
    }
}

impl GrimoireConfig {
    /// Loads configuration from `<workspace>/.grimoire/config.toml`,
    /// falling back to defaults when the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(workspace_root: &Path) -> ToolResult<Self> {
        let path = workspace_root.join(".grimoire").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let config = toml::from_str(&contents)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let temp = TempDir::new().unwrap();
        let config = GrimoireConfig::load(temp.path()).unwrap();
        assert!(config.tools_dir.is_none());
        assert_eq!(config.runner.bun_bin, "bun");
        assert_eq!(config.runner.npm_bin, "npm");
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".grimoire");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            "tools_dir = \"/opt/tools\"\n[runner]\nbun_bin = \"bunx\"\n",
        )
        .unwrap();

        let config = GrimoireConfig::load(temp.path()).unwrap();
        assert_eq!(config.tools_dir, Some(PathBuf::from("/opt/tools")));
        assert_eq!(config.runner.bun_bin, "bunx");
        // Unspecified fields keep their defaults.
        assert_eq!(config.runner.npm_bin, "npm");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".grimoire");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), "tools_dir = [not toml").unwrap();

        assert!(GrimoireConfig::load(temp.path()).is_err());
    }
}
