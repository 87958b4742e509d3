//! Config file loading.
//!
//! The first file found wins: `$REQMGR_CONFIG`, then `./reqmgr.yaml` /
//! `./reqmgr.yml`, then `~/.reqmgr/config.yaml` / `.yml`, then
//! `/etc/reqmgr/config.yaml` / `.yml` on Unix. `REQMGR_DB_PATH` and
//! `REQMGR_FORMAT` override the loaded values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./reqmgr.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime in seconds.
    pub session_timeout: u64,
    pub save_session: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout: 3600,
            save_session: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_format: OutputFormat,
    pub max_rows: usize,
    pub show_headers: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: OutputFormat::Table,
            max_rows: 50,
            show_headers: true,
        }
    }
}

/// Loads the config from `explicit` when given, otherwise from the first
/// readable file on the search path, otherwise defaults. Environment
/// overrides are applied last either way.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => read_file(path)
            .with_context(|| format!("cannot load config file {}", path.display()))?,
        None => {
            let mut found = Config::default();
            for path in search_paths() {
                if path.exists() {
                    found = read_file(&path)
                        .with_context(|| format!("cannot load config file {}", path.display()))?;
                    break;
                }
            }
            found
        }
    };

    apply_env_overrides(config)
}

fn read_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var("REQMGR_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    paths.push(PathBuf::from("./reqmgr.yaml"));
    paths.push(PathBuf::from("./reqmgr.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".reqmgr").join("config.yaml"));
        paths.push(home.join(".reqmgr").join("config.yml"));
    }

    #[cfg(unix)]
    {
        paths.push(PathBuf::from("/etc/reqmgr/config.yaml"));
        paths.push(PathBuf::from("/etc/reqmgr/config.yml"));
    }

    paths
}

fn apply_env_overrides(mut config: Config) -> Result<Config> {
    if let Ok(path) = std::env::var("REQMGR_DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Ok(format) = std::env::var("REQMGR_FORMAT") {
        config.output.default_format = format
            .parse()
            .map_err(|e| anyhow::anyhow!("REQMGR_FORMAT: {}", e))?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_file_exists() {
        let config = Config::default();
        assert_eq!(config.database.path, PathBuf::from("./reqmgr.db"));
        assert_eq!(config.auth.session_timeout, 3600);
        assert!(config.auth.save_session);
        assert_eq!(config.output.default_format, OutputFormat::Table);
    }

    #[test]
    fn test_explicit_file_with_partial_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reqmgr.yaml");
        std::fs::write(
            &path,
            "database:\n  path: /tmp/custom.db\noutput:\n  default_format: json\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/custom.db"));
        assert_eq!(config.output.default_format, OutputFormat::Json);
        // Untouched sections keep their defaults.
        assert_eq!(config.auth.session_timeout, 3600);
    }

    #[test]
    fn test_malformed_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reqmgr.yaml");
        std::fs::write(&path, "database: [not, a, mapping]\n").unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
