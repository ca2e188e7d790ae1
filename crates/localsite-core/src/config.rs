//! User configuration (`~/.localsite/config.toml`).

use crate::error::{Error, Result};
use crate::site::WebServer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where generated server configs go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayout {
    /// Per-platform locations (Homebrew prefix on macOS, install root on
    /// Windows, `/etc` on Linux).
    #[default]
    Platform,
    /// Debian-style `/etc/{apache2,nginx}/sites-available` everywhere.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalsiteConfig {
    /// Whether `add` enables TLS unless `--no-ssl` is given.
    #[serde(default = "default_true")]
    pub ssl_default: bool,

    /// Server used when `add` is called without `--server`.
    #[serde(default = "default_server")]
    pub default_server: WebServer,

    #[serde(default)]
    pub layout: ConfigLayout,

    /// Overrides the site registry location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,

    /// Directory searched for templates before the built-in set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,

    /// Parent directory for issued certificates (one sub-directory per domain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_dir: Option<PathBuf>,
}

impl Default for LocalsiteConfig {
    fn default() -> Self {
        Self {
            ssl_default: true,
            default_server: WebServer::Nginx,
            layout: ConfigLayout::Platform,
            registry_path: None,
            templates_dir: None,
            cert_dir: None,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_server() -> WebServer {
    WebServer::Nginx
}

impl LocalsiteConfig {
    /// Load the config file, or defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file exists but is unreadable or
    /// malformed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("read {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("parse {}", path.display()), e))
    }

    /// Resolve the registry file, defaulting to `<state_dir>/sites.json`.
    #[must_use]
    pub fn registry_path(&self, state_dir: &Path) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| state_dir.join("sites.json"))
    }
}

/// Per-user state directory: `<home>/.localsite`.
#[must_use]
pub fn state_dir(home: &Path) -> PathBuf {
    home.join(".localsite")
}

/// Fallback home directory when no invoking user can be determined.
#[must_use]
pub fn fallback_home() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from("."),
        |dirs| dirs.home_dir().to_path_buf(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = LocalsiteConfig::load_from_path(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, LocalsiteConfig::default());
        assert!(config.ssl_default);
        assert_eq!(config.layout, ConfigLayout::Platform);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "ssl_default = false\nlayout = \"legacy\"\nregistry_path = \"/var/lib/localsite/sites.json\"\n",
        )
        .unwrap();

        let config = LocalsiteConfig::load_from_path(&path).unwrap();
        assert!(!config.ssl_default);
        assert_eq!(config.layout, ConfigLayout::Legacy);
        assert_eq!(config.default_server, WebServer::Nginx);
        assert_eq!(
            config.registry_path(Path::new("/home/dev/.localsite")),
            PathBuf::from("/var/lib/localsite/sites.json")
        );
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_server = \"iis\"\n").unwrap();
        let err = LocalsiteConfig::load_from_path(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
