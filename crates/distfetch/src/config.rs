//! Fetch configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The CLI applies its own flags last.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::DistLayout;
use crate::{Error, Result};

/// Public HTTPS gateway used when the local daemon is unavailable.
pub const DEFAULT_GATEWAY_URL: &str = "https://ipfs.io";

/// Root under which every distribution is published.
pub const DEFAULT_DIST_ROOT: &str = "/ipns/dist.ipfs.io";

/// Hard cap on the number of bytes read from a single fetch (512 MiB).
pub const DEFAULT_SIZE_LIMIT: u64 = 512 * 1024 * 1024;

/// Request timeout for the local daemon client.
pub const DEFAULT_DAEMON_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Environment variable overriding the gateway URL.
pub const ENV_GATEWAY: &str = "DISTFETCH_GATEWAY";
/// Environment variable overriding the distribution root.
pub const ENV_DIST_ROOT: &str = "DISTFETCH_DIST_ROOT";
/// Legacy environment variable for the distribution root.
pub const ENV_IPFS_DIST_PATH: &str = "IPFS_DIST_PATH";
/// Daemon repository directory holding the `api` endpoint file.
pub const ENV_IPFS_PATH: &str = "IPFS_PATH";

/// Configuration shared by the transports and the installer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FetchConfig {
    /// Gateway origin the logical path is appended to.
    pub gateway_url: String,
    /// Distribution root path (e.g. `/ipns/dist.ipfs.io`).
    pub dist_root: String,
    /// `User-Agent` sent with HTTP requests.
    pub user_agent: String,
    /// Maximum number of bytes read from any fetched resource.
    pub size_limit: u64,
    /// Daemon request timeout in seconds.
    pub daemon_timeout_secs: u64,
    /// Daemon repository directory; defaults to `$IPFS_PATH` or `~/.ipfs`.
    pub daemon_repo: Option<PathBuf>,
    /// Whether to try the local daemon before the gateway.
    pub use_daemon: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            dist_root: DEFAULT_DIST_ROOT.to_string(),
            user_agent: concat!("distfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            size_limit: DEFAULT_SIZE_LIMIT,
            daemon_timeout_secs: DEFAULT_DAEMON_TIMEOUT.as_secs(),
            daemon_repo: None,
            use_daemon: true,
        }
    }
}

impl FetchConfig {
    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        toml::from_str(&text).map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(gateway) = non_empty(ENV_GATEWAY) {
            self.gateway_url = gateway;
        }
        if let Some(root) = non_empty(ENV_DIST_ROOT).or_else(|| non_empty(ENV_IPFS_DIST_PATH)) {
            self.dist_root = root;
        }
        if self.daemon_repo.is_none() {
            self.daemon_repo = non_empty(ENV_IPFS_PATH).map(PathBuf::from);
        }
        self
    }

    /// Daemon request timeout.
    #[must_use]
    pub const fn daemon_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_timeout_secs)
    }

    /// Daemon repository directory, falling back to `~/.ipfs`.
    #[must_use]
    pub fn daemon_repo_dir(&self) -> Option<PathBuf> {
        self.daemon_repo
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ipfs")))
    }

    /// Path layout of the configured distribution root.
    #[must_use]
    pub fn layout(&self) -> DistLayout {
        DistLayout::new(&self.dist_root)
    }

    /// Check values that would otherwise fail late.
    pub fn validate(&self) -> Result<()> {
        if !(self.gateway_url.starts_with("http://") || self.gateway_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "gateway-url must be an http(s) URL, got '{}'",
                self.gateway_url
            )));
        }
        if !self.dist_root.starts_with('/') {
            return Err(Error::config(format!(
                "dist-root must be an absolute path, got '{}'",
                self.dist_root
            )));
        }
        if self.size_limit == 0 {
            return Err(Error::config("size-limit must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.gateway_url, "https://ipfs.io");
        assert_eq!(config.dist_root, "/ipns/dist.ipfs.io");
        assert_eq!(config.size_limit, 512 * 1024 * 1024);
        assert_eq!(config.daemon_timeout(), Duration::from_secs(300));
        assert!(config.use_daemon);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FetchConfig::from_toml_str(
            r#"
gateway-url = "http://127.0.0.1:8080"
use-daemon = false
"#,
        )
        .unwrap();
        assert_eq!(config.gateway_url, "http://127.0.0.1:8080");
        assert!(!config.use_daemon);
        assert_eq!(config.dist_root, DEFAULT_DIST_ROOT);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = FetchConfig::from_toml_str("gatway = \"x\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FetchConfig::load(Path::new("/nonexistent/distfetch.toml")).unwrap_err();
        assert!(matches!(err, Error::Io { operation: "read", .. }));
    }

    #[test]
    fn test_load_invalid_file_names_path_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("distfetch.toml");
        std::fs::write(&path, "size-limit = \"big\"\n").unwrap();

        let err = FetchConfig::load(&path).unwrap_err();
        let message = err.to_string();

        assert!(matches!(err, Error::Config(_)));
        assert!(message.starts_with(&format!("configuration error: {}: ", path.display())));
        assert_eq!(message.matches("configuration error").count(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_GATEWAY, "https://gateway.example"),
            (ENV_IPFS_DIST_PATH, "/ipfs/bafyroot"),
            (ENV_IPFS_PATH, "/var/lib/ipfs"),
        ]
        .into_iter()
        .collect();

        let config = FetchConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.gateway_url, "https://gateway.example");
        assert_eq!(config.dist_root, "/ipfs/bafyroot");
        assert_eq!(config.daemon_repo, Some(PathBuf::from("/var/lib/ipfs")));
    }

    #[test]
    fn test_dist_root_env_wins_over_legacy() {
        let config = FetchConfig::default().with_overrides_from(|key| match key {
            ENV_DIST_ROOT => Some("/ipns/new.example".to_string()),
            ENV_IPFS_DIST_PATH => Some("/ipns/old.example".to_string()),
            _ => None,
        });
        assert_eq!(config.dist_root, "/ipns/new.example");
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let config = FetchConfig::default().with_overrides_from(|_| Some("  ".to_string()));
        assert_eq!(config, FetchConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = FetchConfig {
            gateway_url: "ftp://example".to_string(),
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            dist_root: "relative".to_string(),
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            size_limit: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
