use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::checklist::DEFAULT_ITEMS_PER_PAGE;
use crate::debounce::MAX_WINDOW;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "checklist.toml";

fn default_api_base() -> String {
    "https://api.github.com".into()
}

fn default_owner() -> String {
    "EdinsonB".into()
}

fn default_repo() -> String {
    "Portal_Cert".into()
}

fn default_token_env() -> Option<String> {
    Some("GITHUB_TOKEN".into())
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_records_dir() -> String {
    "avances".into()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_items_per_page() -> usize {
    DEFAULT_ITEMS_PER_PAGE
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    // Env var consulted when no token has been stored locally.
    #[serde(default = "default_token_env")]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_records_dir")]
    pub records_dir: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            owner: default_owner(),
            repo: default_repo(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            records_dir: default_records_dir(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms).min(MAX_WINDOW)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChecklistConfig {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
}

impl Default for ChecklistConfig {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub checklist: ChecklistConfig,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Directory holding the local settings and fallback cache.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.storage.data_dir.as_ref() {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "checklist-sync")
            .map(|d| d.data_dir().to_path_buf())
            .ok_or_else(|| Error::msg("could not determine a data directory; set storage.data_dir"))
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("local-store.json"))
    }
}

/// Loads the config file; a missing file yields defaults.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))
}

pub fn resolve_env_ref(env_key: Option<&str>) -> Option<String> {
    env_key
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_remote_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.remote.api_base, "https://api.github.com");
        assert_eq!(cfg.remote.records_dir, "avances");
        assert_eq!(cfg.remote.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.sync.debounce(), Duration::from_millis(2000));
        assert_eq!(cfg.checklist.items_per_page, 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
[remote]
owner = "acme"

[sync]
debounce_ms = 500

[storage]
data_dir = "/tmp/checklist-data"
"#,
        )
        .unwrap();
        assert_eq!(cfg.remote.owner, "acme");
        assert_eq!(cfg.remote.repo, "Portal_Cert");
        assert_eq!(cfg.sync.debounce_ms, 500);
        assert_eq!(
            cfg.store_path().unwrap(),
            PathBuf::from("/tmp/checklist-data/local-store.json")
        );
    }

    #[test]
    fn huge_debounce_is_clamped() {
        let cfg = AppConfig::from_toml_str("[sync]\ndebounce_ms = 9223372036854775807\n").unwrap();
        assert_eq!(cfg.sync.debounce(), MAX_WINDOW);
        let max = SyncConfig {
            debounce_ms: u64::MAX,
        };
        assert_eq!(max.debounce(), MAX_WINDOW);
    }

    #[test]
    fn missing_file_is_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.remote.owner, "EdinsonB");
    }

    #[test]
    fn bad_toml_reports_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("checklist.toml");
        fs::write(&p, "[remote\nowner=").unwrap();
        let err = load(&p).unwrap_err().to_string();
        assert!(err.contains("TOML parse error"), "unexpected err: {err}");
    }

    #[test]
    fn env_ref_ignores_blank_names() {
        assert_eq!(resolve_env_ref(None), None);
        assert_eq!(resolve_env_ref(Some("  ")), None);
    }
}
