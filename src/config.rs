//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path, time::Duration};

use crate::workflow::poller::DEFAULT_POLL_INTERVAL;

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Statement-processing backend location.
    pub backend: BackendCfg,
    /// Login name and token cache.
    pub auth: AuthCfg,
    /// Polling cadence and options forwarded when processing starts.
    pub processing: ProcessingCfg,
    /// Where processed results are viewed.
    pub dashboard: DashboardCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCfg {
    pub base_url: String,
    /// Path prepended to every endpoint.
    pub api_prefix: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthCfg {
    /// Empty until set on the settings screen.
    pub username: String,
    pub token_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingCfg {
    pub poll_interval_ms: u64,
    /// Files above this size are rejected before upload.
    pub max_upload_mb: u64,
    /// Free-form table sent with "start processing".
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardCfg {
    /// `{file_id}` is replaced with the processed file's id.
    pub url: String,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_prefix: "/api/v1".into(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for AuthCfg {
    fn default() -> Self {
        Self {
            username: String::new(),
            token_path: "token.json".into(),
        }
    }
}

impl Default for ProcessingCfg {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            max_upload_mb: 50,
            options: Map::new(),
        }
    }
}

impl Default for DashboardCfg {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/dashboard?file={file_id}".into(),
        }
    }
}

impl BackendCfg {
    /// Base URL joined with the API prefix, without a trailing slash.
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let prefix = self.api_prefix.trim().trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }
}

impl ProcessingCfg {
    /// Never below 100ms so a typo cannot hammer the backend.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl DashboardCfg {
    pub fn url_for(&self, file_id: &str) -> String {
        self.url.replace("{file_id}", &urlencoding::encode(file_id))
    }
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }
}
