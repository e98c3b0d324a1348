//! Client configuration, read from TOML with every field defaulted.
//!
//! ```toml
//! state_dir = "/home/me/.local/share/chatline"
//!
//! [api]
//! base_url = "http://localhost:8000/api/"
//! connect_timeout_secs = 3
//! request_timeout_secs = 10
//!
//! [live]
//! url = "ws://localhost:8000/api/ws/{username}"
//!
//! [live.reconnect]
//! max_attempts = 5
//!
//! [display]
//! utc_offset_minutes = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::RestConfig;
use crate::calendar::Calendar;
use crate::error::{ChatError, Result};
use crate::transport::ReconnectPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// May contain a `{username}` placeholder.
    #[serde(default = "default_live_url")]
    pub url: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 0 disables reconnection.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Fixed offset for day labels and times; the local offset when unset.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

fn default_base_url() -> String {
    "http://localhost:8000/api/".into()
}

fn default_connect_timeout() -> u64 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

fn default_live_url() -> String {
    "ws://localhost:8000/api/ws".into()
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8000
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatline")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: default_live_url(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            live: LiveConfig::default(),
            state_dir: default_state_dir(),
            display: DisplayConfig::default(),
        }
    }
}

/// `$XDG_CONFIG_HOME/chatline/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chatline").join("config.toml"))
}

impl ClientConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Read `path`. A missing file at the default location is not an error;
    /// a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ChatError::Storage {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_toml(&raw)
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.api.base_url.clone(),
            connect_timeout: Duration::from_secs(self.api.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.live.reconnect;
        ReconnectPolicy {
            max_attempts: r.max_attempts,
            initial_backoff: Duration::from_millis(r.initial_backoff_ms),
            max_backoff: Duration::from_millis(r.max_backoff_ms.max(r.initial_backoff_ms)),
        }
    }

    pub fn calendar(&self) -> Calendar {
        match self.display.utc_offset_minutes {
            Some(minutes) => Calendar::with_offset_minutes(minutes),
            None => Calendar::local(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let cfg = ClientConfig::from_toml("").unwrap();
        assert_eq!(cfg.api.base_url, "http://localhost:8000/api/");
        assert_eq!(cfg.api.connect_timeout_secs, 3);
        assert_eq!(cfg.api.request_timeout_secs, 10);
        assert_eq!(cfg.live.url, "ws://localhost:8000/api/ws");
        assert_eq!(cfg.live.reconnect.max_attempts, 0);
        assert!(cfg.display.utc_offset_minutes.is_none());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let cfg = ClientConfig::from_toml(
            "[live.reconnect]\nmax_attempts = 4\n\n[api]\nrequest_timeout_secs = 30\n",
        )
        .unwrap();
        assert_eq!(cfg.live.reconnect.max_attempts, 4);
        assert_eq!(cfg.live.reconnect.initial_backoff_ms, 500);
        assert_eq!(cfg.api.request_timeout_secs, 30);
        assert_eq!(cfg.api.connect_timeout_secs, 3);
        assert!(cfg.reconnect_policy().enabled());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            ClientConfig::from_toml("api = 3"),
            Err(ChatError::Config(_))
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "state_dir = \"/tmp/chatline-test\"\n[display]\nutc_offset_minutes = 120").unwrap();
        let cfg = ClientConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.state_dir, PathBuf::from("/tmp/chatline-test"));
        assert_eq!(cfg.calendar().offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ChatError::Storage { .. }));
    }

    #[test]
    fn test_reconnect_policy_caps_inverted_backoff() {
        let mut cfg = ClientConfig::default();
        cfg.live.reconnect.initial_backoff_ms = 9000;
        cfg.live.reconnect.max_backoff_ms = 1000;
        let p = cfg.reconnect_policy();
        assert_eq!(p.max_backoff, Duration::from_millis(9000));
    }

    #[test]
    fn test_rest_config_timeouts() {
        let rc = ClientConfig::default().rest_config();
        assert_eq!(rc.connect_timeout, Duration::from_secs(3));
        assert_eq!(rc.request_timeout, Duration::from_secs(10));
    }
}
