use std::path::{Path, PathBuf};
use std::time::Duration;

use kyc_core::{CompletionPolicy, Thresholds};
use serde::Deserialize;
use thiserror::Error;

use crate::engine::SessionSettings;

const DEFAULT_API_URL: &str = "https://kyc-back-rmgs.onrender.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// CLI configuration: built-in defaults, then an optional TOML file, then
/// `KYC_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL.
    pub api_url: String,
    /// JSON file holding the access/refresh tokens.
    pub token_path: PathBuf,
    /// Eye openness below which an eye counts as closed.
    pub blink_threshold: f32,
    /// Nose-to-forehead offset beyond which the head counts as turned.
    pub head_movement_threshold: f32,
    /// Selfie JPEG quality (1–100).
    pub jpeg_quality: u8,
    /// Timeout for each backend request.
    pub request_timeout_secs: u64,
    /// Minimum spacing between processed frames. 0 processes frames back to back.
    pub frame_interval_ms: u64,
    /// Whether the liveness check completes before or after the upload is acknowledged.
    pub completion: CompletionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_path: default_token_path(),
            blink_threshold: thresholds.blink,
            head_movement_threshold: thresholds.head_movement,
            jpeg_quality: kyc_hw::DEFAULT_JPEG_QUALITY,
            request_timeout_secs: 30,
            frame_interval_ms: 33,
            completion: CompletionPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration, reading `path` if given and applying environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `KYC_*` overrides. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("KYC_API_URL") {
            self.api_url = url;
        }
        if let Some(path) = lookup("KYC_TOKEN_PATH") {
            self.token_path = PathBuf::from(path);
        }
        self.blink_threshold = parsed(&lookup, "KYC_BLINK_THRESHOLD", self.blink_threshold);
        self.head_movement_threshold = parsed(
            &lookup,
            "KYC_HEAD_MOVEMENT_THRESHOLD",
            self.head_movement_threshold,
        );
        self.jpeg_quality = parsed(&lookup, "KYC_JPEG_QUALITY", self.jpeg_quality);
        self.request_timeout_secs =
            parsed(&lookup, "KYC_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        self.frame_interval_ms = parsed(&lookup, "KYC_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self.completion = match lookup("KYC_COMPLETION").as_deref() {
            Some("local") => CompletionPolicy::Local,
            Some("confirmed") => CompletionPolicy::Confirmed,
            _ => self.completion,
        };
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            policy: self.completion,
            thresholds: Thresholds {
                blink: self.blink_threshold,
                head_movement: self.head_movement_threshold,
            },
            jpeg_quality: self.jpeg_quality,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
        }
    }
}

fn default_token_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("kyc/tokens.json")
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.blink_threshold, 0.025);
        assert_eq!(config.head_movement_threshold, 0.1);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.completion, CompletionPolicy::Confirmed);
        assert!(config.token_path.ends_with("kyc/tokens.json"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kyc.toml");
        std::fs::write(
            &path,
            "api_url = \"http://localhost:8000\"\ncompletion = \"local\"\nblink_threshold = 0.03\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.completion, CompletionPolicy::Local);
        assert_eq!(config.blink_threshold, 0.03);
        // Unset keys keep their defaults
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kyc.toml");
        std::fs::write(&path, "jpeg_quality = \"high\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KYC_API_URL", "http://backend"),
            ("KYC_HEAD_MOVEMENT_THRESHOLD", "0.2"),
            ("KYC_JPEG_QUALITY", "not-a-number"),
            ("KYC_COMPLETION", "local"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_url, "http://backend");
        assert_eq!(config.head_movement_threshold, 0.2);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.completion, CompletionPolicy::Local);

        let settings = config.session_settings();
        assert_eq!(settings.thresholds.head_movement, 0.2);
        assert_eq!(settings.frame_interval, Duration::from_millis(33));
    }
}
