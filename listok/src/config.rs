//! Configuration for the listok core.
//!
//! # Environment Variables
//!
//! - `LISTOK_DB_PATH` - SQLite database path (default: `listok.db`)
//! - `LISTOK_LEGACY_DIR` - Directory of the legacy key-value store, if any
//! - `LISTOK_ENRICHMENT_TIMEOUT_SECS` - Per-item enrichment timeout, `0` disables (default: 30)
//! - `GEMINI_API_KEY` - Enables the Gemini collaborators when set
//! - `GEMINI_TEXT_MODEL` - Model for categories and insights (default: gemini-3-flash-preview)
//! - `GEMINI_IMAGE_MODEL` - Model for item icons (default: gemini-2.5-flash-image)
//! - `GEMINI_BASE_URL` - API root (default: the public v1beta endpoint)

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "listok.db";
pub const DEFAULT_ENRICHMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Gemini API settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub text_model: String,
    pub image_model: String,
    pub base_url: String,
    /// Transport timeout for a single HTTP request
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct ListokConfig {
    pub db_path: PathBuf,
    /// Legacy key-value directory; `None` means no legacy data to migrate
    pub legacy_dir: Option<PathBuf>,
    /// `None` disables the enrichment timeout
    pub enrichment_timeout: Option<Duration>,
    /// `None` runs without AI enrichment
    pub gemini: Option<GeminiConfig>,
}

impl Default for ListokConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            legacy_dir: None,
            enrichment_timeout: Some(Duration::from_secs(DEFAULT_ENRICHMENT_TIMEOUT_SECS)),
            gemini: None,
        }
    }
}

impl ListokConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load configuration from an explicit variable map.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(path) = get("LISTOK_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        config.legacy_dir = get("LISTOK_LEGACY_DIR").map(PathBuf::from);

        if let Some(raw) = get("LISTOK_ENRICHMENT_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ConfigError::InvalidEnvVar(
                    "LISTOK_ENRICHMENT_TIMEOUT_SECS".to_string(),
                    format!("expected whole seconds, got {raw:?}"),
                )
            })?;
            config.enrichment_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(api_key) = get("GEMINI_API_KEY") {
            let mut gemini = GeminiConfig::new(api_key);
            if let Some(model) = get("GEMINI_TEXT_MODEL") {
                gemini.text_model = model;
            }
            if let Some(model) = get("GEMINI_IMAGE_MODEL") {
                gemini.image_model = model;
            }
            if let Some(url) = get("GEMINI_BASE_URL") {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidEnvVar(
                        "GEMINI_BASE_URL".to_string(),
                        "must start with http:// or https://".to_string(),
                    ));
                }
                gemini.base_url = url.trim_end_matches('/').to_string();
            }
            config.gemini = Some(gemini);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ListokConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert!(config.legacy_dir.is_none());
        assert!(config.gemini.is_none());
        assert_eq!(config.enrichment_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_gemini_overrides() {
        let config = ListokConfig::from_vars(&vars(&[
            ("GEMINI_API_KEY", "k-123"),
            ("GEMINI_TEXT_MODEL", "gemini-lite"),
            ("GEMINI_BASE_URL", "http://localhost:8080/v1beta/"),
            ("LISTOK_ENRICHMENT_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        let gemini = config.gemini.unwrap();
        assert_eq!(gemini.api_key.expose_secret(), "k-123");
        assert_eq!(gemini.text_model, "gemini-lite");
        assert_eq!(gemini.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(gemini.base_url, "http://localhost:8080/v1beta");
        assert_eq!(config.enrichment_timeout, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ListokConfig::from_vars(&vars(&[("LISTOK_ENRICHMENT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("LISTOK_ENRICHMENT_TIMEOUT_SECS"));

        let err = ListokConfig::from_vars(&vars(&[
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_BASE_URL", "ftp://example"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(name, _) if name == "GEMINI_BASE_URL"));
    }
}
