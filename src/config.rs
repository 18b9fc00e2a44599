//! Runtime configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! `DOCVAULT_*` environment variables. Every field has a default so an
//! empty file (or no file at all) yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const ENV_ROOT: &str = "DOCVAULT_ROOT";
pub const ENV_OCR_ENDPOINT: &str = "DOCVAULT_OCR_ENDPOINT";
pub const ENV_OCR_API_KEY: &str = "DOCVAULT_OCR_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub ocr: OcrConfig,
}

/// Where documents live and how their two artifacts are named.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub primary_extension: String,
    pub sidecar_extension: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./dms"),
            primary_extension: "pdf".to_string(),
            sidecar_extension: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model_id: String,
    pub api_version: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model_id: "prebuilt-layout".to_string(),
            api_version: "2024-11-30".to_string(),
            poll_interval_ms: 1000,
            request_timeout_secs: 120,
        }
    }
}

impl OcrConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Loads `path` if given and present, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_toml(&std::fs::read_to_string(p)?)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::InvalidArgument(format!("config: {e}")))
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(root) = non_empty(ENV_ROOT) {
            self.store.root = PathBuf::from(root);
        }
        if let Some(endpoint) = non_empty(ENV_OCR_ENDPOINT) {
            self.ocr.endpoint = endpoint;
        }
        if let Some(key) = non_empty(ENV_OCR_API_KEY) {
            self.ocr.api_key = key;
        }
    }

    fn normalize(&mut self) -> Result<(), AppError> {
        self.store.primary_extension = normalize_extension(&self.store.primary_extension);
        self.store.sidecar_extension = normalize_extension(&self.store.sidecar_extension);

        if self.store.primary_extension.is_empty() || self.store.sidecar_extension.is_empty() {
            return Err(AppError::InvalidArgument(
                "document extensions must not be empty".to_string(),
            ));
        }
        if self.store.primary_extension == self.store.sidecar_extension {
            return Err(AppError::InvalidArgument(format!(
                "primary and sidecar extensions must differ (both are '{}')",
                self.store.primary_extension
            )));
        }
        Ok(())
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.root, PathBuf::from("./dms"));
        assert_eq!(config.store.primary_extension, "pdf");
        assert_eq!(config.store.sidecar_extension, "json");
        assert_eq!(config.ocr.model_id, "prebuilt-layout");
        assert_eq!(config.ocr.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [store]
            root = "/srv/documents"

            [ocr]
            endpoint = "https://ocr.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.root, PathBuf::from("/srv/documents"));
        assert_eq!(config.store.sidecar_extension, "json");
        assert_eq!(config.ocr.endpoint, "https://ocr.example.com");
        assert_eq!(config.ocr.poll_interval_ms, 1000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml("[store]\nroot = \"/from/file\"").unwrap();
        let env: HashMap<&str, &str> = [(ENV_ROOT, "/from/env"), (ENV_OCR_API_KEY, "secret")]
            .into_iter()
            .collect();

        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.store.root, PathBuf::from("/from/env"));
        assert_eq!(config.ocr.api_key, "secret");
        assert!(config.ocr.endpoint.is_empty());
    }

    #[test]
    fn test_extensions_are_normalized() {
        let mut config = Config::default();
        config.store.primary_extension = ".PDF".to_string();
        config.normalize().unwrap();
        assert_eq!(config.store.primary_extension, "pdf");
    }

    #[test]
    fn test_identical_extensions_rejected() {
        let mut config = Config::default();
        config.store.sidecar_extension = "pdf".to_string();
        assert!(matches!(
            config.normalize(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_malformed_toml_is_invalid_argument() {
        assert!(matches!(
            Config::from_toml("[store\nroot ="),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
