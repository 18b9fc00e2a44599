use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::services::document::DocumentLayout;
use crate::services::file_service::DocumentStore;
use crate::services::ocr_client::{DisabledClient, DocumentIntelligenceClient, OcrClient};
use crate::services::ocr_service::OcrService;
use crate::services::search_service::SearchService;

/// Components shared by every request. Each one holds its own handle on the
/// configured root; the filesystem is the only shared mutable state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<DocumentStore>,
    pub ocr: Arc<OcrService>,
    pub search: Arc<SearchService>,
}

impl AppState {
    /// Without an OCR endpoint the store and search still work; OCR cache
    /// misses fail with `ExternalService`.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let client: Arc<dyn OcrClient> = if config.ocr.endpoint.trim().is_empty() {
            tracing::warn!("no OCR endpoint configured, only cached OCR results are available");
            Arc::new(DisabledClient)
        } else {
            Arc::new(DocumentIntelligenceClient::new(config.ocr.clone())?)
        };
        Self::with_client(config, client)
    }

    pub fn with_client(config: Config, client: Arc<dyn OcrClient>) -> Result<Self, AppError> {
        let store = DocumentStore::new(&config.store)?;
        let layout = DocumentLayout::from_config(&config.store);
        let ocr = OcrService::new(store.root().clone(), layout.clone(), client);
        let search = SearchService::new(store.root().clone(), layout);

        tracing::info!(root = %store.root().path().display(), "document store ready");

        Ok(Self {
            config,
            store: Arc::new(store),
            ocr: Arc::new(ocr),
            search: Arc::new(search),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_endpoint_without_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.root = tmp.path().join("dms");
        config.ocr.endpoint = "https://ocr.example.com".to_string();

        assert!(matches!(
            AppState::new(config),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_without_endpoint_only_cache_misses_fail() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.root = tmp.path().join("dms");

        let state = AppState::new(config).unwrap();
        std::fs::write(state.store.root().path().join("a.pdf"), b"%PDF").unwrap();

        assert!(state.store.list_children("").is_ok());
        assert!(matches!(
            state.ocr.get_or_create("a.pdf", 10, 10).await,
            Err(AppError::ExternalService(_))
        ));
    }

    #[test]
    fn test_components_share_the_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.root = tmp.path().join("dms");
        config.ocr.endpoint = "https://ocr.example.com".to_string();
        config.ocr.api_key = "key".to_string();

        let state = AppState::new(config).unwrap();
        assert!(state.store.root().path().ends_with("dms"));
        assert!(tmp.path().join("dms").is_dir());
    }
}
