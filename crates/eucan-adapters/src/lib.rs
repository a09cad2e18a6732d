//! Source adapter contracts and the adapters for known catalogue types.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eucan_core::{Catalogue, CatalogueType, EucanError, EucanWarning, SourceRow};
use eucan_storage::HttpClientConfig;
use thiserror::Error;

pub mod lifecycle;

pub use lifecycle::LifeCycleAdapter;

pub const CRATE_NAME: &str = "eucan-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("source reported errors: {0}")]
    GraphQl(String),
    #[error("could not decode source data: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Number of records for {0} is 0")]
    EmptySource(String),
}

/// Flattened rows of one source catalogue plus whatever was skipped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceData {
    pub rows: Vec<SourceRow>,
    pub warnings: Vec<EucanWarning>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn catalogue_type(&self) -> CatalogueType;

    async fn fetch(&self, catalogue: &Catalogue) -> Result<SourceData, AdapterError>;
}

/// Adapters keyed by catalogue type, resolved once per catalogue.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<CatalogueType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter this crate ships.
    pub fn with_defaults(config: &HttpClientConfig) -> Result<Self> {
        let lifecycle = LifeCycleAdapter::new(config).context("building LifeCycle adapter")?;
        Ok(Self::new().with_adapter(Arc::new(lifecycle)))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.catalogue_type(), adapter);
    }

    pub fn resolve(&self, catalogue: &Catalogue) -> Result<Arc<dyn SourceAdapter>, EucanError> {
        let kind = catalogue.kind()?;
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(EucanError::AdapterUnavailable(kind))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(CatalogueType);

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn catalogue_type(&self) -> CatalogueType {
            self.0
        }

        async fn fetch(&self, _catalogue: &Catalogue) -> Result<SourceData, AdapterError> {
            Ok(SourceData::default())
        }
    }

    fn catalogue(catalogue_type: &str) -> Catalogue {
        Catalogue::new("tc", "Test Catalogue", "https://test.nl", catalogue_type)
    }

    #[test]
    fn resolve_distinguishes_unknown_and_unavailable_types() {
        let registry = AdapterRegistry::new().with_adapter(Arc::new(StubAdapter(CatalogueType::LifeCycle)));

        assert!(registry.resolve(&catalogue("LifeCycle")).is_ok());

        let unavailable = registry.resolve(&catalogue("Mica")).err().expect("mica");
        assert_eq!(unavailable.to_string(), "Mica data. No module available yet!");

        let unknown = registry.resolve(&catalogue("Test")).err().expect("unknown");
        assert_eq!(unknown.to_string(), "Unknown catalogue type Test");
    }

    #[test]
    fn default_registry_serves_lifecycle() {
        let registry = AdapterRegistry::with_defaults(&HttpClientConfig::default()).expect("registry");
        let adapter = registry.resolve(&catalogue("LifeCycle")).expect("lifecycle");
        assert_eq!(adapter.catalogue_type(), CatalogueType::LifeCycle);
        assert!(registry.resolve(&catalogue("BirthCohorts")).is_err());
    }
}
