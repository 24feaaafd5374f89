//! Asset catalog cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use fxtracker_common::{Asset, AssetCode};
use tracing::{debug, info, instrument, warn};

use crate::api::{AssetsResponse, ExchangeRateService};
use crate::error::FxResult;
use crate::store::{distinct_until_changed, PreferenceStore, Preferences};

/// Store key of the serialized asset list.
pub const ASSETS_KEY: &str = "fxtracker.assets";

/// Lazily loaded list of every asset the pricing API knows.
pub struct AssetCatalog {
    store: Arc<PreferenceStore>,
    service: Arc<dyn ExchangeRateService>,
}

impl AssetCatalog {
    /// Create a new catalog.
    pub fn new(store: Arc<PreferenceStore>, service: Arc<dyn ExchangeRateService>) -> Self {
        Self { store, service }
    }

    /// Decode the stored asset list. Missing or blank values are empty.
    pub fn read(preferences: &Preferences) -> FxResult<Vec<Asset>> {
        match preferences.get_string(ASSETS_KEY)? {
            Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(json)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Stream of the stored catalog, starting with the current value.
    ///
    /// Decode failures yield an empty list.
    pub fn observe(&self) -> impl Stream<Item = Vec<Asset>> + Send + 'static {
        let assets = self.store.data().map(|preferences| {
            Self::read(&preferences).unwrap_or_else(|e| {
                warn!(error = %e, "Stored assets are unreadable");
                Vec::new()
            })
        });
        distinct_until_changed(assets)
    }

    /// Stream of catalog assets matching `query`, sorted by code.
    pub fn search(
        &self,
        query: impl Into<String>,
    ) -> impl Stream<Item = Vec<Asset>> + Send + 'static {
        let query = query.into();
        self.observe()
            .map(move |assets| filter_assets(assets, &query))
    }

    /// Get the catalog, fetching it when nothing is stored yet.
    #[instrument(skip(self))]
    pub async fn get(&self) -> FxResult<Vec<Asset>> {
        let stored = Self::read(&self.store.snapshot())?;
        if !stored.is_empty() {
            debug!(count = stored.len(), "Catalog served from store");
            return Ok(stored);
        }

        self.refresh().await
    }

    /// Reload the catalog from the pricing API and replace the stored one.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> FxResult<Vec<Asset>> {
        let response = self.service.list_assets().await?;
        let assets = to_assets(response);

        let json = serde_json::to_string(&assets)?;
        self.store
            .edit(move |preferences| {
                preferences.set_string(ASSETS_KEY, json);
                Ok(())
            })
            .await?;

        info!(count = assets.len(), "Asset catalog refreshed");
        Ok(assets)
    }
}

/// Map a `/list` response to assets sorted by code.
pub fn to_assets(response: AssetsResponse) -> Vec<Asset> {
    // BTreeMap iteration is already ordered by code.
    response
        .currencies
        .into_iter()
        .map(|(code, name)| Asset::new(code, name))
        .collect()
}

/// Keep assets matching `query`, sorted by code.
pub fn filter_assets(assets: Vec<Asset>, query: &str) -> Vec<Asset> {
    let query = query.trim();
    let mut matching: Vec<Asset> = assets.into_iter().filter(|a| a.matches(query)).collect();
    matching.sort_by(|a, b| a.code.cmp(&b.code));
    matching
}

/// Codes present in `assets`.
pub fn codes(assets: &[Asset]) -> BTreeSet<AssetCode> {
    assets.iter().map(|a| a.code.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchangeRateService;

    fn service() -> Arc<MockExchangeRateService> {
        let service = MockExchangeRateService::new("USD");
        service.add_asset("USD", "United States Dollar");
        service.add_asset("EUR", "Euro");
        service.add_asset("UAH", "Ukrainian Hryvnia");
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_get_fetches_once() {
        let store = Arc::new(PreferenceStore::in_memory());
        let service = service();
        let catalog = AssetCatalog::new(store.clone(), service.clone());

        let assets = catalog.get().await.unwrap();
        assert_eq!(
            assets,
            vec![
                Asset::new("EUR", "Euro"),
                Asset::new("UAH", "Ukrainian Hryvnia"),
                Asset::new("USD", "United States Dollar"),
            ]
        );

        let again = catalog.get().await.unwrap();
        assert_eq!(again, assets);
        assert_eq!(service.list_calls(), 1);
        assert_eq!(AssetCatalog::read(&store.snapshot()).unwrap(), assets);
    }

    #[tokio::test]
    async fn test_get_fails_without_stored_catalog() {
        let service = service();
        service.set_failing(true);
        let catalog = AssetCatalog::new(Arc::new(PreferenceStore::in_memory()), service);

        let err = catalog.get().await.unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_get_surfaces_malformed_store() {
        let store = Arc::new(PreferenceStore::in_memory());
        store
            .edit(|prefs| {
                prefs.set_string(ASSETS_KEY, "[{\"code\": 1}]");
                Ok(())
            })
            .await
            .unwrap();
        let service = service();
        let catalog = AssetCatalog::new(store, service.clone());

        assert!(catalog.get().await.is_err());
        assert_eq!(service.list_calls(), 0);

        let mut observed = Box::pin(catalog.observe());
        assert!(observed.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_catalog() {
        let store = Arc::new(PreferenceStore::in_memory());
        let service = service();
        let catalog = AssetCatalog::new(store, service.clone());
        catalog.get().await.unwrap();

        service.add_asset("GBP", "British Pound");
        let assets = catalog.refresh().await.unwrap();

        assert_eq!(assets.len(), 4);
        assert_eq!(service.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_search_matches_code_and_name() {
        let catalog = AssetCatalog::new(Arc::new(PreferenceStore::in_memory()), service());
        let mut results = Box::pin(catalog.search("u"));

        assert!(results.next().await.unwrap().is_empty());

        catalog.get().await.unwrap();
        let found = results.next().await.unwrap();
        let codes: Vec<&str> = found.iter().map(|a| a.code.as_str()).collect();
        // "Euro" and "Ukrainian Hryvnia" match by name, "USD" by code.
        assert_eq!(codes, vec!["EUR", "UAH", "USD"]);
    }

    #[test]
    fn test_filter_assets() {
        let assets = vec![
            Asset::new("USD", "United States Dollar"),
            Asset::new("EUR", "Euro"),
        ];
        assert_eq!(filter_assets(assets.clone(), "EUR"), vec![Asset::new("EUR", "Euro")]);
        assert_eq!(filter_assets(assets.clone(), "dollar").len(), 1);
        assert_eq!(filter_assets(assets.clone(), " ").len(), 2);
        assert!(filter_assets(assets, "yen").is_empty());
    }
}
