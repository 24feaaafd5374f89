//! Tracker facade wiring the stores, the API client and the autorefresh.

use std::sync::Arc;

use fxtracker_common::{Asset, AssetCode, FxRate, FxRateEntity};
use tracing::{info, instrument};

use crate::api::{ExchangeRateService, HttpExchangeRateService};
use crate::autorefresh::{AutorefreshDriver, AutorefreshSelectedRates};
use crate::cache::RateCache;
use crate::catalog::{self, AssetCatalog};
use crate::config::TrackerConfig;
use crate::error::{FxError, FxResult};
use crate::projection::RateProjection;
use crate::provider::RemoteRateSource;
use crate::selection::SelectionStore;
use crate::store::{FileBackend, PreferenceStore};

/// The FX tracker.
pub struct FxTracker {
    config: TrackerConfig,
    store: Arc<PreferenceStore>,
    catalog: Arc<AssetCatalog>,
    selection: Arc<SelectionStore>,
    rates: Arc<RateCache>,
    autorefresh: Arc<AutorefreshSelectedRates>,
    projection: Arc<RateProjection>,
}

impl FxTracker {
    /// Open a tracker backed by the file store and the HTTP pricing API.
    #[instrument(skip(config))]
    pub async fn open(config: TrackerConfig) -> FxResult<Self> {
        config.validate().map_err(FxError::Configuration)?;

        let backend = match &config.store_path {
            Some(path) => FileBackend::new(path),
            None => FileBackend::in_config_dir()?,
        };
        info!(path = %backend.path().display(), "Opening preference store");
        let store = Arc::new(PreferenceStore::open(Arc::new(backend)).await?);

        let service = Arc::new(HttpExchangeRateService::new(&config.api)?);

        Ok(Self::with_parts(config, store, service))
    }

    /// Build a tracker from an open store and a pricing API client.
    pub fn with_parts(
        config: TrackerConfig,
        store: Arc<PreferenceStore>,
        service: Arc<dyn ExchangeRateService>,
    ) -> Self {
        let catalog = Arc::new(AssetCatalog::new(store.clone(), service.clone()));
        let selection = Arc::new(SelectionStore::new(store.clone()));
        let rates = Arc::new(RateCache::with_policy(
            store.clone(),
            Arc::new(RemoteRateSource::new(service)),
            config.write_policy,
        ));
        let autorefresh = Arc::new(AutorefreshSelectedRates::new(
            selection.clone(),
            rates.clone(),
            config.refresh_period,
        ));
        let projection = Arc::new(RateProjection::new(
            store.clone(),
            catalog.clone(),
            selection.clone(),
            rates.clone(),
        ));

        Self {
            config,
            store,
            catalog,
            selection,
            rates,
            autorefresh,
            projection,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PreferenceStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<AssetCatalog> {
        &self.catalog
    }

    pub fn selection(&self) -> &Arc<SelectionStore> {
        &self.selection
    }

    pub fn rates(&self) -> &Arc<RateCache> {
        &self.rates
    }

    pub fn autorefresh(&self) -> &Arc<AutorefreshSelectedRates> {
        &self.autorefresh
    }

    pub fn projection(&self) -> &Arc<RateProjection> {
        &self.projection
    }

    /// Create a driver for the selected rates autorefresh.
    pub fn driver(&self) -> AutorefreshDriver {
        AutorefreshDriver::new(self.autorefresh.clone())
    }

    /// Select or unselect assets.
    ///
    /// Selected codes must be in the catalog. Unselecting never consults it.
    #[instrument(skip(self, codes))]
    pub async fn set_selected(&self, codes: &[AssetCode], selected: bool) -> FxResult<()> {
        if selected {
            let known = catalog::codes(&self.catalog.get().await?);
            if let Some(unknown) = codes.iter().find(|c| !known.contains(*c)) {
                return Err(FxError::Configuration(format!("Unknown asset code: {}", unknown)));
            }
        }

        for code in codes {
            self.selection.set_selected(code.clone(), selected).await?;
        }
        Ok(())
    }

    /// Refresh the rates of the current selection.
    pub async fn refresh_selected(&self) -> FxResult<Vec<FxRateEntity>> {
        let codes = self.selection.get()?;
        self.rates.refresh(&codes).await
    }

    /// Get the display-ready rates of the current selection.
    pub async fn selected_rates(&self) -> FxResult<Vec<FxRate>> {
        self.projection.selected_rates().await
    }

    /// Get the catalog, optionally forcing a reload.
    pub async fn assets(&self, reload: bool) -> FxResult<Vec<Asset>> {
        if reload {
            self.catalog.refresh().await
        } else {
            self.catalog.get().await
        }
    }
}
