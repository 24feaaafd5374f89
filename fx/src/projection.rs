//! Display-ready views joining the catalog, the selection and the rates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use fxtracker_common::{Asset, AssetCode, FxRate, FxRateEntity, SelectableAsset};
use tracing::{debug, instrument, warn};

use crate::cache::RateCache;
use crate::catalog::{filter_assets, AssetCatalog};
use crate::error::FxResult;
use crate::selection::SelectionStore;
use crate::store::{distinct_until_changed, PreferenceStore, Preferences};

/// Resolve rate entities against the catalog, sorted by reference code.
///
/// Entities with a code missing from the catalog are dropped.
pub fn project(entities: &[FxRateEntity], catalog: &[Asset]) -> Vec<FxRate> {
    let by_code: HashMap<&AssetCode, &Asset> = catalog.iter().map(|a| (&a.code, a)).collect();

    let mut rates: Vec<FxRate> = entities
        .iter()
        .filter_map(|entity| {
            let base = by_code.get(&entity.base_asset)?;
            let reference = by_code.get(&entity.reference_asset)?;
            Some(FxRate::new((*base).clone(), (*reference).clone(), entity.rate))
        })
        .collect();

    rates.sort_by(|a, b| a.reference_asset.code.cmp(&b.reference_asset.code));
    rates
}

/// Flag every asset with its selection state.
pub fn selectable_assets(
    assets: Vec<Asset>,
    selection: &BTreeSet<AssetCode>,
) -> Vec<SelectableAsset> {
    assets
        .into_iter()
        .map(|asset| {
            let is_selected = selection.contains(&asset.code);
            SelectableAsset::new(asset, is_selected)
        })
        .collect()
}

/// Reactive and one-shot projections over the stored data.
pub struct RateProjection {
    store: Arc<PreferenceStore>,
    catalog: Arc<AssetCatalog>,
    selection: Arc<SelectionStore>,
    rates: Arc<RateCache>,
}

impl RateProjection {
    pub fn new(
        store: Arc<PreferenceStore>,
        catalog: Arc<AssetCatalog>,
        selection: Arc<SelectionStore>,
        rates: Arc<RateCache>,
    ) -> Self {
        Self {
            store,
            catalog,
            selection,
            rates,
        }
    }

    /// Stream of the selected rates, re-projected whenever the store changes.
    ///
    /// Unreadable stored values count as empty.
    pub fn observe_selected_rates(&self) -> impl Stream<Item = Vec<FxRate>> + Send + 'static {
        let rates = self.store.data().map(|preferences| {
            project_snapshot(&preferences).unwrap_or_else(|e| {
                warn!(error = %e, "Stored data is unreadable");
                Vec::new()
            })
        });
        distinct_until_changed(rates)
    }

    /// Get the selected rates, fetching whatever the store lacks.
    #[instrument(skip(self))]
    pub async fn selected_rates(&self) -> FxResult<Vec<FxRate>> {
        let codes = self.selection.get()?;
        let entities = self.rates.get(&codes).await?;
        let catalog = self.catalog.get().await?;

        let rates = project(&entities, &catalog);
        debug!(
            fetched = entities.len(),
            projected = rates.len(),
            "Selected rates projected"
        );
        Ok(rates)
    }

    /// Stream of catalog assets matching `query`, flagged with their
    /// selection state.
    pub fn observe_selectable_assets(
        &self,
        query: impl Into<String>,
    ) -> impl Stream<Item = Vec<SelectableAsset>> + Send + 'static {
        let query = query.into();
        let assets = self.store.data().map(move |preferences| {
            let assets = AssetCatalog::read(&preferences).unwrap_or_default();
            let selection = SelectionStore::read(&preferences).unwrap_or_default();
            selectable_assets(filter_assets(assets, &query), &selection)
        });
        distinct_until_changed(assets)
    }
}

fn project_snapshot(preferences: &Preferences) -> FxResult<Vec<FxRate>> {
    let codes = SelectionStore::read(preferences)?;
    let entities: Vec<FxRateEntity> = RateCache::read(preferences)?
        .into_iter()
        .filter(|r| codes.contains(&r.reference_asset))
        .collect();
    let catalog = AssetCatalog::read(preferences)?;
    Ok(project(&entities, &catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchangeRateService;
    use crate::provider::RemoteRateSource;
    use rust_decimal_macros::dec;

    fn catalog() -> Vec<Asset> {
        vec![
            Asset::new("USD", "United States Dollar"),
            Asset::new("EUR", "Euro"),
            Asset::new("UAH", "Ukrainian Hryvnia"),
        ]
    }

    #[test]
    fn test_project_sorts_by_reference() {
        let entities = vec![
            FxRateEntity::new("USD", "UAH", dec!(41.2)),
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
            FxRateEntity::identity(AssetCode::new("USD")),
        ];

        let rates = project(&entities, &catalog());
        let references: Vec<&str> = rates
            .iter()
            .map(|r| r.reference_asset.code.as_str())
            .collect();
        assert_eq!(references, vec!["EUR", "UAH", "USD"]);
        assert_eq!(rates[0].base_asset.name, "United States Dollar");
    }

    #[test]
    fn test_project_drops_unresolved() {
        let entities = vec![
            FxRateEntity::new("USD", "XAU", dec!(0.0004)),
            FxRateEntity::new("JPY", "EUR", dec!(0.006)),
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
        ];

        let rates = project(&entities, &catalog());
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].reference_asset.code.as_str(), "EUR");
    }

    #[test]
    fn test_project_is_case_sensitive() {
        let entities = vec![
            FxRateEntity::new("USD", "eur", dec!(0.9)),
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
        ];
        let mut catalog = catalog();
        catalog.push(Asset::new("eur", "lowercase euro"));

        let rates = project(&entities, &catalog);
        let references: Vec<&str> = rates
            .iter()
            .map(|r| r.reference_asset.code.as_str())
            .collect();
        assert_eq!(references, vec!["EUR", "eur"]);
    }

    #[test]
    fn test_selectable_assets() {
        let selection = BTreeSet::from([AssetCode::new("EUR")]);
        let selectable = selectable_assets(catalog(), &selection);

        let selected: Vec<&str> = selectable
            .iter()
            .filter(|s| s.is_selected)
            .map(|s| s.asset.code.as_str())
            .collect();
        assert_eq!(selected, vec!["EUR"]);
        assert_eq!(selectable.len(), 3);
    }

    struct Fixture {
        service: Arc<MockExchangeRateService>,
        catalog: Arc<AssetCatalog>,
        selection: Arc<SelectionStore>,
        rates: Arc<RateCache>,
        projection: RateProjection,
    }

    fn fixture() -> Fixture {
        let service = MockExchangeRateService::new("USD");
        service.add_asset("USD", "United States Dollar");
        service.add_asset("EUR", "Euro");
        service.add_asset("UAH", "Ukrainian Hryvnia");
        service.set_quote("EUR", dec!(0.9));
        service.set_quote("UAH", dec!(41.2));
        let service = Arc::new(service);

        let store = Arc::new(PreferenceStore::in_memory());
        let catalog = Arc::new(AssetCatalog::new(store.clone(), service.clone()));
        let selection = Arc::new(SelectionStore::new(store.clone()));
        let rates = Arc::new(RateCache::new(
            store.clone(),
            Arc::new(RemoteRateSource::new(service.clone())),
        ));
        let projection =
            RateProjection::new(store, catalog.clone(), selection.clone(), rates.clone());

        Fixture {
            service,
            catalog,
            selection,
            rates,
            projection,
        }
    }

    #[tokio::test]
    async fn test_selected_rates() {
        let fx = fixture();
        fx.selection
            .save_all(BTreeSet::from([AssetCode::new("UAH"), AssetCode::new("USD")]))
            .await
            .unwrap();

        let rates = fx.projection.selected_rates().await.unwrap();

        let lines: Vec<(&str, Option<rust_decimal::Decimal>)> = rates
            .iter()
            .map(|r| (r.reference_asset.code.as_str(), r.inverted()))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("UAH", Some(dec!(0.0242718446601942))),
                ("USD", Some(dec!(1))),
            ]
        );
        assert_eq!(fx.service.live_calls(), 1);
        assert_eq!(fx.service.list_calls(), 1);

        // Served from the store the second time.
        fx.projection.selected_rates().await.unwrap();
        assert_eq!(fx.service.live_calls(), 1);
        assert_eq!(fx.service.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_observe_selected_rates_follows_store() {
        let fx = fixture();
        let mut observed = Box::pin(fx.projection.observe_selected_rates());
        assert!(observed.next().await.unwrap().is_empty());

        fx.selection
            .set_selected(AssetCode::new("EUR"), true)
            .await
            .unwrap();
        fx.projection.selected_rates().await.unwrap();

        // The latest snapshot has the selection, the rate and the catalog.
        let mut latest = Vec::new();
        while latest.is_empty() {
            latest = observed.next().await.unwrap();
        }
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].reference_asset, Asset::new("EUR", "Euro"));

        fx.rates
            .refresh(&BTreeSet::from([AssetCode::new("UAH")]))
            .await
            .unwrap();
        fx.selection
            .set_selected(AssetCode::new("UAH"), true)
            .await
            .unwrap();
        let mut latest = Vec::new();
        while latest.len() < 2 {
            latest = observed.next().await.unwrap();
        }
        assert_eq!(latest[1].reference_asset.code.as_str(), "UAH");
    }

    #[tokio::test]
    async fn test_observe_selectable_assets() {
        let fx = fixture();
        fx.catalog.get().await.unwrap();
        fx.selection
            .set_selected(AssetCode::new("UAH"), true)
            .await
            .unwrap();

        let mut observed = Box::pin(fx.projection.observe_selectable_assets("u"));
        let mut assets = observed.next().await.unwrap();
        while assets.is_empty() {
            assets = observed.next().await.unwrap();
        }
        assert_eq!(
            assets,
            vec![
                SelectableAsset::new(Asset::new("EUR", "Euro"), false),
                SelectableAsset::new(Asset::new("UAH", "Ukrainian Hryvnia"), true),
                SelectableAsset::new(Asset::new("USD", "United States Dollar"), false),
            ]
        );
    }
}
