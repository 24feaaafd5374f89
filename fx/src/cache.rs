//! Persisted FX rate cache with coverage checks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use fxtracker_common::{AssetCode, FxRateEntity};
use tracing::{debug, instrument, warn};

use crate::error::FxResult;
use crate::provider::RateSource;
use crate::store::{distinct_until_changed, PreferenceStore, Preferences};

/// Store key of the serialized rate list.
pub const FX_RATES_KEY: &str = "fxtracker.fx-rates";

/// How a refresh result is written to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Fetched rates replace stored rates with the same reference asset;
    /// other stored rates are kept.
    #[default]
    Merge,
    /// Fetched rates replace the whole stored list.
    Replace,
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::Merge => write!(f, "merge"),
            WritePolicy::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(WritePolicy::Merge),
            "replace" => Ok(WritePolicy::Replace),
            other => Err(format!("Unknown write policy: {}", other)),
        }
    }
}

/// Last-known rates, served from the store when they cover a request.
pub struct RateCache {
    store: Arc<PreferenceStore>,
    source: Arc<dyn RateSource>,
    policy: WritePolicy,
}

impl RateCache {
    /// Create a new rate cache with the default write policy.
    pub fn new(store: Arc<PreferenceStore>, source: Arc<dyn RateSource>) -> Self {
        Self::with_policy(store, source, WritePolicy::default())
    }

    /// Create a new rate cache with a custom write policy.
    pub fn with_policy(
        store: Arc<PreferenceStore>,
        source: Arc<dyn RateSource>,
        policy: WritePolicy,
    ) -> Self {
        Self {
            store,
            source,
            policy,
        }
    }

    /// Decode the stored rate list. Missing or blank values are empty.
    pub fn read(preferences: &Preferences) -> FxResult<Vec<FxRateEntity>> {
        match preferences.get_string(FX_RATES_KEY)? {
            Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(json)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Stream of stored rates whose reference asset is in `codes`.
    ///
    /// Starts with the current value. Decode failures yield an empty list.
    pub fn observe(
        &self,
        codes: BTreeSet<AssetCode>,
    ) -> impl Stream<Item = Vec<FxRateEntity>> + Send + 'static {
        let rates = self.store.data().map(move |preferences| {
            let rates = Self::read(&preferences).unwrap_or_else(|e| {
                warn!(error = %e, "Stored rates are unreadable");
                Vec::new()
            });
            filter_rates(rates, &codes)
        });
        distinct_until_changed(rates)
    }

    /// Stored rates whose reference asset is in `codes`, without fetching.
    pub fn cached(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>> {
        let rates = Self::read(&self.store.snapshot())?;
        Ok(filter_rates(rates, codes))
    }

    /// Get rates for `codes`, refreshing unless the store covers all of them.
    #[instrument(skip(self, codes), fields(codes = %join_codes(codes)))]
    pub async fn get(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>> {
        let cached = self.cached(codes)?;

        if !cached.is_empty() && covers(&cached, codes) {
            debug!(count = cached.len(), "Cache hit");
            return Ok(cached);
        }

        debug!(cached = cached.len(), "Cache miss");
        self.refresh(codes).await
    }

    /// Fetch rates for `codes`, store them and return what was fetched.
    #[instrument(skip(self, codes), fields(
        codes = %join_codes(codes),
        source = self.source.name(),
        policy = %self.policy,
    ))]
    pub async fn refresh(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>> {
        let fetched = self.source.fetch(codes).await?;

        let policy = self.policy;
        let incoming = fetched.clone();
        self.store
            .edit(move |preferences| {
                let stored = match policy {
                    WritePolicy::Merge => {
                        let existing = Self::read(preferences).unwrap_or_else(|e| {
                            warn!(error = %e, "Overwriting unreadable stored rates");
                            Vec::new()
                        });
                        merge_rates(existing, incoming)
                    }
                    WritePolicy::Replace => incoming,
                };
                preferences.set_string(FX_RATES_KEY, serde_json::to_string(&stored)?);
                Ok(())
            })
            .await?;

        debug!(count = fetched.len(), "Rates refreshed");
        Ok(fetched)
    }
}

/// Check that every code in `codes` has a rate in `rates`.
pub fn covers(rates: &[FxRateEntity], codes: &BTreeSet<AssetCode>) -> bool {
    let available: BTreeSet<&AssetCode> = rates.iter().map(|r| &r.reference_asset).collect();
    codes.iter().all(|code| available.contains(code))
}

/// Merge `incoming` into `stored`, keyed by reference asset.
///
/// The result is sorted by reference asset code.
pub fn merge_rates(stored: Vec<FxRateEntity>, incoming: Vec<FxRateEntity>) -> Vec<FxRateEntity> {
    let mut merged: BTreeMap<AssetCode, FxRateEntity> = BTreeMap::new();
    for rate in stored.into_iter().chain(incoming) {
        merged.insert(rate.reference_asset.clone(), rate);
    }
    merged.into_values().collect()
}

fn filter_rates(rates: Vec<FxRateEntity>, codes: &BTreeSet<AssetCode>) -> Vec<FxRateEntity> {
    rates
        .into_iter()
        .filter(|r| codes.contains(&r.reference_asset))
        .collect()
}

fn join_codes(codes: &BTreeSet<AssetCode>) -> String {
    codes
        .iter()
        .map(AssetCode::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateSource;
    use rust_decimal_macros::dec;

    fn codes(list: &[&str]) -> BTreeSet<AssetCode> {
        list.iter().map(|c| AssetCode::new(*c)).collect()
    }

    fn source() -> Arc<MockRateSource> {
        let source = MockRateSource::new();
        source.set_rate(FxRateEntity::new("USD", "EUR", dec!(0.92)));
        source.set_rate(FxRateEntity::new("USD", "UAH", dec!(41.5)));
        source.set_rate(FxRateEntity::new("USD", "GBP", dec!(0.79)));
        Arc::new(source)
    }

    async fn store_with(rates: &[FxRateEntity]) -> Arc<PreferenceStore> {
        let store = Arc::new(PreferenceStore::in_memory());
        let json = serde_json::to_string(rates).unwrap();
        store
            .edit(move |prefs| {
                prefs.set_string(FX_RATES_KEY, json);
                Ok(())
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_write_policy_parse() {
        assert_eq!("merge".parse::<WritePolicy>().unwrap(), WritePolicy::Merge);
        assert_eq!(" Replace ".parse::<WritePolicy>().unwrap(), WritePolicy::Replace);
        assert!("append".parse::<WritePolicy>().is_err());
        assert_eq!(WritePolicy::default().to_string(), "merge");
    }

    #[tokio::test]
    async fn test_covered_request_is_served_from_store() {
        let cached = vec![
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
            FxRateEntity::new("USD", "UAH", dec!(41.2)),
        ];
        let store = store_with(&cached).await;
        let source = source();
        let cache = RateCache::new(store, source.clone());

        let rates = cache.get(&codes(&["EUR", "UAH"])).await.unwrap();

        assert_eq!(rates, cached);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_store_triggers_fetch() {
        let store = Arc::new(PreferenceStore::in_memory());
        let source = source();
        let cache = RateCache::new(store.clone(), source.clone());

        let rates = cache.get(&codes(&["EUR"])).await.unwrap();

        assert_eq!(rates, vec![FxRateEntity::new("USD", "EUR", dec!(0.92))]);
        assert_eq!(source.calls(), 1);
        assert_eq!(RateCache::read(&store.snapshot()).unwrap(), rates);
    }

    #[tokio::test]
    async fn test_partial_coverage_triggers_fetch() {
        let store = store_with(&[FxRateEntity::new("USD", "EUR", dec!(0.9))]).await;
        let source = source();
        let cache = RateCache::new(store, source.clone());

        let rates = cache.get(&codes(&["EUR", "GBP"])).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(rates.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_unrelated_rates() {
        let store = store_with(&[
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
            FxRateEntity::new("USD", "JPY", dec!(150)),
        ])
        .await;
        let cache = RateCache::new(store.clone(), source());

        let fetched = cache.refresh(&codes(&["EUR", "UAH"])).await.unwrap();
        assert_eq!(fetched.len(), 2);

        let stored = RateCache::read(&store.snapshot()).unwrap();
        assert_eq!(
            stored,
            vec![
                FxRateEntity::new("USD", "EUR", dec!(0.92)),
                FxRateEntity::new("USD", "JPY", dec!(150)),
                FxRateEntity::new("USD", "UAH", dec!(41.5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_overwrites_stored_rates() {
        let store = store_with(&[FxRateEntity::new("USD", "JPY", dec!(150))]).await;
        let cache = RateCache::with_policy(store.clone(), source(), WritePolicy::Replace);

        cache.refresh(&codes(&["EUR"])).await.unwrap();

        let stored = RateCache::read(&store.snapshot()).unwrap();
        assert_eq!(stored, vec![FxRateEntity::new("USD", "EUR", dec!(0.92))]);
    }

    #[tokio::test]
    async fn test_get_surfaces_malformed_store() {
        let store = Arc::new(PreferenceStore::in_memory());
        store
            .edit(|prefs| {
                prefs.set_string(FX_RATES_KEY, "{ not a list");
                Ok(())
            })
            .await
            .unwrap();
        let source = source();
        let cache = RateCache::new(store, source.clone());

        let err = cache.get(&codes(&["EUR"])).await.unwrap_err();
        assert!(!err.is_remote());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_untouched() {
        let cached = vec![FxRateEntity::new("USD", "EUR", dec!(0.9))];
        let store = store_with(&cached).await;
        let source = source();
        source.set_failing(true);
        let cache = RateCache::new(store.clone(), source);

        assert!(cache.refresh(&codes(&["EUR"])).await.is_err());
        assert_eq!(RateCache::read(&store.snapshot()).unwrap(), cached);
    }

    #[tokio::test]
    async fn test_observe_filters_and_replays() {
        let store = store_with(&[
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
            FxRateEntity::new("USD", "JPY", dec!(150)),
        ])
        .await;
        let cache = RateCache::new(store.clone(), source());

        let mut rates = Box::pin(cache.observe(codes(&["EUR", "UAH"])));
        assert_eq!(
            rates.next().await.unwrap(),
            vec![FxRateEntity::new("USD", "EUR", dec!(0.9))]
        );

        cache.refresh(&codes(&["UAH"])).await.unwrap();
        assert_eq!(
            rates.next().await.unwrap(),
            vec![
                FxRateEntity::new("USD", "EUR", dec!(0.9)),
                FxRateEntity::new("USD", "UAH", dec!(41.5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_observe_malformed_store_is_empty() {
        let store = Arc::new(PreferenceStore::in_memory());
        store
            .edit(|prefs| {
                prefs.set_string(FX_RATES_KEY, "garbage");
                Ok(())
            })
            .await
            .unwrap();
        let cache = RateCache::new(store, source());

        let mut rates = Box::pin(cache.observe(codes(&["EUR"])));
        assert!(rates.next().await.unwrap().is_empty());
    }

    #[test]
    fn test_covers() {
        let rates = vec![
            FxRateEntity::new("USD", "EUR", dec!(0.9)),
            FxRateEntity::new("USD", "UAH", dec!(41.2)),
        ];
        assert!(covers(&rates, &codes(&["EUR", "UAH"])));
        assert!(covers(&rates, &codes(&["EUR"])));
        assert!(!covers(&rates, &codes(&["EUR", "GBP"])));
    }
}
