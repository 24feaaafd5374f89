//! Rate source traits and implementations.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fxtracker_common::{from_unix_seconds, AssetCode, FxRateEntity};
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::api::{ExchangeRateService, FxRatesResponse};
use crate::error::FxResult;

/// Trait for FX rate sources.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch current rates for `codes`, sorted by reference asset code.
    ///
    /// An empty set yields an empty list.
    async fn fetch(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>>;
}

/// Rate source backed by the remote pricing API.
pub struct RemoteRateSource {
    service: Arc<dyn ExchangeRateService>,
}

impl RemoteRateSource {
    /// Create a new remote rate source.
    pub fn new(service: Arc<dyn ExchangeRateService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RateSource for RemoteRateSource {
    fn name(&self) -> &str {
        "remote"
    }

    #[instrument(skip(self, codes), fields(codes = codes.len()))]
    async fn fetch(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>> {
        // The API answers an unfiltered request with every asset it knows.
        if codes.is_empty() {
            debug!("No codes requested, skipping fetch");
            return Ok(Vec::new());
        }

        let currencies = codes
            .iter()
            .map(AssetCode::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let response = self.service.live_rates(&currencies).await?;
        let quoted_at = from_unix_seconds(response.timestamp);
        let rates = normalize(response, codes);

        debug!(count = rates.len(), quoted_at = ?quoted_at, "Fetched rates");
        Ok(rates)
    }
}

/// Turn a live rates response into rate entities.
///
/// Quote keys are `source + reference`. The API never quotes the source
/// against itself, so the identity rate is added when the source was
/// requested.
pub fn normalize(response: FxRatesResponse, codes: &BTreeSet<AssetCode>) -> Vec<FxRateEntity> {
    let source = AssetCode::new(response.source);
    let mut rates = Vec::with_capacity(response.quotes.len() + 1);

    for (key, rate) in response.quotes {
        let reference = match key.strip_prefix(source.as_str()) {
            Some(reference) if !reference.is_empty() => reference,
            // A bare source key is the identity quote.
            Some(_) => source.as_str(),
            None => {
                warn!(key = %key, source = %source, "Quote key without source prefix, skipping");
                continue;
            }
        };

        if rate <= Decimal::ZERO {
            warn!(key = %key, rate = %rate, "Non-positive quote, skipping");
            continue;
        }

        rates.push(FxRateEntity::new(source.clone(), reference, rate));
    }

    let has_identity = rates
        .iter()
        .any(|r| r.is_identity() && r.base_asset == source);
    if codes.contains(&source) && !has_identity {
        rates.push(FxRateEntity::identity(source));
    }

    rates.sort_by(|a, b| a.reference_asset.cmp(&b.reference_asset));
    rates.dedup_by(|a, b| a.reference_asset == b.reference_asset);
    rates
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    rates: dashmap::DashMap<AssetCode, FxRateEntity>,
    fail: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    pub fn new() -> Self {
        Self {
            rates: dashmap::DashMap::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Set the rate returned for its reference asset.
    pub fn set_rate(&self, rate: FxRateEntity) {
        self.rates.insert(rate.reference_asset.clone(), rate);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, codes: &BTreeSet<AssetCode>) -> FxResult<Vec<FxRateEntity>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::FxError::Network(
                "mock source unavailable".to_string(),
            ));
        }

        Ok(codes
            .iter()
            .filter_map(|code| self.rates.get(code).map(|r| r.clone()))
            .collect())
    }
}
