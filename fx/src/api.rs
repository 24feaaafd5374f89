//! Remote pricing API client.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument, warn};

use crate::config::ApiConfig;
use crate::error::{FxError, FxResult};

/// Response of `GET /list`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsResponse {
    /// Asset code to asset name.
    pub currencies: BTreeMap<String, String>,
}

/// Response of `GET /live`.
#[derive(Debug, Clone, Deserialize)]
pub struct FxRatesResponse {
    /// Unix time of the quotes.
    pub timestamp: i64,
    /// Base asset of every quote.
    pub source: String,
    /// `source + reference` code to rate, e.g. `USDEUR`.
    #[serde(deserialize_with = "deserialize_quotes")]
    pub quotes: BTreeMap<String, Decimal>,
}

/// Error body the API returns with `"success": false`.
#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    info: Option<String>,
}

fn deserialize_quotes<'de, D>(deserializer: D) -> Result<BTreeMap<String, Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let rate = parse_decimal(&value).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid rate for {}: {}", key, value))
            })?;
            Ok((key, rate))
        })
        .collect()
}

/// Parse a JSON number or numeric string from its source text.
///
/// Relies on serde_json's `arbitrary_precision`, which keeps numbers as text.
fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Trait for the remote pricing API.
#[async_trait]
pub trait ExchangeRateService: Send + Sync {
    /// Fetch the asset catalog.
    async fn list_assets(&self) -> FxResult<AssetsResponse>;

    /// Fetch live rates for a comma separated list of asset codes.
    async fn live_rates(&self, currencies: &str) -> FxResult<FxRatesResponse>;
}

/// Append `name=key` to `url` when it targets `host` and has no such
/// parameter yet.
pub fn inject_api_key(url: &mut Url, host: &str, name: &str, key: &str) {
    if url.host_str() != Some(host) {
        return;
    }
    if url.query_pairs().any(|(k, _)| k == name) {
        return;
    }
    url.query_pairs_mut().append_pair(name, key);
}

/// HTTP implementation of [`ExchangeRateService`].
pub struct HttpExchangeRateService {
    client: reqwest::Client,
    base_url: Url,
    host: String,
    api_key_param: String,
    api_key: String,
}

impl HttpExchangeRateService {
    /// Create a new client from API configuration.
    pub fn new(config: &ApiConfig) -> FxResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FxError::Configuration(format!("Invalid API URL {}: {}", base, e)))?;
        let host = base_url
            .host_str()
            .ok_or_else(|| FxError::Configuration(format!("API URL {} has no host", base)))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("fxtracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FxError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            host,
            api_key_param: config.api_key_param.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn build_url(&self, path: &str, query: &[(&str, &str)]) -> FxResult<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| FxError::Configuration(format!("Invalid API path {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        inject_api_key(&mut url, &self.host, &self.api_key_param, &self.api_key);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> FxResult<T> {
        let url = self.build_url(path, query)?;

        debug!(path, "Sending API request");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(path, status = %status, "API returned error status");
            return Err(FxError::Api {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        decode_body(&body)
    }
}

/// Decode an API body, turning `"success": false` envelopes into errors.
fn decode_body<T: DeserializeOwned>(body: &str) -> FxResult<T> {
    let value: serde_json::Value = serde_json::from_str(body)?;

    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        let error: Option<ApiErrorBody> = value
            .get("error")
            .cloned()
            .and_then(|e| serde_json::from_value(e).ok());
        let (status, message) = match error {
            Some(e) => (
                e.code.unwrap_or(0),
                e.info.or(e.kind).unwrap_or_else(|| "unknown error".to_string()),
            ),
            None => (0, "unknown error".to_string()),
        };
        return Err(FxError::Api { status, message });
    }

    Ok(serde_json::from_value(value)?)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl ExchangeRateService for HttpExchangeRateService {
    #[instrument(skip(self))]
    async fn list_assets(&self) -> FxResult<AssetsResponse> {
        self.get_json("list", &[]).await
    }

    #[instrument(skip(self))]
    async fn live_rates(&self, currencies: &str) -> FxResult<FxRatesResponse> {
        self.get_json("live", &[("currencies", currencies)]).await
    }
}

/// Mock pricing API for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockExchangeRateService {
    assets: dashmap::DashMap<String, String>,
    quotes: dashmap::DashMap<String, Decimal>,
    source: parking_lot::RwLock<String>,
    include_source_quote: std::sync::atomic::AtomicBool,
    fail: std::sync::atomic::AtomicBool,
    list_calls: std::sync::atomic::AtomicUsize,
    live_calls: std::sync::atomic::AtomicUsize,
    last_currencies: parking_lot::Mutex<Option<String>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockExchangeRateService {
    /// Create a mock quoting against `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            assets: dashmap::DashMap::new(),
            quotes: dashmap::DashMap::new(),
            source: parking_lot::RwLock::new(source.into()),
            include_source_quote: std::sync::atomic::AtomicBool::new(false),
            fail: std::sync::atomic::AtomicBool::new(false),
            list_calls: std::sync::atomic::AtomicUsize::new(0),
            live_calls: std::sync::atomic::AtomicUsize::new(0),
            last_currencies: parking_lot::Mutex::new(None),
        }
    }

    /// Add a catalog asset.
    pub fn add_asset(&self, code: &str, name: &str) {
        self.assets.insert(code.to_string(), name.to_string());
    }

    /// Set the rate of `reference` against the source asset.
    pub fn set_quote(&self, reference: &str, rate: Decimal) {
        self.quotes.insert(reference.to_string(), rate);
    }

    /// Answer every request with a network error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Also quote the source against itself (the real API omits it).
    pub fn set_include_source_quote(&self, include: bool) {
        self.include_source_quote
            .store(include, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn live_calls(&self) -> usize {
        self.live_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The `currencies` parameter of the last live request.
    pub fn last_currencies(&self) -> Option<String> {
        self.last_currencies.lock().clone()
    }

    fn check_failing(&self) -> FxResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::Network("mock service unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl ExchangeRateService for MockExchangeRateService {
    async fn list_assets(&self) -> FxResult<AssetsResponse> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.check_failing()?;

        Ok(AssetsResponse {
            currencies: self
                .assets
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        })
    }

    async fn live_rates(&self, currencies: &str) -> FxResult<FxRatesResponse> {
        self.live_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        *self.last_currencies.lock() = Some(currencies.to_string());
        self.check_failing()?;

        let source = self.source.read().clone();
        let include_source = self
            .include_source_quote
            .load(std::sync::atomic::Ordering::SeqCst);
        let requested: Vec<&str> = currencies.split(',').filter(|c| !c.is_empty()).collect();

        let mut quotes = BTreeMap::new();
        for entry in self.quotes.iter() {
            let code = entry.key();
            // Unfiltered requests return everything, like the real API.
            if !requested.is_empty() && !requested.contains(&code.as_str()) {
                continue;
            }
            if *code == source && !include_source {
                continue;
            }
            quotes.insert(format!("{}{}", source, code), *entry.value());
        }

        Ok(FxRatesResponse {
            timestamp: chrono::Utc::now().timestamp(),
            source,
            quotes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_inject_api_key() {
        let mut url = Url::parse("https://api.exchangerate.host/live?currencies=EUR").unwrap();
        inject_api_key(&mut url, "api.exchangerate.host", "access_key", "secret");
        assert_eq!(
            url.as_str(),
            "https://api.exchangerate.host/live?currencies=EUR&access_key=secret"
        );
    }

    #[test]
    fn test_inject_api_key_keeps_existing_key() {
        let mut url = Url::parse("https://api.exchangerate.host/list?access_key=mine").unwrap();
        inject_api_key(&mut url, "api.exchangerate.host", "access_key", "secret");
        assert_eq!(url.as_str(), "https://api.exchangerate.host/list?access_key=mine");
    }

    #[test]
    fn test_inject_api_key_ignores_other_hosts() {
        let mut url = Url::parse("https://example.com/list").unwrap();
        inject_api_key(&mut url, "api.exchangerate.host", "access_key", "secret");
        assert_eq!(url.as_str(), "https://example.com/list");
    }

    #[test]
    fn test_build_url() {
        let config = ApiConfig {
            base_url: "https://api.exchangerate.host".to_string(),
            api_key: "secret".to_string(),
            ..Default::default()
        };
        let service = HttpExchangeRateService::new(&config).unwrap();

        let url = service.build_url("live", &[("currencies", "EUR,UAH")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.exchangerate.host/live?currencies=EUR%2CUAH&access_key=secret"
        );
    }

    #[test]
    fn test_decode_live_response_keeps_precision() {
        let body = r#"{
            "success": true,
            "timestamp": 1700000000,
            "source": "USD",
            "quotes": {"USDEUR": 0.912345678901, "USDUAH": "41.2", "USDBTC": 1.5e-5}
        }"#;

        let response: FxRatesResponse = decode_body(body).unwrap();
        assert_eq!(response.source, "USD");
        assert_eq!(response.quotes["USDEUR"], dec!(0.912345678901));
        assert_eq!(response.quotes["USDUAH"], dec!(41.2));
        assert_eq!(response.quotes["USDBTC"], dec!(0.000015));
    }

    #[test]
    fn test_decode_keeps_all_significant_digits() {
        let body = r#"{
            "success": true,
            "timestamp": 1700000000,
            "source": "USD",
            "quotes": {"USDUAH": 41.123456789012345678, "USDEUR": 0.91234567890123456789}
        }"#;

        let response: FxRatesResponse = decode_body(body).unwrap();
        assert_eq!(response.timestamp, 1_700_000_000);
        assert_eq!(response.quotes["USDUAH"], dec!(41.123456789012345678));
        assert_eq!(response.quotes["USDEUR"], dec!(0.91234567890123456789));
    }

    #[test]
    fn test_decode_error_envelope() {
        let body = r#"{
            "success": false,
            "error": {"code": 101, "type": "missing_access_key", "info": "You have not supplied an API Access Key."}
        }"#;

        let result: FxResult<AssetsResponse> = decode_body(body);
        match result {
            Err(FxError::Api { status, message }) => {
                assert_eq!(status, 101);
                assert!(message.contains("Access Key"));
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.currencies)),
        }
    }

    #[test]
    fn test_decode_malformed_body() {
        let result: FxResult<AssetsResponse> = decode_body("<html>");
        assert!(matches!(result, Err(FxError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_mock_omits_source_quote() {
        let service = MockExchangeRateService::new("USD");
        service.set_quote("USD", dec!(1));
        service.set_quote("EUR", dec!(0.9));

        let response = service.live_rates("USD,EUR").await.unwrap();
        assert_eq!(response.quotes.len(), 1);
        assert_eq!(response.quotes["USDEUR"], dec!(0.9));
        assert_eq!(service.last_currencies().as_deref(), Some("USD,EUR"));
    }
}
