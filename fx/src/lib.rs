//! FxTracker FX Engine
//!
//! Keeps exchange rates for a user-selected set of assets in sync with a
//! remote pricing API.
//!
//! # Features
//!
//! - Asset catalog fetched once and kept in the local preference store
//! - Persisted asset selection
//! - Rate cache that only calls the API when the store misses a requested rate
//! - Cancellable periodic autorefresh with observable state
//! - Sorted, display-ready projection with inverted rates
//!
//! # Example
//!
//! ```rust,ignore
//! use fxtracker_fx::{FxTracker, TrackerConfig};
//! use fxtracker_common::AssetCode;
//!
//! let tracker = FxTracker::open(TrackerConfig::from_env()).await?;
//!
//! tracker.set_selected(&[AssetCode::new("EUR")], true).await?;
//!
//! for rate in tracker.selected_rates().await? {
//!     println!("{}", rate.display_line());
//! }
//! ```

pub mod api;
pub mod autorefresh;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod projection;
pub mod provider;
pub mod selection;
pub mod store;

pub use api::{ExchangeRateService, HttpExchangeRateService};
pub use autorefresh::{AutorefreshDriver, AutorefreshSelectedRates, DriverState, RefreshState};
pub use cache::{RateCache, WritePolicy};
pub use catalog::AssetCatalog;
pub use config::{ApiConfig, TrackerConfig};
pub use engine::FxTracker;
pub use error::{FailureKind, FxError, FxResult};
pub use projection::{project, RateProjection};
pub use provider::{RateSource, RemoteRateSource};
pub use selection::SelectionStore;
pub use store::{FileBackend, MemoryBackend, PreferenceBackend, PreferenceStore, Preferences};
