//! Persisted set of selected asset codes.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use fxtracker_common::AssetCode;
use tracing::{debug, instrument, warn};

use crate::error::FxResult;
use crate::store::{distinct_until_changed, PreferenceStore, Preferences};

/// Store key of the selected codes.
pub const SELECTED_ASSETS_KEY: &str = "fxtracker.selected-assets";

/// The user's asset selection.
pub struct SelectionStore {
    store: Arc<PreferenceStore>,
}

impl SelectionStore {
    pub fn new(store: Arc<PreferenceStore>) -> Self {
        Self { store }
    }

    /// Decode the stored selection. A missing value is empty.
    pub fn read(preferences: &Preferences) -> FxResult<BTreeSet<AssetCode>> {
        Ok(preferences
            .get_string_set(SELECTED_ASSETS_KEY)?
            .map(|codes| codes.iter().map(|c| AssetCode::new(c.as_str())).collect())
            .unwrap_or_default())
    }

    /// Stream of the selection, starting with the current value.
    ///
    /// Read failures yield an empty set.
    pub fn observe(&self) -> impl Stream<Item = BTreeSet<AssetCode>> + Send + 'static {
        let selection = self.store.data().map(|preferences| {
            Self::read(&preferences).unwrap_or_else(|e| {
                warn!(error = %e, "Stored selection is unreadable");
                BTreeSet::new()
            })
        });
        distinct_until_changed(selection)
    }

    /// Get the current selection.
    pub fn get(&self) -> FxResult<BTreeSet<AssetCode>> {
        Self::read(&self.store.snapshot())
    }

    /// Replace the whole selection.
    #[instrument(skip(self, codes), fields(count = codes.len()))]
    pub async fn save_all(&self, codes: BTreeSet<AssetCode>) -> FxResult<()> {
        let values = to_strings(&codes);
        self.store
            .edit(move |preferences| {
                preferences.set_string_set(SELECTED_ASSETS_KEY, values);
                Ok(())
            })
            .await
    }

    /// Add or remove one code.
    #[instrument(skip(self, code), fields(code = %code))]
    pub async fn set_selected(&self, code: AssetCode, selected: bool) -> FxResult<()> {
        self.store
            .edit(move |preferences| {
                let mut codes = Self::read(preferences)?;
                let changed = if selected {
                    codes.insert(code)
                } else {
                    codes.remove(&code)
                };
                if changed {
                    debug!(selected, "Selection changed");
                    preferences.set_string_set(SELECTED_ASSETS_KEY, to_strings(&codes));
                }
                Ok(())
            })
            .await
    }
}

fn to_strings(codes: &BTreeSet<AssetCode>) -> BTreeSet<String> {
    codes.iter().map(|c| c.as_str().to_string()).collect()
}
