//! Terminal rendering of assets, rates and refresh states.

use fxtracker_common::{format_local, FxRate, SelectableAsset};
use fxtracker_fx::{DriverState, RefreshState};

/// One line per asset, selected assets marked with `*`.
pub fn render_assets(assets: &[SelectableAsset]) -> Vec<String> {
    assets
        .iter()
        .map(|entry| {
            let marker = if entry.is_selected { '*' } else { ' ' };
            format!("{} {:<6} {}", marker, entry.asset.code, entry.asset.name)
        })
        .collect()
}

/// One line per rate, or a hint when nothing can be shown.
pub fn render_rates(rates: &[FxRate]) -> Vec<String> {
    if rates.is_empty() {
        return vec!["No rates to show. Select assets with `fxtracker select CODE...`.".to_string()];
    }
    rates.iter().map(FxRate::display_line).collect()
}

/// Status line for a driver state.
pub fn render_state(state: &DriverState) -> String {
    match &state.state {
        RefreshState::Stale => format!("[run {}] waiting for first refresh", state.generation),
        RefreshState::Running { refreshed_at } => format!(
            "[run {}] refreshed at {}",
            state.generation,
            format_local(*refreshed_at)
        ),
        RefreshState::Failed { error } => format!(
            "[run {}] refresh failed ({}): {}",
            state.generation,
            error.error_code(),
            error
        ),
    }
}
