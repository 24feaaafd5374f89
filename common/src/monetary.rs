//! Exchange rate types.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identifiers::{Asset, AssetCode};

/// Fractional digits kept by [`invert`].
pub const INVERTED_SCALE: u32 = 16;

/// Fractional digits shown by [`format_rate`].
pub const DISPLAY_SCALE: u32 = 4;

/// Persisted exchange rate: 1 unit of `base_asset` = `rate` units of
/// `reference_asset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxRateEntity {
    pub base_asset: AssetCode,
    pub reference_asset: AssetCode,
    /// Serialized as a string so no precision is lost in storage.
    #[serde(with = "rust_decimal::serde::str")]
    pub rate: Decimal,
}

impl FxRateEntity {
    /// Create a new rate entity.
    pub fn new(
        base_asset: impl Into<AssetCode>,
        reference_asset: impl Into<AssetCode>,
        rate: Decimal,
    ) -> Self {
        Self {
            base_asset: base_asset.into(),
            reference_asset: reference_asset.into(),
            rate,
        }
    }

    /// The rate of an asset against itself.
    pub fn identity(code: AssetCode) -> Self {
        Self {
            base_asset: code.clone(),
            reference_asset: code,
            rate: Decimal::ONE,
        }
    }

    /// Check the `rate > 0` invariant.
    pub fn is_valid(&self) -> bool {
        self.rate > Decimal::ZERO
    }

    pub fn is_identity(&self) -> bool {
        self.base_asset == self.reference_asset
    }
}

impl fmt::Display for FxRateEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "1 {} = {} {}",
            self.base_asset, self.rate, self.reference_asset
        )
    }
}

/// Exchange rate resolved against the asset catalog, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxRate {
    pub base_asset: Asset,
    pub reference_asset: Asset,
    pub rate: Decimal,
}

impl FxRate {
    /// Create a new resolved rate.
    pub fn new(base_asset: Asset, reference_asset: Asset, rate: Decimal) -> Self {
        Self {
            base_asset,
            reference_asset,
            rate,
        }
    }

    /// Units of base asset per 1 unit of reference asset.
    ///
    /// `None` when the rate is zero.
    pub fn inverted(&self) -> Option<Decimal> {
        invert(self.rate)
    }

    /// Single display line: reference asset, its name and the inverted rate
    /// expressed in the base asset.
    pub fn display_line(&self) -> String {
        let inverted = self
            .inverted()
            .map(format_rate)
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{:<6} {:<32} {:>20} {}",
            self.reference_asset.code, self.reference_asset.name, inverted, self.base_asset.code
        )
    }
}

impl fmt::Display for FxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "1 {} = {} {}",
            self.base_asset.code, self.rate, self.reference_asset.code
        )
    }
}

/// Compute `1 / rate`, rounded half-to-even to [`INVERTED_SCALE`] digits.
pub fn invert(rate: Decimal) -> Option<Decimal> {
    Decimal::ONE
        .checked_div(rate)
        .map(|v| v.round_dp_with_strategy(INVERTED_SCALE, RoundingStrategy::MidpointNearestEven))
}

/// Render a rate with [`DISPLAY_SCALE`] fractional digits and `,` grouping
/// of the integer part.
pub fn format_rate(value: Decimal) -> String {
    let mut rounded =
        value.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(DISPLAY_SCALE);

    let text = rounded.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(text.len() + int_part.len() / 3 + 1);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        grouped.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    grouped
}
