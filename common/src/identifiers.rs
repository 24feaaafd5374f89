//! Asset identifiers and catalog entries.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Short code identifying a currency or other tradable asset (e.g. `USD`).
///
/// Codes are opaque: no case folding or validation is applied, and ordering
/// is plain ordinal string ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetCode(String);

impl AssetCode {
    /// Create a new asset code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AssetCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for AssetCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AssetCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A known, nameable asset from the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    /// Asset code.
    pub code: AssetCode,
    /// Human readable name (e.g. "United States Dollar").
    pub name: String,
}

impl Asset {
    /// Create a new asset.
    pub fn new(code: impl Into<AssetCode>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// Check whether the code or name contains `query`, ignoring case.
    ///
    /// An empty query matches every asset.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.code.as_str().to_lowercase().contains(&query)
            || self.name.to_lowercase().contains(&query)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.name)
    }
}

/// An asset together with its selection flag. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableAsset {
    pub asset: Asset,
    pub is_selected: bool,
}

impl SelectableAsset {
    pub fn new(asset: Asset, is_selected: bool) -> Self {
        Self { asset, is_selected }
    }
}
