//! FxTracker Common Types
//!
//! This crate contains the shared domain types of FxTracker: asset codes,
//! catalog assets, persisted and resolved exchange rates, and the rate
//! inversion and display helpers.

pub mod identifiers;
pub mod monetary;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use time::*;
