//! Common types used across the market data client library.

pub mod common;
pub mod serde_helpers;

pub use common::*;
