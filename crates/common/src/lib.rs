//! Shared identifiers and value types used across the fulfillment pipeline.

pub mod money;
pub mod product;
pub mod types;

pub use money::{Currency, CurrencyError, format_amount};
pub use product::{CupType, PrintSpec, UnknownCupType};
pub use types::OrderId;
