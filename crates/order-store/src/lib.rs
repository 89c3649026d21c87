//! Durable storage for orders and their fulfillment progress.
//!
//! Fulfillment state is never stored as a column of its own: it is inferred
//! from `status`, `artwork_ref`, `artifact_ref` and the claim slot. All
//! mutations that decide fulfillment go through conditional updates on the
//! [`OrderStore`] trait so that concurrent handlers cannot both win.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod state;
pub mod store;

pub use common::{Currency, CupType, OrderId};
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{ArtifactClaim, Order, OrderStatus};
pub use postgres::PostgresOrderStore;
pub use state::FulfillmentState;
pub use store::{ClaimOptions, OrderStore, OrderStoreExt, PaymentDetails};
