use thiserror::Error;

use crate::OrderId;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// No order exists with this id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An order with this id already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// Another order already owns this external payment reference.
    #[error("Payment reference {field} is already attached to another order")]
    DuplicateReference { field: &'static str, value: String },

    /// A stored row could not be mapped onto the order model.
    #[error("Invalid stored order {order_id}: {reason}")]
    InvalidRow { order_id: String, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl OrderStoreError {
    /// Returns true when retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrderStoreError::Database(_))
    }

    /// Returns true for unique-key conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OrderStoreError::DuplicateOrder(_) | OrderStoreError::DuplicateReference { .. }
        )
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
