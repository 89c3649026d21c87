use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ArtifactClaim, CupType, Currency, Order, OrderId, OrderStatus, OrderStoreError, Result,
    store::{ClaimOptions, OrderStore, PaymentDetails},
};

const ORDER_COLUMNS: &str = "id, status, cup_type, currency, amount_minor, artwork_ref, \
     artifact_ref, artifact_claim, artifact_claimed_at, notification_sent, \
     notification_sent_at, payment_intent_ref, checkout_session_ref, created_at, paid_at, \
     updated_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let id: String = row.try_get("id")?;
        let invalid = |reason: String| OrderStoreError::InvalidRow {
            order_id: id.clone(),
            reason,
        };

        let status: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status).ok_or_else(|| invalid(format!("status {status}")))?;
        let cup_type: String = row.try_get("cup_type")?;
        let cup_type = cup_type
            .parse::<CupType>()
            .map_err(|e| invalid(e.to_string()))?;
        let currency = row
            .try_get::<Option<String>, _>("currency")?
            .map(|c| Currency::parse(&c))
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        let claim_token: Option<Uuid> = row.try_get("artifact_claim")?;
        let claimed_at: Option<DateTime<Utc>> = row.try_get("artifact_claimed_at")?;
        let artifact_claim = match (claim_token, claimed_at) {
            (Some(token), Some(claimed_at)) => Some(ArtifactClaim { token, claimed_at }),
            _ => None,
        };

        Ok(Order {
            id: OrderId::parse(&id).ok_or_else(|| invalid("malformed id".to_string()))?,
            status,
            cup_type,
            currency,
            amount_minor: row.try_get("amount_minor")?,
            artwork_ref: row.try_get("artwork_ref")?,
            artifact_ref: row.try_get("artifact_ref")?,
            artifact_claim,
            notification_sent: row.try_get("notification_sent")?,
            notification_sent_at: row.try_get("notification_sent_at")?,
            payment_intent_ref: row.try_get("payment_intent_ref")?,
            checkout_session_ref: row.try_get("checkout_session_ref")?,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Maps unique-constraint violations onto the store's conflict errors.
    fn map_conflict(e: sqlx::Error, order: &Order) -> OrderStoreError {
        if let sqlx::Error::Database(ref db_err) = e {
            if let Some(constraint) = db_err.constraint() {
                tracing::debug!(order_id = %order.id, constraint, "insert hit unique constraint");
            }
            match db_err.constraint() {
                Some("orders_pkey") => return OrderStoreError::DuplicateOrder(order.id.clone()),
                Some("orders_payment_intent_ref_key") => {
                    return OrderStoreError::DuplicateReference {
                        field: "payment_intent_ref",
                        value: order.payment_intent_ref.clone().unwrap_or_default(),
                    };
                }
                Some("orders_checkout_session_ref_key") => {
                    return OrderStoreError::DuplicateReference {
                        field: "checkout_session_ref",
                        value: order.checkout_session_ref.clone().unwrap_or_default(),
                    };
                }
                _ => {}
            }
        }
        OrderStoreError::Database(e)
    }

    async fn find_by(&self, column: &'static str, reference: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    /// Distinguishes "precondition failed" from "order missing" after a
    /// conditional update touched no rows.
    async fn ensure_exists(&self, id: &OrderId) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(OrderStoreError::NotFound(id.clone()))
        }
    }

    async fn conditional(&self, id: &OrderId, rows_affected: u64) -> Result<bool> {
        if rows_affected > 0 {
            return Ok(true);
        }
        self.ensure_exists(id).await?;
        Ok(false)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, status, cup_type, currency, amount_minor, artwork_ref,
                artifact_ref, notification_sent, notification_sent_at, payment_intent_ref,
                checkout_session_ref, created_at, paid_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.status.as_str())
        .bind(order.cup_type.as_str())
        .bind(order.currency.as_ref().map(|c| c.code().to_string()))
        .bind(order.amount_minor)
        .bind(&order.artwork_ref)
        .bind(&order.artifact_ref)
        .bind(order.notification_sent)
        .bind(order.notification_sent_at)
        .bind(&order.payment_intent_ref)
        .bind(&order.checkout_session_ref)
        .bind(order.created_at)
        .bind(order.paid_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_conflict(e, &order))?;

        Ok(())
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>> {
        self.find_by("id", id.as_str()).await
    }

    async fn find_by_payment_intent(&self, reference: &str) -> Result<Option<Order>> {
        self.find_by("payment_intent_ref", reference).await
    }

    async fn find_by_checkout_session(&self, reference: &str) -> Result<Option<Order>> {
        self.find_by("checkout_session_ref", reference).await
    }

    async fn attach_payment_refs(
        &self,
        id: &OrderId,
        payment_intent_ref: Option<&str>,
        checkout_session_ref: Option<&str>,
    ) -> Result<Order> {
        let sql = format!(
            r#"
            UPDATE orders
            SET payment_intent_ref = COALESCE(payment_intent_ref, $2),
                checkout_session_ref = COALESCE(checkout_session_ref, $3),
                updated_at = CASE
                    WHEN (payment_intent_ref IS NULL AND $2::TEXT IS NOT NULL)
                      OR (checkout_session_ref IS NULL AND $3::TEXT IS NOT NULL)
                    THEN NOW() ELSE updated_at END
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(payment_intent_ref)
            .bind(checkout_session_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                let probe = Order::pending(id.clone(), CupType::default());
                let probe = Order {
                    payment_intent_ref: payment_intent_ref.map(str::to_string),
                    checkout_session_ref: checkout_session_ref.map(str::to_string),
                    ..probe
                };
                Self::map_conflict(e, &probe)
            })?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(OrderStoreError::NotFound(id.clone())),
        }
    }

    async fn mark_paid(&self, id: &OrderId, payment: PaymentDetails) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid',
                amount_minor = COALESCE($2, amount_minor),
                currency = COALESCE($3, currency),
                paid_at = COALESCE($4, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_str())
        .bind(payment.amount_minor)
        .bind(payment.currency.as_ref().map(|c| c.code().to_string()))
        .bind(payment.paid_at)
        .execute(&self.pool)
        .await?;

        self.conditional(id, result.rows_affected()).await
    }

    async fn set_artwork_ref(&self, id: &OrderId, artwork_ref: &str) -> Result<String> {
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET artwork_ref = COALESCE(artwork_ref, $2),
                updated_at = CASE WHEN artwork_ref IS NULL THEN NOW() ELSE updated_at END
            WHERE id = $1
            RETURNING artwork_ref
            "#,
        )
        .bind(id.as_str())
        .bind(artwork_ref)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        stored.ok_or_else(|| OrderStoreError::NotFound(id.clone()))
    }

    async fn try_claim_artifact(
        &self,
        id: &OrderId,
        claim: ArtifactClaim,
        options: ClaimOptions,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET artifact_claim = $2, artifact_claimed_at = $3, updated_at = NOW()
            WHERE id = $1
              AND ($5 OR artifact_ref IS NULL)
              AND (artifact_claim IS NULL OR artifact_claimed_at < $4)
            "#,
        )
        .bind(id.as_str())
        .bind(claim.token)
        .bind(claim.claimed_at)
        .bind(options.stale_before)
        .bind(options.force)
        .execute(&self.pool)
        .await?;

        self.conditional(id, result.rows_affected()).await
    }

    async fn complete_artifact(
        &self,
        id: &OrderId,
        token: Uuid,
        artifact_ref: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET artifact_ref = $3, artifact_claim = NULL, artifact_claimed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND artifact_claim = $2
            "#,
        )
        .bind(id.as_str())
        .bind(token)
        .bind(artifact_ref)
        .execute(&self.pool)
        .await?;

        let completed = self.conditional(id, result.rows_affected()).await?;
        if !completed {
            tracing::debug!(order_id = %id, "artifact completion rejected; claim no longer held");
        }
        Ok(completed)
    }

    async fn release_claim(&self, id: &OrderId, token: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET artifact_claim = NULL, artifact_claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND artifact_claim = $2
            "#,
        )
        .bind(id.as_str())
        .bind(token)
        .execute(&self.pool)
        .await?;

        self.conditional(id, result.rows_affected()).await
    }

    async fn mark_notification_sent(&self, id: &OrderId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET notification_sent = TRUE, notification_sent_at = $2, updated_at = NOW()
            WHERE id = $1 AND artifact_ref IS NOT NULL
            "#,
        )
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.conditional(id, result.rows_affected()).await
    }

    async fn list_unfulfilled(&self, limit: usize) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = 'paid' AND artwork_ref IS NOT NULL
              AND (artifact_ref IS NULL OR notification_sent = FALSE)
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}
