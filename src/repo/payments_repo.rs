use crate::domain::payment::{Payment, PendingBookingDetails};
use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// The stored payment is already linked to a different booking.
#[derive(Debug, thiserror::Error)]
#[error("payment {payment_id} is already linked to booking {existing}")]
pub struct BookingAlreadyLinked {
    pub payment_id: Uuid,
    pub existing: Uuid,
}

#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<()>;

    /// Fails with [`BookingAlreadyLinked`] instead of replacing a booking id
    /// that is already set.
    async fn update(&self, payment: &Payment) -> Result<()>;

    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>>;

    /// Resolves a provider reference the caller got back: a session/order id
    /// first, then a charge/intent id.
    async fn find_by_provider_reference(&self, reference: &str) -> Result<Option<Payment>>;

    async fn list_by_payer(&self, payer_id: Uuid) -> Result<Vec<Payment>>;

    /// COMPLETED payments whose deferred booking was never created.
    async fn list_compensation_gaps(&self, limit: i64) -> Result<Vec<Payment>>;
}

#[derive(Clone)]
pub struct PgPaymentsRepo {
    pub pool: PgPool,
}

const COLUMNS: &str = r#"
    payment_id, transaction_ref, amount, currency, fee, net_amount,
    payer_id, trip_id, manager_id, method, status,
    provider_charge_ref, provider_session_ref, provider_transaction_ref,
    booking_id, pending_booking_details, failure_reason, refunded_amount,
    created_at, updated_at, paid_at, refunded_at, cancelled_at
"#;

fn from_row(row: PgRow) -> Result<Payment> {
    let method: String = row.get("method");
    let status: String = row.get("status");
    let pending: Option<serde_json::Value> = row.get("pending_booking_details");
    let pending_booking_details = pending
        .map(serde_json::from_value::<PendingBookingDetails>)
        .transpose()
        .context("unreadable pending_booking_details")?;

    Ok(Payment {
        id: row.get("payment_id"),
        transaction_ref: row.get("transaction_ref"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        fee: row.get("fee"),
        net_amount: row.get("net_amount"),
        payer_id: row.get("payer_id"),
        trip_id: row.get("trip_id"),
        manager_id: row.get("manager_id"),
        method: method.parse()?,
        status: status.parse()?,
        provider_charge_ref: row.get("provider_charge_ref"),
        provider_session_ref: row.get("provider_session_ref"),
        provider_transaction_ref: row.get("provider_transaction_ref"),
        booking_id: row.get("booking_id"),
        pending_booking_details,
        failure_reason: row.get("failure_reason"),
        refunded_amount: row.get("refunded_amount"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        paid_at: row.get("paid_at"),
        refunded_at: row.get("refunded_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}

fn pending_json(payment: &Payment) -> Result<Option<serde_json::Value>> {
    payment
        .pending_booking_details
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Into::into)
}

impl PgPaymentsRepo {
    async fn find_one(&self, column: &str, reference: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {COLUMNS} FROM payments WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(from_row).transpose()
    }
}

#[async_trait::async_trait]
impl PaymentStore for PgPaymentsRepo {
    async fn insert(&self, p: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, transaction_ref, amount, currency, fee, net_amount,
                payer_id, trip_id, manager_id, method, status,
                provider_charge_ref, provider_session_ref, provider_transaction_ref,
                booking_id, pending_booking_details, failure_reason, refunded_amount,
                created_at, updated_at, paid_at, refunded_at, cancelled_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14,
                $15, $16, $17, $18,
                $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(p.id)
        .bind(&p.transaction_ref)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(p.fee)
        .bind(p.net_amount)
        .bind(p.payer_id)
        .bind(p.trip_id)
        .bind(p.manager_id)
        .bind(p.method.as_str())
        .bind(p.status.as_str())
        .bind(&p.provider_charge_ref)
        .bind(&p.provider_session_ref)
        .bind(&p.provider_transaction_ref)
        .bind(p.booking_id)
        .bind(pending_json(p)?)
        .bind(&p.failure_reason)
        .bind(p.refunded_amount)
        .bind(p.created_at)
        .bind(p.updated_at)
        .bind(p.paid_at)
        .bind(p.refunded_at)
        .bind(p.cancelled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, p: &Payment) -> Result<()> {
        // amount, fee and net_amount are immutable after insert
        let res = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                provider_charge_ref = $3,
                provider_session_ref = $4,
                provider_transaction_ref = $5,
                booking_id = $6,
                pending_booking_details = $7,
                failure_reason = $8,
                refunded_amount = $9,
                updated_at = $10,
                paid_at = $11,
                refunded_at = $12,
                cancelled_at = $13
            WHERE payment_id = $1
              AND (booking_id IS NULL OR booking_id = $6)
            "#,
        )
        .bind(p.id)
        .bind(p.status.as_str())
        .bind(&p.provider_charge_ref)
        .bind(&p.provider_session_ref)
        .bind(&p.provider_transaction_ref)
        .bind(p.booking_id)
        .bind(pending_json(p)?)
        .bind(&p.failure_reason)
        .bind(p.refunded_amount)
        .bind(p.updated_at)
        .bind(p.paid_at)
        .bind(p.refunded_at)
        .bind(p.cancelled_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            let existing: Option<Option<Uuid>> =
                sqlx::query_scalar("SELECT booking_id FROM payments WHERE payment_id = $1")
                    .bind(p.id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match existing {
                Some(Some(existing)) => Err(BookingAlreadyLinked {
                    payment_id: p.id,
                    existing,
                }
                .into()),
                _ => Err(anyhow::anyhow!("payment {} vanished before update", p.id)),
            };
        }
        Ok(())
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let sql = format!("SELECT {COLUMNS} FROM payments WHERE payment_id = $1");
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(from_row).transpose()
    }

    async fn find_by_provider_reference(&self, reference: &str) -> Result<Option<Payment>> {
        if let Some(found) = self.find_one("provider_session_ref", reference).await? {
            return Ok(Some(found));
        }
        self.find_one("provider_charge_ref", reference).await
    }

    async fn list_by_payer(&self, payer_id: Uuid) -> Result<Vec<Payment>> {
        let sql = format!("SELECT {COLUMNS} FROM payments WHERE payer_id = $1 ORDER BY created_at DESC");
        let rows = sqlx::query(&sql)
            .bind(payer_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn list_compensation_gaps(&self, limit: i64) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM payments
            WHERE status = 'COMPLETED' AND booking_id IS NULL AND pending_booking_details IS NOT NULL
            ORDER BY paid_at ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(from_row).collect()
    }
}
