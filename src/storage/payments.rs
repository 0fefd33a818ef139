use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{
    BookingId, Cents, Gateway, Payment, PaymentId, PaymentMethod, PaymentRefund, PaymentStatus,
};

use super::Repository;
use super::repository::{fmt_ts, parse_id, parse_opt_id, parse_opt_ts, parse_ts};

const PAYMENT_SELECT: &str = r#"
    SELECT id, booking_id, user_id, payment_reference, order_reference, amount_cents, currency,
           method, gateway, status, gateway_payment_id, initiated_at, completed_at, refunded_at,
           refund_amount_cents, refund_reason, description, created_at, updated_at
    FROM payments
"#;

impl Repository {
    // ========================
    // Payment operations
    // ========================

    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, booking_id, user_id, payment_reference, order_reference, amount_cents,
                                  currency, method, gateway, status, gateway_payment_id, initiated_at,
                                  completed_at, refunded_at, refund_amount_cents, refund_reason,
                                  description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.booking_id.map(|id| id.to_string()))
        .bind(payment.user_id.to_string())
        .bind(&payment.payment_reference)
        .bind(&payment.order_reference)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.method.as_str())
        .bind(payment.gateway.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.gateway_payment_id)
        .bind(payment.initiated_at.map(fmt_ts))
        .bind(payment.completed_at.map(fmt_ts))
        .bind(payment.refunded_at.map(fmt_ts))
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(&payment.description)
        .bind(fmt_ts(payment.created_at))
        .bind(fmt_ts(payment.updated_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save payment")?;
        Ok(())
    }

    pub async fn fetch_payment(conn: &mut SqliteConnection, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", PAYMENT_SELECT))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch payment")?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let mut conn = self.pool().acquire().await.context("Failed to acquire connection")?;
        Self::fetch_payment(&mut conn, id).await
    }

    pub async fn list_payments_for_booking(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!("{} WHERE booking_id = ? ORDER BY created_at", PAYMENT_SELECT))
            .bind(booking_id.to_string())
            .fetch_all(self.pool())
            .await
            .context("Failed to list payments for booking")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at", PAYMENT_SELECT))
            .fetch_all(self.pool())
            .await
            .context("Failed to list payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    /// Move an unsettled payment to `status`. Settled payments (success or refunded)
    /// are left untouched and false is returned, as for a missing payment.
    pub async fn set_payment_status(
        conn: &mut SqliteConnection,
        id: PaymentId,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let stamp = fmt_ts(at);
        let initiated_at = (status == PaymentStatus::Initiated).then(|| stamp.clone());
        let completed_at = (status == PaymentStatus::Success).then(|| stamp.clone());

        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = ?,
                gateway_payment_id = COALESCE(?, gateway_payment_id),
                initiated_at = COALESCE(?, initiated_at),
                completed_at = COALESCE(?, completed_at),
                updated_at = ?
            WHERE id = ? AND status NOT IN ('success', 'partially_refunded', 'refunded')
            "#,
        )
        .bind(status.as_str())
        .bind(gateway_payment_id)
        .bind(initiated_at)
        .bind(completed_at)
        .bind(&stamp)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update payment status")?;
        Ok(result.rows_affected() == 1)
    }

    /// Add a refund to a refundable payment when the cumulative total stays within the
    /// paid amount; the status becomes refunded or partially_refunded accordingly.
    /// Returns false without changes otherwise.
    pub async fn apply_payment_refund(
        conn: &mut SqliteConnection,
        id: PaymentId,
        amount: Cents,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let stamp = fmt_ts(at);
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                refund_amount_cents = refund_amount_cents + ?,
                status = CASE WHEN refund_amount_cents + ? >= amount_cents
                              THEN 'refunded' ELSE 'partially_refunded' END,
                refund_reason = ?,
                refunded_at = ?,
                updated_at = ?
            WHERE id = ?
              AND status IN ('success', 'partially_refunded')
              AND refund_amount_cents + ? <= amount_cents
            "#,
        )
        .bind(amount)
        .bind(amount)
        .bind(reason)
        .bind(&stamp)
        .bind(&stamp)
        .bind(id.to_string())
        .bind(amount)
        .execute(&mut *conn)
        .await
        .context("Failed to apply payment refund")?;
        Ok(result.rows_affected() == 1)
    }

    fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
        let method_str: String = row.get("method");
        let gateway_str: String = row.get("gateway");
        let status_str: String = row.get("status");

        Ok(Payment {
            id: parse_id(row, "id")?,
            booking_id: parse_opt_id(row, "booking_id")?,
            user_id: parse_id(row, "user_id")?,
            payment_reference: row.get("payment_reference"),
            order_reference: row.get("order_reference"),
            amount: row.get("amount_cents"),
            currency: row.get("currency"),
            method: PaymentMethod::from_str(&method_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment method: {}", method_str))?,
            gateway: Gateway::from_str(&gateway_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid gateway: {}", gateway_str))?,
            status: PaymentStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment status: {}", status_str))?,
            gateway_payment_id: row.get("gateway_payment_id"),
            initiated_at: parse_opt_ts(row, "initiated_at")?,
            completed_at: parse_opt_ts(row, "completed_at")?,
            refunded_at: parse_opt_ts(row, "refunded_at")?,
            refund_amount: row.get("refund_amount_cents"),
            refund_reason: row.get("refund_reason"),
            description: row.get("description"),
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
        })
    }

    // ========================
    // Refund records
    // ========================

    pub async fn insert_refund(conn: &mut SqliteConnection, refund: &PaymentRefund) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_refunds (id, payment_id, reference, amount_cents, reason, processed_by, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(refund.id.to_string())
        .bind(refund.payment_id.to_string())
        .bind(&refund.reference)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.processed_by.map(|id| id.to_string()))
        .bind(fmt_ts(refund.processed_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save refund")?;
        Ok(())
    }

    pub async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<PaymentRefund>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_id, reference, amount_cents, reason, processed_by, processed_at
            FROM payment_refunds
            WHERE payment_id = ?
            ORDER BY processed_at, rowid
            "#,
        )
        .bind(payment_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list refunds")?;

        rows.iter()
            .map(|row| {
                Ok(PaymentRefund {
                    id: parse_id(row, "id")?,
                    payment_id: parse_id(row, "payment_id")?,
                    reference: row.get("reference"),
                    amount: row.get("amount_cents"),
                    reason: row.get("reason"),
                    processed_by: parse_opt_id(row, "processed_by")?,
                    processed_at: parse_ts(row, "processed_at")?,
                })
            })
            .collect()
    }
}
