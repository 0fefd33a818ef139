use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::MarketplaceService;
use crate::domain::{
    Booking, Payment, Wallet, WalletId, WalletTransaction, format_cents,
};
use crate::storage::BookingFilter;

/// Full dump of bookings, wallets and payments
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub bookings: Vec<Booking>,
    pub wallets: Vec<Wallet>,
    pub wallet_transactions: Vec<WalletTransaction>,
    pub payments: Vec<Payment>,
}

/// Writes marketplace data out as CSV or JSON
pub struct Exporter<'a> {
    service: &'a MarketplaceService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a MarketplaceService) -> Self {
        Self { service }
    }

    /// One row per booking with its derived totals.
    pub async fn export_bookings_csv<W: Write>(&self, writer: W, filter: &BookingFilter) -> Result<usize> {
        let bookings = self.service.list_bookings(filter).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "booking_number",
            "status",
            "payment_status",
            "scheduled_date",
            "scheduled_time",
            "city",
            "quoted_price",
            "total_amount",
            "advance_paid",
            "balance_amount",
            "customer_id",
            "provider_id",
            "created_at",
        ])?;

        for booking in &bookings {
            csv_writer.write_record([
                booking.booking_number.clone(),
                booking.status.to_string(),
                booking.payment_status.as_str().to_string(),
                booking.schedule.date.format("%Y-%m-%d").to_string(),
                booking.schedule.time.format("%H:%M").to_string(),
                booking.location.city.clone(),
                format_cents(booking.quoted_price),
                format_cents(booking.total_amount()),
                format_cents(booking.advance_paid),
                format_cents(booking.balance_amount()),
                booking.customer_id.to_string(),
                booking.provider_id.to_string(),
                booking.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(bookings.len())
    }

    /// A wallet's full log in sequence order, with running balances.
    pub async fn export_wallet_statement_csv<W: Write>(
        &self,
        writer: W,
        wallet_id: WalletId,
    ) -> Result<usize> {
        let wallet = self.service.get_wallet(wallet_id).await?;
        let ledger = self.service.repository().wallet_ledger(wallet.id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "sequence",
            "reference",
            "created_at",
            "type",
            "amount",
            "balance_before",
            "balance_after",
            "description",
            "payment_id",
        ])?;

        for tx in &ledger {
            csv_writer.write_record([
                tx.sequence.to_string(),
                tx.reference.clone(),
                tx.created_at.to_rfc3339(),
                tx.transaction_type.to_string(),
                format_cents(tx.amount),
                format_cents(tx.balance_before),
                format_cents(tx.balance_after),
                tx.description.clone(),
                tx.reference_payment
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(ledger.len())
    }

    pub async fn export_payments_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let payments = self.service.list_payments().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "payment_reference",
            "order_reference",
            "status",
            "method",
            "gateway",
            "amount",
            "refund_amount",
            "currency",
            "booking_id",
            "created_at",
        ])?;

        for payment in &payments {
            csv_writer.write_record([
                payment.payment_reference.clone(),
                payment.order_reference.clone(),
                payment.status.to_string(),
                payment.method.as_str().to_string(),
                payment.gateway.as_str().to_string(),
                format_cents(payment.amount),
                format_cents(payment.refund_amount),
                payment.currency.clone(),
                payment
                    .booking_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                payment.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(payments.len())
    }

    /// Everything, including inactive bookings, as pretty JSON.
    pub async fn export_full_json<W: Write>(&self, writer: W) -> Result<DatabaseSnapshot> {
        let filter = BookingFilter {
            include_inactive: true,
            ..Default::default()
        };
        let bookings = self.service.list_bookings(&filter).await?;
        let wallets = self.service.list_wallets().await?;
        let mut wallet_transactions = Vec::new();
        for wallet in &wallets {
            wallet_transactions.extend(self.service.repository().wallet_ledger(wallet.id).await?);
        }
        let payments = self.service.list_payments().await?;

        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            bookings,
            wallets,
            wallet_transactions,
            payments,
        };

        serde_json::to_writer_pretty(writer, &snapshot)?;
        Ok(snapshot)
    }
}
