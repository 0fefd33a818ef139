use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{Cents, TransactionType, UserId, Wallet, WalletId, WalletTransaction};

use super::Repository;
use super::repository::{fmt_ts, parse_id, parse_opt_id, parse_ts};

/// Balance and version of a wallet right after a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub balance: Cents,
    pub version: i64,
}

const WALLET_SELECT: &str = r#"
    SELECT id, user_id, balance_cents, currency, version, is_active, created_at, updated_at
    FROM wallets
"#;

const TRANSACTION_SELECT: &str = r#"
    SELECT id, wallet_id, sequence, reference, amount_cents, transaction_type,
           balance_before_cents, balance_after_cents, description, payment_id, created_at
    FROM wallet_transactions
"#;

impl Repository {
    // ========================
    // Wallet operations
    // ========================

    /// Insert the wallet unless the user already has one. Returns true when inserted.
    pub async fn insert_wallet_if_absent(conn: &mut SqliteConnection, wallet: &Wallet) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance_cents, currency, version, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(wallet.user_id.to_string())
        .bind(wallet.balance)
        .bind(&wallet.currency)
        .bind(wallet.version)
        .bind(wallet.is_active)
        .bind(fmt_ts(wallet.created_at))
        .bind(fmt_ts(wallet.updated_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save wallet")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn fetch_wallet(conn: &mut SqliteConnection, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", WALLET_SELECT))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch wallet")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    pub async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let mut conn = self.pool().acquire().await.context("Failed to acquire connection")?;
        Self::fetch_wallet(&mut conn, id).await
    }

    pub async fn fetch_wallet_by_user(
        conn: &mut SqliteConnection,
        user_id: UserId,
    ) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!("{} WHERE user_id = ?", WALLET_SELECT))
            .bind(user_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch wallet by user")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    pub async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let mut conn = self.pool().acquire().await.context("Failed to acquire connection")?;
        Self::fetch_wallet_by_user(&mut conn, user_id).await
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at", WALLET_SELECT))
            .fetch_all(self.pool())
            .await
            .context("Failed to list wallets")?;

        rows.iter().map(Self::row_to_wallet).collect()
    }

    pub async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE wallets SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(fmt_ts(Utc::now()))
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .context("Failed to update wallet state")?;
        Ok(result.rows_affected() == 1)
    }

    /// Add `amount` to an active wallet. None when the wallet is missing, inactive
    /// or would end up above `max_balance`; nothing is changed in that case.
    pub async fn credit_wallet(
        conn: &mut SqliteConnection,
        id: WalletId,
        amount: Cents,
        max_balance: Cents,
        at: DateTime<Utc>,
    ) -> Result<Option<BalanceChange>> {
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET balance_cents = balance_cents + ?, version = version + 1, updated_at = ?
            WHERE id = ? AND is_active = 1 AND balance_cents <= ?
            RETURNING balance_cents, version
            "#,
        )
        .bind(amount)
        .bind(fmt_ts(at))
        .bind(id.to_string())
        .bind(max_balance.saturating_sub(amount))
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to credit wallet")?;

        Ok(row.map(|row| BalanceChange {
            balance: row.get("balance_cents"),
            version: row.get("version"),
        }))
    }

    /// Check-and-decrement in a single statement. None when the wallet is missing,
    /// inactive or holds less than `amount`; nothing is changed in that case.
    pub async fn debit_wallet(
        conn: &mut SqliteConnection,
        id: WalletId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<Option<BalanceChange>> {
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET balance_cents = balance_cents - ?, version = version + 1, updated_at = ?
            WHERE id = ? AND is_active = 1 AND balance_cents >= ?
            RETURNING balance_cents, version
            "#,
        )
        .bind(amount)
        .bind(fmt_ts(at))
        .bind(id.to_string())
        .bind(amount)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to debit wallet")?;

        Ok(row.map(|row| BalanceChange {
            balance: row.get("balance_cents"),
            version: row.get("version"),
        }))
    }

    fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
        Ok(Wallet {
            id: parse_id(row, "id")?,
            user_id: parse_id(row, "user_id")?,
            balance: row.get("balance_cents"),
            currency: row.get("currency"),
            version: row.get("version"),
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
        })
    }

    // ========================
    // Wallet transaction log
    // ========================

    pub async fn insert_wallet_transaction(
        conn: &mut SqliteConnection,
        tx: &WalletTransaction,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (id, wallet_id, sequence, reference, amount_cents, transaction_type,
                                             balance_before_cents, balance_after_cents, description, payment_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.id.to_string())
        .bind(tx.wallet_id.to_string())
        .bind(tx.sequence)
        .bind(&tx.reference)
        .bind(tx.amount)
        .bind(tx.transaction_type.as_str())
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(&tx.description)
        .bind(tx.reference_payment.map(|id| id.to_string()))
        .bind(fmt_ts(tx.created_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save wallet transaction")?;
        Ok(())
    }

    /// Most recent transactions first.
    pub async fn list_wallet_transactions(
        &self,
        wallet_id: WalletId,
        limit: Option<usize>,
    ) -> Result<Vec<WalletTransaction>> {
        let mut query = format!("{} WHERE wallet_id = ? ORDER BY sequence DESC", TRANSACTION_SELECT);
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let rows = sqlx::query(&query)
            .bind(wallet_id.to_string())
            .fetch_all(self.pool())
            .await
            .context("Failed to list wallet transactions")?;

        rows.iter().map(Self::row_to_wallet_transaction).collect()
    }

    /// The full log of a wallet in sequence order, for replay.
    pub async fn wallet_ledger(&self, wallet_id: WalletId) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query(&format!("{} WHERE wallet_id = ? ORDER BY sequence", TRANSACTION_SELECT))
            .bind(wallet_id.to_string())
            .fetch_all(self.pool())
            .await
            .context("Failed to load wallet ledger")?;

        rows.iter().map(Self::row_to_wallet_transaction).collect()
    }

    fn row_to_wallet_transaction(row: &SqliteRow) -> Result<WalletTransaction> {
        let type_str: String = row.get("transaction_type");
        Ok(WalletTransaction {
            id: parse_id(row, "id")?,
            sequence: row.get("sequence"),
            reference: row.get("reference"),
            wallet_id: parse_id(row, "wallet_id")?,
            amount: row.get("amount_cents"),
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
            balance_before: row.get("balance_before_cents"),
            balance_after: row.get("balance_after_cents"),
            description: row.get("description"),
            reference_payment: parse_opt_id(row, "payment_id")?,
            created_at: parse_ts(row, "created_at")?,
        })
    }
}
