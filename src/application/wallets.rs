use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::domain::{
    Cents, PaymentId, TransactionType, UserId, Wallet, WalletId, WalletTransaction, format_cents,
};
use crate::storage::{BalanceChange, Repository};

use super::service::require_positive;
use super::{AppError, MarketplaceService};

/// Result of a deposit or withdrawal
#[derive(Debug, Clone, Serialize)]
pub struct WalletMovement {
    pub wallet: Wallet,
    pub transaction: WalletTransaction,
}

impl MarketplaceService {
    // ========================
    // Wallet operations
    // ========================

    /// Return the user's wallet, creating an empty one in the default currency.
    pub async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet, AppError> {
        self.get_user(user_id).await?;
        let mut conn = self
            .repo
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        let wallet = Self::ensure_wallet(&mut conn, user_id, &self.default_currency).await?;
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet, AppError> {
        self.repo
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))
    }

    pub async fn wallet_for_user(&self, user_id: UserId) -> Result<Wallet, AppError> {
        self.repo
            .get_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", user_id)))
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>, AppError> {
        Ok(self.repo.list_wallets().await?)
    }

    pub async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Cents,
        reason: &str,
    ) -> Result<WalletMovement, AppError> {
        self.move_funds(wallet_id, TransactionType::Credit, amount, reason)
            .await
    }

    /// Fails with `InsufficientFunds` and leaves the balance untouched when
    /// `amount` exceeds it.
    pub async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Cents,
        reason: &str,
    ) -> Result<WalletMovement, AppError> {
        self.move_funds(wallet_id, TransactionType::Debit, amount, reason)
            .await
    }

    /// Most recent first.
    pub async fn wallet_transactions(
        &self,
        wallet_id: WalletId,
        limit: Option<usize>,
    ) -> Result<Vec<WalletTransaction>, AppError> {
        self.get_wallet(wallet_id).await?;
        Ok(self.repo.list_wallet_transactions(wallet_id, limit).await?)
    }

    /// Moving money out of a wallet: its owner or an admin.
    pub async fn authorize_wallet_access(
        &self,
        actor: UserId,
        wallet_id: WalletId,
    ) -> Result<(), AppError> {
        let wallet = self.get_wallet(wallet_id).await?;
        if wallet.user_id == actor || self.get_user(actor).await?.is_admin() {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "user {} may not move funds out of wallet {}",
            actor, wallet_id
        )))
    }

    /// Freeze or unfreeze a wallet. Inactive wallets reject every movement.
    pub async fn set_wallet_active(&self, wallet_id: WalletId, active: bool) -> Result<Wallet, AppError> {
        if !self.repo.set_wallet_active(wallet_id, active).await? {
            return Err(AppError::WalletNotFound(wallet_id.to_string()));
        }
        info!(wallet_id = %wallet_id, active, "wallet state changed");
        self.get_wallet(wallet_id).await
    }

    async fn move_funds(
        &self,
        wallet_id: WalletId,
        kind: TransactionType,
        amount: Cents,
        reason: &str,
    ) -> Result<WalletMovement, AppError> {
        require_positive(amount)?;

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        let transaction =
            Self::record_movement(&mut *tx, wallet_id, kind, amount, reason, None, now).await?;
        let wallet = Repository::fetch_wallet(&mut *tx, wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
        tx.commit().await.context("Failed to commit wallet movement")?;

        info!(
            wallet_id = %wallet_id,
            kind = %kind,
            amount,
            balance = wallet.balance,
            reference = %transaction.reference,
            "wallet balance changed"
        );
        Ok(WalletMovement {
            wallet,
            transaction,
        })
    }

    // Transaction building blocks shared with payments. The balance update is the
    // first statement in each unit, so the write lock is held before anything is read.

    pub(super) async fn ensure_wallet(
        conn: &mut SqliteConnection,
        user_id: UserId,
        currency: &str,
    ) -> Result<Wallet, AppError> {
        let wallet = Wallet::new(user_id, currency.to_string());
        if Repository::insert_wallet_if_absent(conn, &wallet).await? {
            info!(wallet_id = %wallet.id, user_id = %user_id, "wallet created");
        }
        Repository::fetch_wallet_by_user(conn, user_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", user_id)))
    }

    /// Apply the balance change and append the matching log row.
    pub(super) async fn record_movement(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        kind: TransactionType,
        amount: Cents,
        description: &str,
        payment: Option<PaymentId>,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction, AppError> {
        let change = Self::change_balance(conn, wallet_id, kind, amount, at).await?;
        Self::append_ledger_entry(
            conn,
            wallet_id,
            kind,
            amount,
            change.balance,
            change.version,
            description,
            payment,
            at,
        )
        .await
    }

    pub(super) async fn change_balance(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        kind: TransactionType,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<BalanceChange, AppError> {
        let change = match kind {
            TransactionType::Credit => {
                Repository::credit_wallet(conn, wallet_id, amount, Wallet::MAX_BALANCE, at).await?
            }
            TransactionType::Debit => Repository::debit_wallet(conn, wallet_id, amount, at).await?,
        };
        match change {
            Some(change) => Ok(change),
            None => Err(Self::explain_rejected_movement(conn, wallet_id, kind, amount).await?),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) async fn append_ledger_entry(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        kind: TransactionType,
        amount: Cents,
        balance_after: Cents,
        sequence: i64,
        description: &str,
        payment: Option<PaymentId>,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction, AppError> {
        let mut entry =
            WalletTransaction::after_movement(wallet_id, kind, amount, balance_after, description, at);
        entry.sequence = sequence;
        if let Some(payment_id) = payment {
            entry = entry.with_payment(payment_id);
        }
        Repository::insert_wallet_transaction(conn, &entry).await?;
        Ok(entry)
    }

    async fn explain_rejected_movement(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        kind: TransactionType,
        amount: Cents,
    ) -> Result<AppError, AppError> {
        let wallet = Repository::fetch_wallet(conn, wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
        if !wallet.is_active {
            return Ok(AppError::WalletInactive(wallet_id.to_string()));
        }
        if kind == TransactionType::Credit {
            warn!(
                wallet_id = %wallet_id,
                balance = wallet.balance,
                amount,
                "deposit rejected: balance ceiling reached"
            );
            return Ok(AppError::InvalidAmount(format!(
                "deposit of {} would take the balance above {}",
                format_cents(amount),
                format_cents(Wallet::MAX_BALANCE)
            )));
        }
        warn!(
            wallet_id = %wallet_id,
            balance = wallet.balance,
            required = amount,
            "withdrawal rejected: insufficient funds"
        );
        Ok(AppError::InsufficientFunds {
            balance: wallet.balance,
            required: amount,
        })
    }
}
