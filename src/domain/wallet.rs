use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, PaymentId, UserId, money};

pub type WalletId = Uuid;
pub type WalletTransactionId = Uuid;

/// Stored-value balance owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    #[serde(with = "money::decimal")]
    pub balance: Cents,
    pub currency: String,
    /// Bumped on every balance mutation
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Ceiling for a stored balance
    pub const MAX_BALANCE: Cents = money::MAX_AMOUNT;

    pub fn new(user_id: UserId, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: 0,
            currency,
            version: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_withdraw(&self, amount: Cents) -> bool {
        self.is_active && amount > 0 && amount <= self.balance
    }

    pub fn can_deposit(&self, amount: Cents) -> bool {
        self.is_active && amount > 0 && amount <= Self::MAX_BALANCE - self.balance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(TransactionType::Credit),
            "debit" => Some(TransactionType::Debit),
            _ => None,
        }
    }

    /// Signed effect of `amount` on the balance.
    pub fn signed(&self, amount: Cents) -> Cents {
        match self {
            TransactionType::Credit => amount,
            TransactionType::Debit => -amount,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only record of one wallet balance movement.
/// Sequence and reference are assigned by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: WalletTransactionId,
    /// Monotonically increasing sequence number for ordering
    pub sequence: i64,
    pub reference: String,
    pub wallet_id: WalletId,
    /// Always positive; direction comes from `transaction_type`
    #[serde(with = "money::decimal")]
    pub amount: Cents,
    pub transaction_type: TransactionType,
    #[serde(with = "money::decimal")]
    pub balance_before: Cents,
    #[serde(with = "money::decimal")]
    pub balance_after: Cents,
    pub description: String,
    pub reference_payment: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Build the log row for a movement whose resulting balance is already known.
    pub fn after_movement(
        wallet_id: WalletId,
        transaction_type: TransactionType,
        amount: Cents,
        balance_after: Cents,
        description: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            reference: generate_reference(WALLET_TRANSACTION_PREFIX, at),
            wallet_id,
            amount,
            transaction_type,
            balance_before: balance_after - transaction_type.signed(amount),
            balance_after,
            description: description.into(),
            reference_payment: None,
            created_at: at,
        }
    }

    pub fn with_payment(mut self, payment_id: PaymentId) -> Self {
        self.reference_payment = Some(payment_id);
        self
    }
}

pub const WALLET_TRANSACTION_PREFIX: &str = "WLT";

/// `prefix` + `yymmdd` + 8 random upper-case hex characters.
pub fn generate_reference(prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        prefix,
        at.format("%y%m%d"),
        random_suffix()
    )
}

/// 8 upper-case hex characters taken from a fresh v4 UUID.
pub fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_new_wallet_is_empty_and_active() {
        let wallet = Wallet::new(Uuid::new_v4(), "INR".into());
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.version, 0);
        assert!(wallet.is_active);
        assert!(!wallet.can_withdraw(1));
    }

    #[test]
    fn test_can_withdraw_respects_balance() {
        let mut wallet = Wallet::new(Uuid::new_v4(), "INR".into());
        wallet.balance = 10000;
        assert!(wallet.can_withdraw(10000));
        assert!(!wallet.can_withdraw(10001));
        assert!(!wallet.can_withdraw(0));

        wallet.is_active = false;
        assert!(!wallet.can_withdraw(100));
    }

    #[test]
    fn test_can_deposit_respects_ceiling() {
        let mut wallet = Wallet::new(Uuid::new_v4(), "INR".into());
        wallet.balance = Wallet::MAX_BALANCE - 100;
        assert!(wallet.can_deposit(100));
        assert!(!wallet.can_deposit(101));
        assert!(!wallet.can_deposit(0));
    }

    #[test]
    fn test_after_movement_derives_balance_before() {
        let wallet_id = Uuid::new_v4();
        let credit = WalletTransaction::after_movement(
            wallet_id,
            TransactionType::Credit,
            5000,
            15000,
            "top up",
            Utc::now(),
        );
        assert_eq!(credit.balance_before, 10000);

        let debit = WalletTransaction::after_movement(
            wallet_id,
            TransactionType::Debit,
            5000,
            10000,
            "payout",
            Utc::now(),
        );
        assert_eq!(debit.balance_before, 15000);
    }

    #[test]
    fn test_reference_format() {
        let at = Utc.with_ymd_and_hms(2024, 10, 16, 9, 0, 0).unwrap();
        let reference = generate_reference("WLT", at);
        assert_eq!(reference.len(), 3 + 6 + 8);
        assert!(reference.starts_with("WLT241016"));
        assert!(reference[9..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
