use serde::Serialize;

use super::{Cents, TransactionType, WalletId, WalletTransaction};

/// Replay a wallet's transaction log.
/// Balance = sum of credits - sum of debits
pub fn replay_balance(transactions: &[WalletTransaction]) -> Cents {
    transactions.iter().fold(0, |balance, tx| {
        balance + tx.transaction_type.signed(tx.amount)
    })
}

pub fn total_by_type(transactions: &[WalletTransaction], kind: TransactionType) -> Cents {
    transactions
        .iter()
        .filter(|tx| tx.transaction_type == kind)
        .map(|tx| tx.amount)
        .sum()
}

/// A single ledger inconsistency found while verifying a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerIssue {
    BalanceMismatch {
        wallet_id: WalletId,
        stored: Cents,
        replayed: Cents,
    },
    NegativeBalance {
        wallet_id: WalletId,
        balance: Cents,
    },
    NonPositiveAmount {
        wallet_id: WalletId,
        sequence: i64,
        amount: Cents,
    },
    ArithmeticMismatch {
        wallet_id: WalletId,
        sequence: i64,
    },
    BrokenChain {
        wallet_id: WalletId,
        sequence: i64,
        expected_before: Cents,
        actual_before: Cents,
    },
}

impl std::fmt::Display for LedgerIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerIssue::BalanceMismatch {
                wallet_id,
                stored,
                replayed,
            } => write!(
                f,
                "wallet {}: stored balance {} but log replays to {}",
                wallet_id, stored, replayed
            ),
            LedgerIssue::NegativeBalance { wallet_id, balance } => {
                write!(f, "wallet {}: negative balance {}", wallet_id, balance)
            }
            LedgerIssue::NonPositiveAmount {
                wallet_id,
                sequence,
                amount,
            } => write!(
                f,
                "wallet {}: transaction #{} has non-positive amount {}",
                wallet_id, sequence, amount
            ),
            LedgerIssue::ArithmeticMismatch {
                wallet_id,
                sequence,
            } => write!(
                f,
                "wallet {}: transaction #{} before/after does not match its amount",
                wallet_id, sequence
            ),
            LedgerIssue::BrokenChain {
                wallet_id,
                sequence,
                expected_before,
                actual_before,
            } => write!(
                f,
                "wallet {}: transaction #{} starts at {} but previous row ended at {}",
                wallet_id, sequence, actual_before, expected_before
            ),
        }
    }
}

/// Check a wallet's stored balance against its log, which must be ordered by sequence.
pub fn verify_wallet_ledger(
    wallet_id: WalletId,
    stored_balance: Cents,
    transactions: &[WalletTransaction],
) -> Vec<LedgerIssue> {
    let mut issues = Vec::new();

    if stored_balance < 0 {
        issues.push(LedgerIssue::NegativeBalance {
            wallet_id,
            balance: stored_balance,
        });
    }

    let mut previous_after: Cents = 0;
    for tx in transactions {
        if tx.amount <= 0 {
            issues.push(LedgerIssue::NonPositiveAmount {
                wallet_id,
                sequence: tx.sequence,
                amount: tx.amount,
            });
        }
        if tx.balance_after != tx.balance_before + tx.transaction_type.signed(tx.amount) {
            issues.push(LedgerIssue::ArithmeticMismatch {
                wallet_id,
                sequence: tx.sequence,
            });
        }
        if tx.balance_before != previous_after {
            issues.push(LedgerIssue::BrokenChain {
                wallet_id,
                sequence: tx.sequence,
                expected_before: previous_after,
                actual_before: tx.balance_before,
            });
        }
        previous_after = tx.balance_after;
    }

    let replayed = replay_balance(transactions);
    if replayed != stored_balance {
        issues.push(LedgerIssue::BalanceMismatch {
            wallet_id,
            stored: stored_balance,
            replayed,
        });
    }

    issues
}

/// Refunds against one payment may not exceed what was paid.
pub fn validate_refund(
    paid_amount: Cents,
    already_refunded: Cents,
    requested: Cents,
) -> Result<(), RefundError> {
    if already_refunded + requested > paid_amount {
        return Err(RefundError::ExceedsPaidAmount {
            paid_amount,
            already_refunded,
            requested,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundError {
    ExceedsPaidAmount {
        paid_amount: Cents,
        already_refunded: Cents,
        requested: Cents,
    },
}

impl std::fmt::Display for RefundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundError::ExceedsPaidAmount {
                paid_amount,
                already_refunded,
                requested,
            } => write!(
                f,
                "refund of {} cents would exceed paid amount ({} cents, {} already refunded)",
                requested, paid_amount, already_refunded
            ),
        }
    }
}

impl std::error::Error for RefundError {}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn chain(wallet_id: WalletId, movements: &[(TransactionType, Cents)]) -> Vec<WalletTransaction> {
        let mut balance = 0;
        movements
            .iter()
            .enumerate()
            .map(|(i, (kind, amount))| {
                balance += kind.signed(*amount);
                let mut tx = WalletTransaction::after_movement(
                    wallet_id,
                    *kind,
                    *amount,
                    balance,
                    "test",
                    Utc::now(),
                );
                tx.sequence = i as i64 + 1;
                tx
            })
            .collect()
    }

    #[test]
    fn test_replay_balance_empty() {
        assert_eq!(replay_balance(&[]), 0);
    }

    #[test]
    fn test_replay_balance_mixed() {
        let wallet = Uuid::new_v4();
        let txs = chain(
            wallet,
            &[
                (TransactionType::Credit, 10000),
                (TransactionType::Debit, 2500),
                (TransactionType::Credit, 500),
            ],
        );
        assert_eq!(replay_balance(&txs), 8000);
        assert_eq!(total_by_type(&txs, TransactionType::Credit), 10500);
        assert_eq!(total_by_type(&txs, TransactionType::Debit), 2500);
    }

    #[test]
    fn test_verify_consistent_ledger() {
        let wallet = Uuid::new_v4();
        let txs = chain(
            wallet,
            &[(TransactionType::Credit, 10000), (TransactionType::Debit, 4000)],
        );
        assert!(verify_wallet_ledger(wallet, 6000, &txs).is_empty());
    }

    #[test]
    fn test_verify_detects_balance_mismatch() {
        let wallet = Uuid::new_v4();
        let txs = chain(wallet, &[(TransactionType::Credit, 10000)]);
        let issues = verify_wallet_ledger(wallet, 9000, &txs);
        assert_eq!(
            issues,
            vec![LedgerIssue::BalanceMismatch {
                wallet_id: wallet,
                stored: 9000,
                replayed: 10000,
            }]
        );
    }

    #[test]
    fn test_verify_detects_broken_chain() {
        let wallet = Uuid::new_v4();
        let mut txs = chain(
            wallet,
            &[(TransactionType::Credit, 10000), (TransactionType::Credit, 5000)],
        );
        txs[1].balance_before = 9000;
        txs[1].balance_after = 14000;

        let issues = verify_wallet_ledger(wallet, 15000, &txs);
        assert!(issues.iter().any(|i| matches!(i, LedgerIssue::BrokenChain { sequence: 2, .. })));
    }

    #[test]
    fn test_verify_detects_negative_balance_and_bad_amount() {
        let wallet = Uuid::new_v4();
        let mut txs = chain(wallet, &[(TransactionType::Credit, 100)]);
        txs[0].amount = 0;
        txs[0].balance_after = 0;

        let issues = verify_wallet_ledger(wallet, -100, &txs);
        assert!(issues.iter().any(|i| matches!(i, LedgerIssue::NegativeBalance { .. })));
        assert!(issues.iter().any(|i| matches!(i, LedgerIssue::NonPositiveAmount { .. })));
    }

    #[test]
    fn test_validate_refund() {
        assert!(validate_refund(10000, 0, 5000).is_ok());
        assert!(validate_refund(10000, 6000, 4000).is_ok());
        assert!(matches!(
            validate_refund(10000, 6000, 6000),
            Err(RefundError::ExceedsPaidAmount { .. })
        ));
    }
}
