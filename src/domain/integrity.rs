use serde::Serialize;

use super::{Cents, LedgerIssue, PaymentId, ProviderId, RatingAggregate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingDrift {
    pub provider_id: ProviderId,
    pub stored: RatingAggregate,
    pub recomputed: RatingAggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOverrun {
    pub payment_id: PaymentId,
    pub amount: Cents,
    pub refund_amount: Cents,
}

/// Outcome of a full consistency pass over wallets, ratings and refunds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub wallets_checked: usize,
    pub transactions_checked: usize,
    pub providers_checked: usize,
    pub payments_checked: usize,
    pub ledger_issues: Vec<LedgerIssue>,
    pub rating_drift: Vec<RatingDrift>,
    pub refund_overruns: Vec<RefundOverrun>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.ledger_issues.is_empty()
            && self.rating_drift.is_empty()
            && self.refund_overruns.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.ledger_issues.len() + self.rating_drift.len() + self.refund_overruns.len()
    }
}
