use tracing::{info, warn};

use crate::domain::{IntegrityReport, RatingDrift, RefundOverrun, verify_wallet_ledger};

use super::{AppError, MarketplaceService};

impl MarketplaceService {
    /// Replay every wallet log, compare provider ratings with a full recount and
    /// look for over-refunded payments. Reads are not taken from a single
    /// snapshot, so writes in flight can show up as transient findings.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let mut report = IntegrityReport::default();

        for wallet in self.repo.list_wallets().await? {
            let ledger = self.repo.wallet_ledger(wallet.id).await?;
            report.wallets_checked += 1;
            report.transactions_checked += ledger.len();
            report
                .ledger_issues
                .extend(verify_wallet_ledger(wallet.id, wallet.balance, &ledger));
        }

        let recomputed = self.repo.recompute_all_ratings().await?;
        for provider in self.repo.list_providers().await? {
            report.providers_checked += 1;
            let expected = recomputed.get(&provider.id).copied().unwrap_or_default();
            if provider.rating != expected {
                report.rating_drift.push(RatingDrift {
                    provider_id: provider.id,
                    stored: provider.rating,
                    recomputed: expected,
                });
            }
        }

        for payment in self.repo.list_payments().await? {
            report.payments_checked += 1;
            if payment.refund_amount > payment.amount {
                report.refund_overruns.push(RefundOverrun {
                    payment_id: payment.id,
                    amount: payment.amount,
                    refund_amount: payment.refund_amount,
                });
            }
        }

        if report.is_healthy() {
            info!(
                wallets = report.wallets_checked,
                transactions = report.transactions_checked,
                providers = report.providers_checked,
                payments = report.payments_checked,
                "integrity check passed"
            );
        } else {
            warn!(issues = report.issue_count(), "integrity check found issues");
        }
        Ok(report)
    }
}
