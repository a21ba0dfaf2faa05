use super::locks::SaleLocks;
use crate::domain::ports::{SaleStoreRef, TicketNotifierRef};
use crate::domain::sale::Secret;
use crate::error::Result;
use chrono::Utc;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub examined: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} sent={} failed={} skipped={} errors={}",
            self.examined, self.sent, self.failed, self.skipped, self.errors
        )
    }
}

enum DispatchOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Outbox dispatcher for ticket emails.
///
/// `notification_sent` is only set after the notifier reported success, so a
/// failed send is picked up again by the next sweep while a flagged sale is
/// never sent twice.
pub struct TicketDispatcher {
    store: SaleStoreRef,
    notifier: TicketNotifierRef,
    locks: SaleLocks,
    window: chrono::Duration,
}

impl TicketDispatcher {
    pub fn new(
        store: SaleStoreRef,
        notifier: TicketNotifierRef,
        locks: SaleLocks,
        window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            locks,
            window,
        }
    }

    pub async fn sweep(&self) -> Result<DispatchReport> {
        let since = Utc::now() - self.window;
        let candidates = self.store.load_succeeded_unnotified_recent(since).await?;

        let mut report = DispatchReport {
            examined: candidates.len(),
            ..DispatchReport::default()
        };
        for candidate in candidates {
            let secret = candidate.secret().clone();
            match self.dispatch(&secret).await {
                Ok(DispatchOutcome::Sent) => report.sent += 1,
                Ok(DispatchOutcome::Failed) => report.failed += 1,
                Ok(DispatchOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    error!(%secret, error = %err, "ticket dispatch failed");
                }
            }
        }

        if report.examined > 0 {
            info!(%report, "ticket dispatch sweep finished");
        }
        Ok(report)
    }

    async fn dispatch(&self, secret: &Secret) -> Result<DispatchOutcome> {
        let _guard = self.locks.acquire(secret).await;
        let Some(mut sale) = self.store.load(secret).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        if !sale.awaits_notification() || !sale.has_tickets() || sale.is_refunded() {
            return Ok(DispatchOutcome::Skipped);
        }

        if !self.notifier.send_ticket_email(&sale).await {
            warn!(%secret, "ticket email not delivered, will retry");
            return Ok(DispatchOutcome::Failed);
        }

        sale.mark_notified();
        sale.touch(Utc::now());
        self.store.save(sale.clone()).await?;
        info!(
            %secret,
            booking_id = %sale.booking_id(),
            email = %sale.buyer.email,
            "tickets sent"
        );
        Ok(DispatchOutcome::Sent)
    }
}
