use super::SagaPorts;
use super::locks::SaleLocks;
use crate::domain::sale::{PaymentStatus, ProblemStep, Sale, Secret};
use crate::error::Result;
use chrono::Utc;
use std::fmt;
use tracing::{error, info, warn};

/// What happened to one sale during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payment settled and the booking is approved with tickets attached.
    Approved,
    /// The Payment Gateway still reports an open payment.
    StillPending,
    /// Payment settled but approval failed; retried on the next sweep.
    ApprovalFailed,
    /// Payment was canceled; the reservation was released.
    Released,
    /// Payment was canceled but the reservation is still held; retried on the
    /// next sweep.
    ReleaseFailed,
    /// The payment status could not be read.
    StatusUnavailable,
    /// Another resolver settled the sale first.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub approved: usize,
    pub pending: usize,
    pub approval_failed: usize,
    pub released: usize,
    pub release_failed: usize,
    pub unavailable: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Approved => self.approved += 1,
            ReconcileOutcome::StillPending => self.pending += 1,
            ReconcileOutcome::ApprovalFailed => self.approval_failed += 1,
            ReconcileOutcome::Released => self.released += 1,
            ReconcileOutcome::ReleaseFailed => self.release_failed += 1,
            ReconcileOutcome::StatusUnavailable => self.unavailable += 1,
            ReconcileOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} approved={} pending={} approval_failed={} released={} release_failed={} unavailable={} skipped={} errors={}",
            self.examined,
            self.approved,
            self.pending,
            self.approval_failed,
            self.released,
            self.release_failed,
            self.unavailable,
            self.skipped,
            self.errors
        )
    }
}

/// Periodically re-drives recent sales the synchronous path left unsettled.
///
/// Only sales created inside the trailing window are considered, which bounds
/// how long an abandoned purchase keeps being retried.
pub struct ReconciliationSweeper {
    ports: SagaPorts,
    locks: SaleLocks,
    window: chrono::Duration,
}

impl ReconciliationSweeper {
    pub fn new(ports: SagaPorts, locks: SaleLocks, window: chrono::Duration) -> Self {
        Self {
            ports,
            locks,
            window,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let since = Utc::now() - self.window;
        let candidates = self.ports.store.load_pending_recent(since).await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };
        for candidate in candidates {
            let secret = candidate.secret().clone();
            match self.reconcile(&secret).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    report.errors += 1;
                    error!(%secret, error = %err, "reconciliation failed");
                }
            }
        }

        if report.examined > 0 {
            info!(%report, "reconciliation sweep finished");
        }
        Ok(report)
    }

    /// Reconciles one sale under its lock, starting from the stored record.
    pub async fn reconcile(&self, secret: &Secret) -> Result<ReconcileOutcome> {
        let _guard = self.locks.acquire(secret).await;
        let Some(mut sale) = self.ports.store.load(secret).await? else {
            return Ok(ReconcileOutcome::Skipped);
        };
        if !sale.needs_reconciliation() {
            return Ok(ReconcileOutcome::Skipped);
        }

        let status = match self.ports.payment.check_status(sale.payment_order_id()).await {
            Ok(status) => status,
            Err(err) => {
                warn!(%secret, error = %err, "payment status check failed");
                return Ok(ReconcileOutcome::StatusUnavailable);
            }
        };
        let previous = sale.payment_status();
        sale.apply_payment_status(status);

        match sale.payment_status() {
            PaymentStatus::Pending | PaymentStatus::AwaitingCapture => {
                if sale.payment_status() != previous {
                    self.persist(&mut sale).await?;
                }
                Ok(ReconcileOutcome::StillPending)
            }
            PaymentStatus::Canceled => {
                let booking_id = sale.booking_id();
                match self.ports.cancel_booking(booking_id).await {
                    Ok(()) => {
                        info!(%secret, %booking_id, "payment canceled, reservation released");
                        sale.record_problem(ProblemStep::None);
                        self.persist(&mut sale).await?;
                        Ok(ReconcileOutcome::Released)
                    }
                    Err(err) => {
                        warn!(%secret, %booking_id, error = %err, "payment canceled, reservation release failed");
                        sale.record_problem(ProblemStep::PaymentUnsettled);
                        self.persist(&mut sale).await?;
                        Ok(ReconcileOutcome::ReleaseFailed)
                    }
                }
            }
            PaymentStatus::Succeeded => self.settle(sale).await,
        }
    }

    /// Approves a paid sale unless the Booking System already shows it paid,
    /// then makes sure tickets are attached.
    async fn settle(&self, mut sale: Sale) -> Result<ReconcileOutcome> {
        let secret = sale.secret().clone();
        let booking_id = sale.booking_id();

        match self.ports.booking.query(booking_id).await {
            Ok(snapshot) if snapshot.paid_on_remote => {
                sale.mark_approved(snapshot.tickets)?;
                self.persist(&mut sale).await?;
                if !sale.has_tickets() {
                    warn!(%secret, %booking_id, "sale approved remotely but no tickets yet");
                    return Ok(ReconcileOutcome::ApprovalFailed);
                }
                info!(%secret, %booking_id, "sale already approved remotely, tickets hydrated");
                return Ok(ReconcileOutcome::Approved);
            }
            Ok(_) => {}
            Err(err) => warn!(%secret, %booking_id, error = %err, "booking query failed, approving anyway"),
        }

        match self
            .ports
            .booking
            .approve(booking_id, &secret, &sale.buyer)
            .await
        {
            Ok(mut tickets) => {
                if tickets.is_empty() {
                    match self.ports.booking.query(booking_id).await {
                        Ok(snapshot) => tickets = snapshot.tickets,
                        Err(err) => warn!(%secret, error = %err, "ticket lookup after approval failed"),
                    }
                }
                sale.mark_approved(tickets)?;
                self.persist(&mut sale).await?;
                if !sale.has_tickets() {
                    warn!(%secret, %booking_id, "booking approved without tickets");
                    return Ok(ReconcileOutcome::ApprovalFailed);
                }
                info!(%secret, %booking_id, "sale approved by reconciliation");
                Ok(ReconcileOutcome::Approved)
            }
            Err(err) => {
                sale.record_problem(ProblemStep::BookingApprovalFailed);
                self.persist(&mut sale).await?;
                error!(%secret, %booking_id, error = %err, "booking approval failed, needs attention");
                Ok(ReconcileOutcome::ApprovalFailed)
            }
        }
    }

    async fn persist(&self, sale: &mut Sale) -> Result<()> {
        sale.touch(Utc::now());
        self.ports.store.save(sale.clone()).await
    }
}
