use super::SagaPorts;
use super::locks::SaleLocks;
use crate::config::SalePolicy;
use crate::domain::money::Amount;
use crate::domain::performance::{PerformanceId, SeatId};
use crate::domain::ports::{PaymentRequest, PerformanceCatalogRef};
use crate::domain::sale::{
    BookingId, Buyer, PaymentStatus, ProblemStep, Sale, SaleView, Secret,
};
use crate::error::{Result, SaleError};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

/// A buyer's request to purchase seats for one performance.
#[derive(Debug, Clone)]
pub struct NewSaleRequest {
    pub performance_id: PerformanceId,
    pub seats: Vec<SeatId>,
    pub buyer: Buyer,
}

/// Returned once a sale is persisted and waiting for payment.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleCreated {
    pub secret: Secret,
    /// Where to send the buyer to pay.
    pub payment_url: String,
}

/// Where to route the buyer after the Payment Gateway sent them back.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentReturn {
    /// Tickets are issued.
    Completed(SaleView),
    /// Resolution is deferred to the reconciliation sweeper.
    Processing { secret: Secret, problem: ProblemStep },
}

/// Drives sales through `reserve → pay → approve` and back.
///
/// The synchronous path makes a single attempt at every remote call. Failures
/// before the sale is persisted are compensated immediately; failures after
/// that are recorded on the sale as a `ProblemStep` and left for the
/// reconciliation sweeper.
pub struct SaleSaga {
    pub(crate) ports: SagaPorts,
    catalog: PerformanceCatalogRef,
    pub(crate) locks: SaleLocks,
    pub(crate) policy: SalePolicy,
}

impl SaleSaga {
    pub fn new(
        ports: SagaPorts,
        catalog: PerformanceCatalogRef,
        locks: SaleLocks,
        policy: SalePolicy,
    ) -> Self {
        Self {
            ports,
            catalog,
            locks,
            policy,
        }
    }

    /// Reserves the seats, opens a payment order and persists the sale.
    ///
    /// Nothing is persisted unless both remote steps succeeded; a reservation
    /// left behind by a failing step is cancelled before the error is
    /// returned.
    pub async fn create_sale(&self, request: NewSaleRequest) -> Result<SaleCreated> {
        self.validate_seats(&request.seats)?;

        let now = Utc::now();
        let performance = self
            .catalog
            .find(request.performance_id)
            .await?
            .ok_or(SaleError::PerformanceNotFound(request.performance_id.0))?;
        if !performance.is_sellable(now) {
            return Err(SaleError::PerformanceNotSellable(request.performance_id.0));
        }

        let secret = Secret::generate();

        let reservation = match self
            .ports
            .booking
            .reserve(performance.external_id, &request.seats)
            .await
        {
            Ok(reservation) => reservation,
            Err(failure) => {
                warn!(%secret, error = %failure.cause, "seat reservation failed");
                if let Some(partial) = failure.partial {
                    self.release(partial, &secret).await;
                }
                return Err(SaleError::BookingRejected(failure.cause));
            }
        };
        let booking_id = reservation.booking_id;
        info!(%secret, %booking_id, amount = %reservation.amount, "seats reserved");

        let amount = match Amount::new(reservation.amount) {
            Ok(amount) => amount,
            Err(err) => {
                self.release(booking_id, &secret).await;
                return Err(err);
            }
        };
        let payment_request = PaymentRequest {
            amount,
            idempotency_key: secret.as_str().to_string(),
            description: format!("Order {booking_id}-{secret}"),
            customer_email: request.buyer.email.clone(),
        };
        let order = match self.ports.payment.create_payment(&payment_request).await {
            Ok(order) => order,
            Err(cause) => {
                warn!(%secret, %booking_id, error = %cause, "payment creation failed");
                self.release(booking_id, &secret).await;
                return Err(SaleError::PaymentRejected(cause));
            }
        };
        info!(%secret, payment_id = %order.id, "payment order created");

        let sale = Sale::open(
            secret.clone(),
            &performance,
            request.buyer,
            reservation,
            order,
            now,
        );
        let payment_url = sale.payment_url.clone();
        if let Err(err) = self.ports.store.save(sale).await {
            self.release(booking_id, &secret).await;
            return Err(err);
        }

        Ok(SaleCreated {
            secret,
            payment_url,
        })
    }

    /// Handles the buyer coming back from the Payment Gateway.
    pub async fn handle_payment_return(&self, secret: &Secret) -> Result<PaymentReturn> {
        let _guard = self.locks.acquire(secret).await;
        let mut sale = self.load_active(secret).await?;

        if sale.has_tickets() {
            return Ok(PaymentReturn::Completed(sale.view()));
        }

        match self.ports.payment.check_status(sale.payment_order_id()).await {
            Ok(status) => {
                sale.apply_payment_status(status);
            }
            Err(err) => warn!(%secret, error = %err, "payment status check failed"),
        }

        if sale.payment_status() == PaymentStatus::Canceled {
            // Released seats need no further work; otherwise the sweeper retries.
            let problem = if self.release(sale.booking_id(), secret).await {
                ProblemStep::None
            } else {
                ProblemStep::PaymentUnsettled
            };
            sale.record_problem(problem);
            self.persist(&mut sale).await?;
            info!(%secret, "payment canceled");
            return Ok(PaymentReturn::Processing {
                secret: secret.clone(),
                problem: ProblemStep::PaymentUnsettled,
            });
        }

        if sale.payment_status() != PaymentStatus::Succeeded {
            sale.record_problem(ProblemStep::PaymentUnsettled);
            self.persist(&mut sale).await?;
            info!(%secret, status = sale.payment_status().as_str(), "payment not settled yet");
            return Ok(PaymentReturn::Processing {
                secret: secret.clone(),
                problem: ProblemStep::PaymentUnsettled,
            });
        }

        let booking_id = sale.booking_id();
        match self
            .ports
            .booking
            .approve(booking_id, secret, &sale.buyer)
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
                    return Ok(PaymentReturn::Processing {
                        secret: secret.clone(),
                        problem: ProblemStep::BookingApprovalFailed,
                    });
                }
                info!(%secret, tickets = sale.tickets().len(), "sale approved");
                Ok(PaymentReturn::Completed(sale.view()))
            }
            Err(err) => {
                warn!(%secret, booking_id = %sale.booking_id(), error = %err, "booking approval failed");
                sale.record_problem(ProblemStep::BookingApprovalFailed);
                self.persist(&mut sale).await?;
                Ok(PaymentReturn::Processing {
                    secret: secret.clone(),
                    problem: ProblemStep::BookingApprovalFailed,
                })
            }
        }
    }

    /// Buyer-facing view of a sale, hydrating tickets from the Booking System
    /// when the payment went through but none are stored yet.
    pub async fn lookup(&self, secret: &Secret) -> Result<SaleView> {
        let _guard = self.locks.acquire(secret).await;
        let mut sale = self.load_active(secret).await?;

        if sale.payment_status() == PaymentStatus::Succeeded && !sale.has_tickets() {
            match self.ports.booking.query(sale.booking_id()).await {
                Ok(snapshot) if !snapshot.tickets.is_empty() => {
                    sale.mark_approved(snapshot.tickets)?;
                    self.persist(&mut sale).await?;
                }
                Ok(_) => {}
                Err(err) => warn!(%secret, error = %err, "ticket lookup failed"),
            }
        }

        Ok(sale.view())
    }

    /// Operator refresh: re-reads payment status and tickets from both remote
    /// systems.
    pub async fn refresh(&self, booking_id: BookingId) -> Result<Sale> {
        let secret = self
            .ports
            .store
            .load_by_booking_id(booking_id)
            .await?
            .ok_or(SaleError::SaleNotFound)?
            .secret()
            .clone();
        let _guard = self.locks.acquire(&secret).await;
        let mut sale = self
            .ports
            .store
            .load(&secret)
            .await?
            .ok_or(SaleError::SaleNotFound)?;

        match self.ports.payment.check_status(sale.payment_order_id()).await {
            Ok(status) => {
                sale.apply_payment_status(status);
            }
            Err(err) => warn!(%secret, error = %err, "payment status check failed"),
        }
        if sale.payment_status() == PaymentStatus::Succeeded && !sale.is_refunded() {
            match self.ports.booking.query(booking_id).await {
                Ok(snapshot) if !snapshot.tickets.is_empty() => {
                    sale.mark_approved(snapshot.tickets)?;
                }
                Ok(_) => {}
                Err(err) => warn!(%secret, error = %err, "ticket lookup failed"),
            }
        }
        self.persist(&mut sale).await?;
        Ok(sale)
    }

    fn validate_seats(&self, seats: &[SeatId]) -> Result<()> {
        let max = self.policy.max_seats_per_sale;
        if seats.is_empty() || seats.len() > max {
            return Err(SaleError::Validation(format!(
                "a sale must contain between 1 and {max} seats, got {}",
                seats.len()
            )));
        }
        let unique: HashSet<_> = seats.iter().collect();
        if unique.len() != seats.len() {
            return Err(SaleError::Validation("duplicate seats in request".to_string()));
        }
        Ok(())
    }

    async fn load_active(&self, secret: &Secret) -> Result<Sale> {
        match self.ports.store.load(secret).await? {
            Some(sale) if !sale.is_refunded() => Ok(sale),
            _ => Err(SaleError::SaleNotFound),
        }
    }

    pub(crate) async fn persist(&self, sale: &mut Sale) -> Result<()> {
        sale.touch(Utc::now());
        self.ports.store.save(sale.clone()).await
    }

    /// Best-effort cancel of a reservation. Returns whether the seats are free.
    async fn release(&self, booking_id: BookingId, secret: &Secret) -> bool {
        match self.ports.cancel_booking(booking_id).await {
            Ok(()) => {
                info!(%secret, %booking_id, "reservation released");
                true
            }
            Err(err) => {
                warn!(%secret, %booking_id, error = %err, "reservation release failed");
                false
            }
        }
    }
}
