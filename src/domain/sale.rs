use super::money::Money;
use super::performance::{ExternalPerformanceId, Performance, PerformanceId};
use crate::error::SaleError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const SECRET_BYTES: usize = 12;

/// Opaque, unguessable token identifying a sale to its buyer.
///
/// The secret doubles as the Payment Gateway idempotency key, so it is
/// generated exactly once per sale and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Idempotency key for the refund of this sale's payment.
    pub fn refund_key(&self) -> String {
        format!("{}-refund", self.0)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reservation identifier assigned by the Booking System.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub u64);

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment order identifier assigned by the Payment Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentOrderId(pub String);

impl fmt::Display for PaymentOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    AwaitingCapture,
    Succeeded,
    Canceled,
}

impl PaymentStatus {
    /// Succeeded and canceled payments never go back to an open state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingCapture => "awaiting_capture",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
        }
    }
}

/// Where the saga stalled, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStep {
    #[default]
    None,
    PaymentUnsettled,
    BookingApprovalFailed,
}

impl ProblemStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PaymentUnsettled => "payment_unsettled",
            Self::BookingApprovalFailed => "booking_approval_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub row: String,
    pub seat: String,
    pub price: Money,
    pub external_code: String,
}

/// Contact details of the person buying the tickets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Buyer {
    pub email: String,
    pub full_name: String,
    /// Digits only.
    pub phone: String,
}

impl Buyer {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>, phone: &str) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
            phone: phone.chars().filter(char::is_ascii_digit).collect(),
        }
    }
}

/// A reservation held by the Booking System for one sale.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub booking_id: BookingId,
    pub amount: Money,
}

/// A payment order opened at the Payment Gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOrder {
    pub id: PaymentOrderId,
    pub confirmation_url: String,
}

/// The unit of saga state.
///
/// Fields are private where an invariant depends on them: tickets only appear
/// on a paid sale (tickets of a canceled payment move to `returned_tickets`), the amount never changes after creation and payment status
/// only moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    secret: Secret,
    pub performance_id: PerformanceId,
    pub external_performance_id: ExternalPerformanceId,
    pub performance_starts_at: DateTime<Utc>,
    pub buyer: Buyer,
    booking_id: BookingId,
    payment_order_id: PaymentOrderId,
    pub payment_url: String,
    amount: Money,
    payment_status: PaymentStatus,
    problem_step: ProblemStep,
    refunded: bool,
    tickets: Vec<Ticket>,
    #[serde(default)]
    returned_tickets: Vec<Ticket>,
    notification_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Builds the record persisted once both the reservation and the payment
    /// order exist.
    pub fn open(
        secret: Secret,
        performance: &Performance,
        buyer: Buyer,
        reservation: Reservation,
        payment: PaymentOrder,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            secret,
            performance_id: performance.id,
            external_performance_id: performance.external_id,
            performance_starts_at: performance.starts_at,
            buyer,
            booking_id: reservation.booking_id,
            payment_order_id: payment.id,
            payment_url: payment.confirmation_url,
            amount: reservation.amount,
            payment_status: PaymentStatus::Pending,
            problem_step: ProblemStep::None,
            refunded: false,
            tickets: Vec::new(),
            returned_tickets: Vec::new(),
            notification_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    pub fn payment_order_id(&self) -> &PaymentOrderId {
        &self.payment_order_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn problem_step(&self) -> ProblemStep {
        self.problem_step
    }

    pub fn is_refunded(&self) -> bool {
        self.refunded
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    /// Tickets that were issued before the payment was canceled.
    pub fn returned_tickets(&self) -> &[Ticket] {
        &self.returned_tickets
    }

    pub fn has_tickets(&self) -> bool {
        !self.tickets.is_empty()
    }

    pub fn notification_sent(&self) -> bool {
        self.notification_sent
    }

    /// Applies a status polled from the Payment Gateway.
    ///
    /// Returns `false` when the update was ignored because it would move a
    /// final status backwards.
    pub fn apply_payment_status(&mut self, status: PaymentStatus) -> bool {
        let allowed = match (self.payment_status, status) {
            (current, next) if current == next => true,
            (PaymentStatus::Succeeded, PaymentStatus::Canceled) => true,
            (current, _) if current.is_final() => false,
            _ => true,
        };
        if allowed {
            self.payment_status = status;
            if status == PaymentStatus::Canceled {
                self.return_tickets();
            }
        }
        allowed
    }

    pub fn record_problem(&mut self, step: ProblemStep) {
        self.problem_step = step;
    }

    /// Attaches tickets returned by the Booking System.
    ///
    /// Only a paid, non-refunded sale may hold tickets.
    pub fn attach_tickets(&mut self, tickets: Vec<Ticket>) -> Result<(), SaleError> {
        if self.payment_status != PaymentStatus::Succeeded {
            return Err(SaleError::NotPaid(self.secret.clone()));
        }
        if self.refunded {
            return Err(SaleError::AlreadyRefunded(self.secret.clone()));
        }
        self.tickets = tickets;
        Ok(())
    }

    /// Records a successful booking approval.
    ///
    /// An approval that came back without tickets keeps the sale flagged so
    /// the sweeper fetches them later.
    pub fn mark_approved(&mut self, tickets: Vec<Ticket>) -> Result<(), SaleError> {
        self.attach_tickets(tickets)?;
        self.problem_step = if self.tickets.is_empty() {
            ProblemStep::BookingApprovalFailed
        } else {
            ProblemStep::None
        };
        Ok(())
    }

    /// Records that both the booking cancel and the payment refund succeeded.
    pub fn mark_refunded(&mut self) {
        self.refunded = true;
        self.payment_status = PaymentStatus::Canceled;
        self.problem_step = ProblemStep::None;
        self.return_tickets();
    }

    fn return_tickets(&mut self) {
        let tickets = std::mem::take(&mut self.tickets);
        self.returned_tickets.extend(tickets);
    }

    pub fn mark_notified(&mut self) {
        self.notification_sent = true;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// True while the reconciliation sweeper still has work to do for this
    /// sale.
    pub fn needs_reconciliation(&self) -> bool {
        if self.refunded {
            return false;
        }
        match self.payment_status {
            PaymentStatus::Pending | PaymentStatus::AwaitingCapture => true,
            PaymentStatus::Succeeded => self.tickets.is_empty(),
            // Seats of a canceled payment not released yet.
            PaymentStatus::Canceled => self.problem_step == ProblemStep::PaymentUnsettled,
        }
    }

    /// True when the sale is paid but its buyer has not been sent the tickets
    /// yet.
    pub fn awaits_notification(&self) -> bool {
        self.payment_status == PaymentStatus::Succeeded && !self.notification_sent
    }

    pub fn created_since(&self, since: DateTime<Utc>) -> bool {
        self.created_at > since
    }

    pub fn view(&self) -> SaleView {
        SaleView {
            secret: self.secret.clone(),
            booking_id: self.booking_id,
            amount: self.amount,
            payment_status: self.payment_status,
            performance_id: self.performance_id,
            email: self.buyer.email.clone(),
            tickets: self.tickets.clone(),
        }
    }
}

/// The part of a sale shown to its buyer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleView {
    pub secret: Secret,
    pub booking_id: BookingId,
    pub amount: Money,
    pub payment_status: PaymentStatus,
    pub performance_id: PerformanceId,
    pub email: String,
    pub tickets: Vec<Ticket>,
}
