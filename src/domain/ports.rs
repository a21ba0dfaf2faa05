use super::money::{Amount, Money};
use super::performance::{ExternalPerformanceId, Performance, PerformanceId, SeatId};
use super::sale::{
    BookingId, Buyer, PaymentOrder, PaymentOrderId, PaymentStatus, Reservation, Sale, Secret,
    Ticket,
};
use crate::error::{RemoteError, ReservationFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Keyed persistence for sales.
///
/// Implementations only need per-record upsert semantics; cross-writer
/// coordination is handled by the application layer.
#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn save(&self, sale: Sale) -> Result<()>;
    async fn load(&self, secret: &Secret) -> Result<Option<Sale>>;
    async fn load_by_booking_id(&self, booking_id: BookingId) -> Result<Option<Sale>>;
    /// Sales created after `since` that the reconciliation sweeper must
    /// re-drive.
    async fn load_pending_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>>;
    /// Paid sales created after `since` whose tickets were not sent yet.
    async fn load_succeeded_unnotified_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>>;
    async fn load_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>>;
}

/// What the Booking System reports about an existing reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSnapshot {
    pub tickets: Vec<Ticket>,
    pub paid_on_remote: bool,
}

#[async_trait]
pub trait BookingClient: Send + Sync {
    /// Reserves `seats` for a performance, one seat at a time.
    async fn reserve(
        &self,
        performance: ExternalPerformanceId,
        seats: &[SeatId],
    ) -> std::result::Result<Reservation, ReservationFailure>;
    async fn cancel(&self, booking_id: BookingId) -> std::result::Result<(), RemoteError>;
    /// Confirms the paid booking. The sale secret is passed on as the
    /// external order reference.
    async fn approve(
        &self,
        booking_id: BookingId,
        secret: &Secret,
        buyer: &Buyer,
    ) -> std::result::Result<Vec<Ticket>, RemoteError>;
    async fn query(&self, booking_id: BookingId) -> std::result::Result<BookingSnapshot, RemoteError>;
}

/// Everything the Payment Gateway needs to open a payment order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub amount: Amount,
    /// Always the sale secret.
    pub idempotency_key: String,
    pub description: String,
    pub customer_email: String,
}

#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentOrder, RemoteError>;
    async fn check_status(
        &self,
        order_id: &PaymentOrderId,
    ) -> std::result::Result<PaymentStatus, RemoteError>;
    async fn refund(
        &self,
        order_id: &PaymentOrderId,
        amount: Money,
        idempotency_key: &str,
    ) -> std::result::Result<(), RemoteError>;
}

#[async_trait]
pub trait TicketNotifier: Send + Sync {
    /// Sends the tickets of `sale` to its buyer. Returns `false` when the
    /// message could not be delivered.
    async fn send_ticket_email(&self, sale: &Sale) -> bool;
}

#[async_trait]
pub trait PerformanceCatalog: Send + Sync {
    async fn find(&self, id: PerformanceId) -> Result<Option<Performance>>;
}

pub type SaleStoreRef = Arc<dyn SaleStore>;
pub type BookingClientRef = Arc<dyn BookingClient>;
pub type PaymentClientRef = Arc<dyn PaymentClient>;
pub type TicketNotifierRef = Arc<dyn TicketNotifier>;
pub type PerformanceCatalogRef = Arc<dyn PerformanceCatalog>;
