//! Application layer: the sale saga and the background tasks that converge it.
//!
//! `SaleSaga` drives a single sale synchronously on behalf of a user or an
//! operator. `ReconciliationSweeper` and `TicketDispatcher` run on fixed
//! intervals and repair whatever the synchronous path left behind. All of them
//! share the same ports and the same per-sale locks.

pub mod compensation;
pub mod dispatch;
pub mod locks;
pub mod reconciliation;
pub mod saga;
pub mod scheduler;

use crate::domain::ports::{BookingClientRef, PaymentClientRef, SaleStoreRef};
use crate::domain::sale::BookingId;
use crate::error::RemoteError;
use tracing::debug;

/// The collaborators every saga participant needs.
#[derive(Clone)]
pub struct SagaPorts {
    pub store: SaleStoreRef,
    pub booking: BookingClientRef,
    pub payment: PaymentClientRef,
}

impl SagaPorts {
    /// Cancels a reservation, treating one the Booking System no longer holds
    /// as already cancelled.
    ///
    /// A rejected cancel is followed by a query: a booking that is unknown, or
    /// neither paid nor ticketed, counts as released. Anything else returns the
    /// original rejection.
    pub(crate) async fn cancel_booking(&self, booking_id: BookingId) -> Result<(), RemoteError> {
        let rejection = match self.booking.cancel(booking_id).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_rejection() => err,
            Err(err) => return Err(err),
        };
        match self.booking.query(booking_id).await {
            Err(err) if err.is_rejection() => {
                debug!(%booking_id, "booking no longer exists, cancel treated as done");
                Ok(())
            }
            Ok(snapshot) if !snapshot.paid_on_remote && snapshot.tickets.is_empty() => {
                debug!(%booking_id, "booking holds nothing, cancel treated as done");
                Ok(())
            }
            _ => Err(rejection),
        }
    }
}
