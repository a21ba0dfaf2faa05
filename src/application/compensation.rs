//! Return and refund of a completed sale: cancel the reservation, then refund
//! the payment, then mark the sale refunded.

use super::saga::SaleSaga;
use crate::domain::sale::{BookingId, PaymentStatus, Sale, Secret};
use crate::error::{Result, SaleError};
use chrono::Utc;
use tracing::{error, info, warn};

impl SaleSaga {
    /// Operator-initiated return of a sale, found by its booking id.
    pub async fn operator_return(&self, booking_id: BookingId) -> Result<Sale> {
        let secret = self
            .ports
            .store
            .load_by_booking_id(booking_id)
            .await?
            .ok_or(SaleError::SaleNotFound)?
            .secret()
            .clone();
        let _guard = self.locks.acquire(&secret).await;
        let sale = self
            .ports
            .store
            .load(&secret)
            .await?
            .ok_or(SaleError::SaleNotFound)?;
        let sale = self.compensate(sale).await?;
        info!(%secret, %booking_id, "sale returned by operator");
        Ok(sale)
    }

    /// Buyer-initiated refund, refused once the performance is closer than the
    /// configured lead time.
    pub async fn self_refund(&self, secret: &Secret) -> Result<Sale> {
        let _guard = self.locks.acquire(secret).await;
        let sale = self
            .ports
            .store
            .load(secret)
            .await?
            .ok_or(SaleError::SaleNotFound)?;

        let lead_time = self.policy.refund_lead_time();
        if sale.performance_starts_at <= Utc::now() + lead_time {
            return Err(SaleError::RefundWindowClosed {
                minutes: lead_time.num_minutes(),
            });
        }

        let sale = self.compensate(sale).await?;
        info!(%secret, "sale refunded by buyer");
        Ok(sale)
    }

    /// Cancel, then refund. The sale is only marked refunded when both
    /// succeeded; either failure aborts and is returned to the caller.
    async fn compensate(&self, mut sale: Sale) -> Result<Sale> {
        let secret = sale.secret().clone();
        if sale.is_refunded() {
            return Err(SaleError::AlreadyRefunded(secret));
        }

        if !sale.payment_status().is_final() {
            match self.ports.payment.check_status(sale.payment_order_id()).await {
                Ok(status) => {
                    sale.apply_payment_status(status);
                }
                Err(err) => warn!(%secret, error = %err, "payment status check failed"),
            }
        }
        if sale.payment_status() != PaymentStatus::Succeeded {
            return Err(SaleError::NotPaid(secret));
        }

        let booking_id = sale.booking_id();
        if let Err(err) = self.ports.cancel_booking(booking_id).await {
            error!(%secret, %booking_id, error = %err, "booking cancel failed, refund not attempted");
            return Err(SaleError::CancelFailed(err));
        }

        if let Err(err) = self
            .ports
            .payment
            .refund(sale.payment_order_id(), sale.amount(), &secret.refund_key())
            .await
        {
            error!(
                %secret,
                %booking_id,
                payment_id = %sale.payment_order_id(),
                error = %err,
                "refund failed after the reservation was cancelled"
            );
            return Err(SaleError::RefundFailed(err));
        }

        sale.mark_refunded();
        self.persist(&mut sale).await?;
        Ok(sale)
    }
}
