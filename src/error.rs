use crate::domain::sale::{BookingId, Secret};
use thiserror::Error;

/// Failure talking to the Booking System or the Payment Gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The remote system understood the request and declined it.
    #[error("rejected by remote system (code {code}): {message}")]
    Rejected { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A seat reservation that failed part-way.
///
/// `partial` holds the reservation the Booking System opened before the
/// failing seat, which the caller must cancel.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("seat reservation failed: {cause}")]
pub struct ReservationFailure {
    pub partial: Option<BookingId>,
    #[source]
    pub cause: RemoteError,
}

#[derive(Error, Debug)]
pub enum SaleError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("performance {0} not found")]
    PerformanceNotFound(u64),
    #[error("performance {0} is not on sale")]
    PerformanceNotSellable(u64),
    #[error("sale not found")]
    SaleNotFound,
    #[error("booking system doesn't accept places: {0}")]
    BookingRejected(#[source] RemoteError),
    #[error("payment system doesn't accept payment: {0}")]
    PaymentRejected(#[source] RemoteError),
    #[error("refunds close {minutes} minutes before the performance")]
    RefundWindowClosed { minutes: i64 },
    #[error("sale {0} is already refunded")]
    AlreadyRefunded(Secret),
    #[error("sale {0} has no captured payment")]
    NotPaid(Secret),
    #[error("booking system error on sale removal: {0}")]
    CancelFailed(#[source] RemoteError),
    #[error("payment system doesn't accept refund: {0}")]
    RefundFailed(#[source] RemoteError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl SaleError {
    /// True for business-level declines, as opposed to communication or
    /// operational failures.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::BookingRejected(cause) | Self::PaymentRejected(cause) => cause.is_rejection(),
            Self::Validation(_)
            | Self::PerformanceNotFound(_)
            | Self::PerformanceNotSellable(_)
            | Self::RefundWindowClosed { .. }
            | Self::AlreadyRefunded(_)
            | Self::NotPaid(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SaleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization error: {err}"))
    }
}

pub type Result<T, E = SaleError> = std::result::Result<T, E>;
