//! Process configuration.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback, so the binary can be configured either way.

use clap::Args;
use std::time::Duration;

/// Limits and timings of the sale saga.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SalePolicy {
    /// Maximum number of seats in one sale
    #[arg(long, env = "BOXOFFICE_MAX_SEATS", default_value_t = 5)]
    pub max_seats_per_sale: usize,

    /// How far back (minutes) the sweepers look for sales to repair
    #[arg(long, env = "BOXOFFICE_WINDOW_MINUTES", default_value_t = 15)]
    pub reconciliation_window_minutes: i64,

    /// Seconds between two sweeps
    #[arg(long, env = "BOXOFFICE_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Self-service refunds close this many minutes before the performance
    #[arg(long, env = "BOXOFFICE_REFUND_LEAD_MINUTES", default_value_t = 30)]
    pub refund_lead_minutes: i64,
}

impl Default for SalePolicy {
    fn default() -> Self {
        Self {
            max_seats_per_sale: 5,
            reconciliation_window_minutes: 15,
            sweep_interval_secs: 60,
            refund_lead_minutes: 30,
        }
    }
}

impl SalePolicy {
    pub fn reconciliation_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reconciliation_window_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn refund_lead_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.refund_lead_minutes)
    }
}

#[derive(Args, Debug, Clone)]
pub struct BookingSettings {
    /// Base URL of the Booking System API
    #[arg(id = "booking_url", long = "booking-url", env = "BOXOFFICE_BOOKING_URL", default_value = "http://127.0.0.1:8081/")]
    pub base_url: String,

    /// Access token for the Booking System
    #[arg(long = "booking-token", env = "BOXOFFICE_BOOKING_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Per-call timeout in seconds
    #[arg(id = "booking_timeout_secs", long = "booking-timeout-secs", env = "BOXOFFICE_BOOKING_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,
}

impl BookingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PaymentSettings {
    /// Base URL of the Payment Gateway API
    #[arg(id = "payment_url", long = "payment-url", env = "BOXOFFICE_PAYMENT_URL", default_value = "https://api.yookassa.ru/v3")]
    pub base_url: String,

    /// Shop identifier used as the basic-auth login
    #[arg(long, env = "BOXOFFICE_PAYMENT_SHOP_ID", default_value = "")]
    pub shop_id: String,

    /// Secret key used as the basic-auth password
    #[arg(long, env = "BOXOFFICE_PAYMENT_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub secret_key: String,

    /// Where the gateway sends the buyer after paying
    #[arg(long, env = "BOXOFFICE_RETURN_URL", default_value = "http://127.0.0.1:8080/api/sales/check")]
    pub return_url: String,

    /// ISO currency code of all amounts
    #[arg(long, env = "BOXOFFICE_CURRENCY", default_value = "RUB")]
    pub currency: String,

    /// Per-call timeout in seconds
    #[arg(id = "payment_timeout_secs", long = "payment-timeout-secs", env = "BOXOFFICE_PAYMENT_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,
}

impl PaymentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MailSettings {
    /// HTTP mail relay receiving ticket emails. Emails are only logged when unset.
    #[arg(long, env = "BOXOFFICE_MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    /// Sender address of ticket emails
    #[arg(long = "mail-from", env = "BOXOFFICE_MAIL_FROM", default_value = "tickets@localhost")]
    pub from: String,
}

/// All settings of a running process.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    #[command(flatten)]
    pub booking: BookingSettings,

    #[command(flatten)]
    pub payment: PaymentSettings,

    #[command(flatten)]
    pub mail: MailSettings,

    #[command(flatten)]
    pub policy: SalePolicy,
}
