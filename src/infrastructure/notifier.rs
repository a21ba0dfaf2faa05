use crate::config::MailSettings;
use crate::domain::ports::{TicketNotifier, TicketNotifierRef};
use crate::domain::sale::Sale;
use crate::error::SaleError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Plain-text body listing every ticket of a sale.
pub fn render_tickets(sale: &Sale) -> String {
    let lines: String = sale
        .tickets()
        .iter()
        .map(|ticket| {
            format!(
                "Row {} seat {}: {} (code {})\n",
                ticket.row, ticket.seat, ticket.price, ticket.external_code
            )
        })
        .collect();
    format!(
        "Hello {},\nyour order {} for the performance starting {} is paid.\n\n{lines}\nTotal: {}\nOrder key: {}\n",
        sale.buyer.full_name,
        sale.booking_id(),
        sale.performance_starts_at.format("%Y-%m-%d %H:%M UTC"),
        sale.amount(),
        sale.secret(),
    )
}

fn subject(sale: &Sale) -> String {
    format!("Your tickets, order {}", sale.booking_id())
}

/// Writes ticket emails to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl TicketNotifier for LogNotifier {
    async fn send_ticket_email(&self, sale: &Sale) -> bool {
        info!(
            secret = %sale.secret(),
            to = %sale.buyer.email,
            subject = %subject(sale),
            tickets = sale.tickets().len(),
            "ticket email (no mail relay configured)"
        );
        true
    }
}

#[derive(Debug, Serialize)]
struct MailMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

/// Hands ticket emails to an HTTP mail relay as JSON.
#[derive(Clone)]
pub struct MailRelayNotifier {
    client: Client,
    url: String,
    from: String,
}

impl MailRelayNotifier {
    pub fn new(url: impl Into<String>, from: impl Into<String>) -> Result<Self, SaleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SaleError::Internal(Box::new(e)))?;
        Ok(Self {
            client,
            url: url.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl TicketNotifier for MailRelayNotifier {
    async fn send_ticket_email(&self, sale: &Sale) -> bool {
        let message = MailMessage {
            from: &self.from,
            to: &sale.buyer.email,
            subject: subject(sale),
            text: render_tickets(sale),
        };
        match self.client.post(&self.url).json(&message).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(secret = %sale.secret(), status = %response.status(), "mail relay refused ticket email");
                false
            }
            Err(err) => {
                warn!(secret = %sale.secret(), error = %err, "mail relay unreachable");
                false
            }
        }
    }
}

/// Picks the relay when one is configured, the log otherwise.
pub fn notifier_from_settings(settings: &MailSettings) -> Result<TicketNotifierRef, SaleError> {
    match &settings.mail_relay_url {
        Some(url) => Ok(Arc::new(MailRelayNotifier::new(
            url.clone(),
            settings.from.clone(),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
