//! HTTP adapter for the Booking System.
//!
//! The remote API answers every call with a `{code, message, data}` envelope
//! where `code == 0` means success. Seats are reserved one call at a time: the
//! first opens a reservation for the performance, the following ones are added
//! to it.

use crate::config::BookingSettings;
use crate::domain::money::Money;
use crate::domain::performance::{ExternalPerformanceId, SeatId};
use crate::domain::ports::{BookingClient, BookingSnapshot};
use crate::domain::sale::{BookingId, Buyer, Reservation, Secret, Ticket};
use crate::error::{RemoteError, ReservationFailure, SaleError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationData {
    sale_id: Value,
    #[serde(default)]
    places: HashMap<String, Money>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleData {
    #[serde(default)]
    is_paid: Value,
    #[serde(default)]
    full_info: FullInfo,
    #[serde(default)]
    tickets: Vec<RemoteTicket>,
}

#[derive(Debug, Default, Deserialize)]
struct FullInfo {
    #[serde(default)]
    places: Vec<RemotePlace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePlace {
    row_name: String,
    object_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTicket {
    price: Money,
    unique_code: String,
}

impl SaleData {
    /// Tickets and seat positions come as two parallel lists.
    fn tickets(self) -> Vec<Ticket> {
        let places = self.full_info.places;
        self.tickets
            .into_iter()
            .enumerate()
            .map(|(index, ticket)| {
                let (row, seat) = places
                    .get(index)
                    .map(|p| (p.row_name.clone(), p.object_name.clone()))
                    .unwrap_or_default();
                Ticket {
                    row,
                    seat,
                    price: ticket.price,
                    external_code: ticket.unique_code,
                }
            })
            .collect()
    }

    fn is_paid(&self) -> bool {
        match &self.is_paid {
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Number(n) => n.as_i64() != Some(0),
            Value::Bool(b) => *b,
            _ => false,
        }
    }
}

fn parse_booking_id(value: &Value) -> Result<BookingId, RemoteError> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.map(BookingId)
        .ok_or_else(|| RemoteError::Decode(format!("invalid sale id {value}")))
}

#[derive(Clone)]
pub struct HttpBookingClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBookingClient {
    pub fn new(settings: &BookingSettings) -> Result<Self, SaleError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SaleError::Internal(Box::new(e)))?;
        let mut base_url = settings.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            token: settings.token.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = response.json().await?;
        debug!(endpoint, code = envelope.code, "booking system response");
        if envelope.code != 0 {
            return Err(RemoteError::Rejected {
                code: envelope.code.to_string(),
                message: envelope.message,
            });
        }
        serde_json::from_value(envelope.data).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BookingClient for HttpBookingClient {
    async fn reserve(
        &self,
        performance: ExternalPerformanceId,
        seats: &[SeatId],
    ) -> Result<Reservation, ReservationFailure> {
        let mut booking_id: Option<BookingId> = None;
        let mut prices: HashMap<String, Money> = HashMap::new();

        for seat in seats {
            let result: Result<ReservationData, RemoteError> = match booking_id {
                None => {
                    self.call(
                        "salePlaceReservation/new/",
                        &[
                            ("placeId", seat.to_string()),
                            ("performanceId", performance.to_string()),
                        ],
                    )
                    .await
                }
                Some(id) => {
                    self.call(
                        "salePlaceReservation/add/",
                        &[("placeId", seat.to_string()), ("saleId", id.to_string())],
                    )
                    .await
                }
            };
            let data = result.map_err(|cause| ReservationFailure {
                partial: booking_id,
                cause,
            })?;
            let id = parse_booking_id(&data.sale_id).map_err(|cause| ReservationFailure {
                partial: booking_id,
                cause,
            })?;
            booking_id = Some(id);
            prices.extend(data.places);
        }

        let booking_id = booking_id.ok_or_else(|| ReservationFailure {
            partial: None,
            cause: RemoteError::Decode("no seats to reserve".to_string()),
        })?;
        Ok(Reservation {
            booking_id,
            amount: prices.into_values().sum(),
        })
    }

    async fn cancel(&self, booking_id: BookingId) -> Result<(), RemoteError> {
        let _: Value = self
            .call("saleRemove/", &[("saleId", booking_id.to_string())])
            .await?;
        Ok(())
    }

    async fn approve(
        &self,
        booking_id: BookingId,
        secret: &Secret,
        buyer: &Buyer,
    ) -> Result<Vec<Ticket>, RemoteError> {
        let data: SaleData = self
            .call(
                "saleApproved/",
                &[
                    ("saleId", booking_id.to_string()),
                    ("saleExternalId", secret.as_str().to_string()),
                    ("salePerson", buyer.phone.clone()),
                ],
            )
            .await?;
        Ok(data.tickets())
    }

    async fn query(&self, booking_id: BookingId) -> Result<BookingSnapshot, RemoteError> {
        let data: SaleData = self
            .call("saleInfo/", &[("saleId", booking_id.to_string())])
            .await?;
        let paid_on_remote = data.is_paid();
        Ok(BookingSnapshot {
            tickets: data.tickets(),
            paid_on_remote,
        })
    }
}
