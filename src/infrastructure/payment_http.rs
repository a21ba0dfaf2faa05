//! HTTP adapter for the Payment Gateway (YooKassa API v3).

use crate::config::PaymentSettings;
use crate::domain::money::Money;
use crate::domain::ports::{PaymentClient, PaymentRequest};
use crate::domain::sale::{PaymentOrder, PaymentOrderId, PaymentStatus};
use crate::error::{RemoteError, SaleError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const IDEMPOTENCE_HEADER: &str = "Idempotence-Key";

#[derive(Debug, Serialize)]
struct AmountBody {
    value: String,
    currency: String,
}

#[derive(Debug, Serialize)]
struct ConfirmationBody {
    #[serde(rename = "type")]
    kind: &'static str,
    return_url: String,
}

#[derive(Debug, Serialize)]
struct ReceiptItem {
    description: String,
    quantity: &'static str,
    amount: AmountBody,
    vat_code: u8,
    payment_mode: &'static str,
    payment_subject: &'static str,
}

#[derive(Debug, Serialize)]
struct Customer {
    email: String,
}

#[derive(Debug, Serialize)]
struct Receipt {
    customer: Customer,
    items: Vec<ReceiptItem>,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody {
    amount: AmountBody,
    capture: bool,
    confirmation: ConfirmationBody,
    description: String,
    receipt: Receipt,
}

#[derive(Debug, Serialize)]
struct RefundBody {
    amount: AmountBody,
    payment_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentBody {
    id: String,
    status: String,
    #[serde(default)]
    confirmation: Option<ConfirmationReply>,
    #[serde(default)]
    refunded_amount: Option<AmountReply>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationReply {
    #[serde(default)]
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AmountReply {
    value: Decimal,
}

#[derive(Debug, Deserialize)]
struct RefundReply {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

impl PaymentBody {
    /// A payment with any refunded amount is treated as cancelled.
    fn status(&self) -> Result<PaymentStatus, RemoteError> {
        if self
            .refunded_amount
            .as_ref()
            .is_some_and(|refunded| refunded.value > Decimal::ZERO)
        {
            return Ok(PaymentStatus::Canceled);
        }
        match self.status.as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "waiting_for_capture" => Ok(PaymentStatus::AwaitingCapture),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(RemoteError::Decode(format!("unknown payment status {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct HttpPaymentClient {
    client: Client,
    base_url: String,
    shop_id: String,
    secret_key: String,
    return_url: String,
    currency: String,
}

impl HttpPaymentClient {
    pub fn new(settings: &PaymentSettings) -> Result<Self, SaleError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SaleError::Internal(Box::new(e)))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            shop_id: settings.shop_id.clone(),
            secret_key: settings.secret_key.clone(),
            return_url: settings.return_url.clone(),
            currency: settings.currency.clone(),
        })
    }

    fn amount(&self, value: Money) -> AmountBody {
        AmountBody {
            value: value.to_minor_string(),
            currency: self.currency.clone(),
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.shop_id, Some(&self.secret_key))
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        // Auth and rate-limit failures say nothing about the payment itself.
        if status.is_client_error()
            && status != StatusCode::UNAUTHORIZED
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            let error: GatewayErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(RemoteError::Rejected {
                code: error.code,
                message: error.description,
            });
        }
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentOrder, RemoteError> {
        let amount = request.amount.money();
        let body = CreatePaymentBody {
            amount: self.amount(amount),
            capture: true,
            confirmation: ConfirmationBody {
                kind: "redirect",
                return_url: format!("{}?secret={}", self.return_url, request.idempotency_key),
            },
            description: request.description.clone(),
            receipt: Receipt {
                customer: Customer {
                    email: request.customer_email.clone(),
                },
                items: vec![ReceiptItem {
                    description: request.description.clone(),
                    quantity: "1",
                    amount: self.amount(amount),
                    vat_code: 1,
                    payment_mode: "full_payment",
                    payment_subject: "service",
                }],
            },
        };

        let response = self
            .request(self.client.post(format!("{}/payments", self.base_url)))
            .header(IDEMPOTENCE_HEADER, &request.idempotency_key)
            .json(&body)
            .send()
            .await?;
        let payment: PaymentBody = Self::read(response).await?;
        debug!(payment_id = %payment.id, status = %payment.status, "payment created");

        if payment.status != "pending" {
            return Err(RemoteError::Rejected {
                code: payment.status,
                message: format!("payment {} was not accepted", payment.id),
            });
        }
        let confirmation_url = payment
            .confirmation
            .and_then(|c| c.confirmation_url)
            .ok_or_else(|| RemoteError::Decode("payment has no confirmation url".to_string()))?;
        Ok(PaymentOrder {
            id: PaymentOrderId(payment.id),
            confirmation_url,
        })
    }

    async fn check_status(&self, order_id: &PaymentOrderId) -> Result<PaymentStatus, RemoteError> {
        let response = self
            .request(
                self.client
                    .get(format!("{}/payments/{}", self.base_url, order_id)),
            )
            .send()
            .await?;
        let payment: PaymentBody = Self::read(response).await?;
        payment.status()
    }

    async fn refund(
        &self,
        order_id: &PaymentOrderId,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<(), RemoteError> {
        let body = RefundBody {
            amount: self.amount(amount),
            payment_id: order_id.0.clone(),
        };
        let response = self
            .request(self.client.post(format!("{}/refunds", self.base_url)))
            .header(IDEMPOTENCE_HEADER, idempotency_key)
            .json(&body)
            .send()
            .await?;
        let refund: RefundReply = Self::read(response).await?;
        if refund.status == "succeeded" {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                code: refund.status,
                message: format!("refund of payment {order_id} did not succeed"),
            })
        }
    }
}
