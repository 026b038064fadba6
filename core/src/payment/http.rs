//! HTTP payment provider.
//!
//! Speaks a minimal JSON protocol:
//!
//! - `POST {base}/charges` with `{amount, currency, method, card | pix_key, metadata}`,
//!   answering `{id, status, failure_message?}`
//! - `POST {base}/refunds` with `{charge, amount, metadata}`, answering `{id, status}`
//!
//! Requests carry `Authorization: Bearer {secret}` and an `Idempotency-Key` header. Timeouts
//! are enforced by the caller's retry policy, not by the HTTP client.

use super::provider::{
    Charge, ChargeRequest, PaymentDetails, PaymentProvider, ProviderError, ProviderFuture,
    RefundReceipt, RefundRequest,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const MAX_ERROR_BODY: usize = 512;

/// Payment provider reached over HTTPS.
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
    secret: String,
}

impl HttpPaymentProvider {
    /// Creates a provider client.
    #[must_use]
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, secret)
    }

    /// Creates a provider client using an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    async fn post<B, R>(&self, path: &str, idempotency_key: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            let body: ProviderResponse = response.json().await.map_err(transport_error)?;
            return Err(ProviderError::Declined {
                reason: body.failure_message.unwrap_or_else(|| "payment declined".to_string()),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: truncate_on_char_boundary(body, MAX_ERROR_BODY),
            });
        }

        response.json().await.map_err(transport_error)
    }
}

impl std::fmt::Debug for HttpPaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Cuts `body` to at most `max` bytes without splitting a character.
fn truncate_on_char_boundary(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    amount: u64,
    currency: &'a str,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<CardBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pix_key: Option<&'a str>,
    metadata: Metadata,
}

#[derive(Serialize)]
struct CardBody<'a> {
    number: &'a str,
    exp_month: u8,
    exp_year: u16,
    cvc: &'a str,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    charge: &'a str,
    amount: u64,
    metadata: Metadata,
}

#[derive(Serialize)]
struct Metadata {
    payment_id: String,
}

#[derive(Deserialize)]
struct ProviderResponse {
    id: Option<String>,
    status: String,
    failure_message: Option<String>,
}

impl PaymentProvider for HttpPaymentProvider {
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> ProviderFuture<'a, Charge> {
        Box::pin(async move {
            let (card, pix_key) = match &request.details {
                PaymentDetails::Card {
                    number,
                    exp_month,
                    exp_year,
                    cvc,
                } => (
                    Some(CardBody {
                        number,
                        exp_month: *exp_month,
                        exp_year: *exp_year,
                        cvc,
                    }),
                    None,
                ),
                PaymentDetails::Pix { key } => (None, Some(key.as_str())),
            };
            let body = ChargeBody {
                amount: request.amount.cents(),
                currency: &request.currency,
                method: request.details.method().as_str(),
                card,
                pix_key,
                metadata: Metadata {
                    payment_id: request.payment_id.to_string(),
                },
            };

            let response: ProviderResponse = self
                .post("/charges", &request.idempotency_key, &body)
                .await?;

            match (response.status.as_str(), response.id) {
                ("succeeded", Some(id)) => Ok(Charge { provider_ref: id }),
                (status, _) => Err(ProviderError::Declined {
                    reason: response
                        .failure_message
                        .unwrap_or_else(|| format!("charge ended in status {status}")),
                }),
            }
        })
    }

    fn refund<'a>(&'a self, request: &'a RefundRequest) -> ProviderFuture<'a, RefundReceipt> {
        Box::pin(async move {
            let body = RefundBody {
                charge: &request.provider_ref,
                amount: request.amount.cents(),
                metadata: Metadata {
                    payment_id: request.payment_id.to_string(),
                },
            };

            let response: ProviderResponse = self
                .post("/refunds", &request.idempotency_key, &body)
                .await?;

            match (response.status.as_str(), response.id) {
                ("succeeded" | "pending", Some(id)) => Ok(RefundReceipt { refund_ref: id }),
                (status, _) => Err(ProviderError::Declined {
                    reason: response
                        .failure_message
                        .unwrap_or_else(|| format!("refund ended in status {status}")),
                }),
            }
        })
    }
}
