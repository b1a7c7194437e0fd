//! Payment gateway redirect flow: initiate, send the user to the gateway,
//! then settle whichever outcome route the gateway returned them to.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::network::ApiClient;
use crate::network::transport::ApiRequest;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    pub booking_id: Option<String>,
    pub total_amount: f64,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInitiation {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub tran_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub payment_id: Option<String>,
}

impl PaymentInitiation {
    /// Where to send the user, when the gateway accepted the initiation.
    pub fn redirect_url(&self) -> Option<&str> {
        self.gateway_url.as_deref().filter(|_| self.success)
    }
}

/// The gateway's verdict, read from the route it returned the user to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success {
        tran_id: String,
        val_id: Option<String>,
    },
    Failed {
        tran_id: Option<String>,
    },
    Cancelled {
        tran_id: Option<String>,
    },
}

impl PaymentOutcome {
    /// Parses a `/payment/success|fail|cancel` return URL.
    pub fn from_return_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|err| ClientError::validation("url", format!("Invalid return URL: {err}")))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, value)| key == name && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        };
        let tran_id = param("tran_id");

        let path = url.path().trim_end_matches('/');
        if path.ends_with("/payment/success") {
            let tran_id = tran_id
                .ok_or_else(|| ClientError::validation("tran_id", "Invalid payment transaction"))?;
            Ok(PaymentOutcome::Success {
                tran_id,
                val_id: param("val_id").or_else(|| param("value_a")),
            })
        } else if path.ends_with("/payment/fail") {
            Ok(PaymentOutcome::Failed { tran_id })
        } else if path.ends_with("/payment/cancel") {
            Ok(PaymentOutcome::Cancelled { tran_id })
        } else {
            Err(ClientError::validation(
                "url",
                format!("{path} is not a payment outcome route"),
            ))
        }
    }
}

/// Settled state of a payment after its outcome was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentResult {
    Confirmed { tran_id: String },
    /// The gateway said success but the backend could not validate it.
    Rejected { tran_id: String },
    Failed { tran_id: Option<String> },
    Cancelled { tran_id: Option<String> },
}

#[derive(Serialize)]
struct ValidateBody<'a> {
    tran_id: &'a str,
    val_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ValidateReply {
    #[serde(default)]
    success: bool,
}

pub struct PaymentsApi<'a> {
    client: &'a ApiClient,
}

impl<'a> PaymentsApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn initiate(&self, payment: &PaymentRequest) -> Result<PaymentInitiation> {
        if !(payment.total_amount > 0.0) {
            return Err(ClientError::validation(
                "total_amount",
                "Amount must be greater than zero",
            ));
        }
        let request = ApiRequest::post("/payments/initiate/").json(payment)?;
        let initiation: PaymentInitiation = self.client.fetch(request).await?;
        if initiation.redirect_url().is_none() {
            log::warn!("Payment gateway did not accept the initiation");
        }
        Ok(initiation)
    }

    /// Validates a success outcome with the backend; other outcomes settle
    /// locally.
    pub async fn settle(&self, outcome: &PaymentOutcome) -> Result<PaymentResult> {
        match outcome {
            PaymentOutcome::Success { tran_id, val_id } => {
                let request = ApiRequest::post("/payments/validate/").json(&ValidateBody {
                    tran_id,
                    val_id: val_id.as_deref(),
                })?;
                let reply: ValidateReply = self.client.fetch(request).await?;
                Ok(if reply.success {
                    PaymentResult::Confirmed {
                        tran_id: tran_id.clone(),
                    }
                } else {
                    log::warn!("Payment {tran_id} failed backend validation");
                    PaymentResult::Rejected {
                        tran_id: tran_id.clone(),
                    }
                })
            }
            PaymentOutcome::Failed { tran_id } => Ok(PaymentResult::Failed {
                tran_id: tran_id.clone(),
            }),
            PaymentOutcome::Cancelled { tran_id } => Ok(PaymentResult::Cancelled {
                tran_id: tran_id.clone(),
            }),
        }
    }
}

fn optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
