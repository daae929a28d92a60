//! Payment processor API client.
//!
//! Authenticates with a login-id/api-key pair for a short-lived bearer
//! token and pulls received (inbound) and outgoing (outbound) payments per
//! sub-account. The processor itself is an external collaborator; only this
//! contract matters here.

use super::SourceError;
use crate::config::ProcessorConfig;
use crate::sources::inbound::ReceivedPaymentRecord;
use crate::sources::outbound::OutboundPaymentRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

/// Transport seam for the processor API.
#[async_trait]
pub trait ProcessorFeed: Send + Sync {
    async fn fetch_received(
        &self,
        account_id: &str,
    ) -> Result<Vec<ReceivedPaymentRecord>, SourceError>;

    async fn fetch_payments(
        &self,
        account_id: &str,
    ) -> Result<Vec<OutboundPaymentRecord>, SourceError>;
}

#[async_trait]
impl<T: ProcessorFeed + ?Sized> ProcessorFeed for std::sync::Arc<T> {
    async fn fetch_received(
        &self,
        account_id: &str,
    ) -> Result<Vec<ReceivedPaymentRecord>, SourceError> {
        (**self).fetch_received(account_id).await
    }

    async fn fetch_payments(
        &self,
        account_id: &str,
    ) -> Result<Vec<OutboundPaymentRecord>, SourceError> {
        (**self).fetch_payments(account_id).await
    }
}

// Tokens live ~15 minutes; refresh with a margin so in-flight requests
// never race expiry.
const TOKEN_LIFETIME: Duration = Duration::from_secs(800);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    id: String,
    attributes: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedAttributes {
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_date: Option<NaiveDate>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    info_to_account_owner: Option<String>,
    #[serde(default)]
    account_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingAttributes {
    #[serde(default)]
    payment_amount: Option<Decimal>,
    #[serde(default)]
    payment_currency: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_date: Option<NaiveDate>,
    #[serde(default)]
    payment_reference: Option<String>,
    #[serde(default)]
    recipient_details: Option<RecipientDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipientDetails {
    #[serde(default)]
    bank_account_name: Option<String>,
    #[serde(default)]
    bank_account_country: Option<String>,
}

pub struct HttpProcessorFeed {
    client: reqwest::Client,
    base_url: String,
    login_id: String,
    api_key: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl HttpProcessorFeed {
    pub fn new(config: &ProcessorConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(SourceError::transport)?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            login_id: config.login_id.clone(),
            api_key: config.api_key.clone(),
            token: Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<String, SourceError> {
        let mut guard = self.token.lock().await;
        if let Some((token, expires)) = guard.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let resp: LoginResponse = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&serde_json::json!({
                "loginId": self.login_id,
                "apiKey": self.api_key,
            }))
            .send()
            .await
            .map_err(SourceError::from_reqwest)?
            .error_for_status()
            .map_err(SourceError::from_reqwest)?
            .json()
            .await
            .map_err(|e| SourceError::malformed(anyhow::anyhow!("login response: {e}")))?;

        let token = resp
            .token
            .or(resp.access_token)
            .ok_or_else(|| SourceError::auth(anyhow::anyhow!("login returned no token")))?;

        info!("processor authentication succeeded");
        *guard = Some((token.clone(), Instant::now() + TOKEN_LIFETIME));
        Ok(token)
    }

    async fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Envelope<T>, SourceError> {
        let token = self.bearer_token().await?;
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(SourceError::from_reqwest)?
            .error_for_status()
            .map_err(SourceError::from_reqwest)?
            .json()
            .await
            .map_err(|e| SourceError::malformed(anyhow::anyhow!("{path}: {e}")))
    }
}

#[async_trait]
impl ProcessorFeed for HttpProcessorFeed {
    async fn fetch_received(
        &self,
        account_id: &str,
    ) -> Result<Vec<ReceivedPaymentRecord>, SourceError> {
        let envelope: Envelope<ReceivedAttributes> = self
            .get_envelope(&format!("/accounts/{account_id}/receivedPayments"))
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|r| ReceivedPaymentRecord {
                id: r.id,
                account_id: account_id.to_string(),
                account_name: r.attributes.account_name.unwrap_or_default(),
                amount: r.attributes.amount.unwrap_or_default(),
                currency: r.attributes.currency.unwrap_or_else(|| "USD".to_string()),
                payment_date: r.attributes.payment_date,
                payment_status: r.attributes.payment_status.unwrap_or_default(),
                raw_info: r.attributes.info_to_account_owner.unwrap_or_default(),
            })
            .collect())
    }

    async fn fetch_payments(
        &self,
        account_id: &str,
    ) -> Result<Vec<OutboundPaymentRecord>, SourceError> {
        let envelope: Envelope<OutgoingAttributes> = self
            .get_envelope(&format!("/accounts/{account_id}/payments"))
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|r| {
                let recipient = r.attributes.recipient_details.unwrap_or(RecipientDetails {
                    bank_account_name: None,
                    bank_account_country: None,
                });
                OutboundPaymentRecord {
                    id: r.id,
                    account_id: account_id.to_string(),
                    amount: r.attributes.payment_amount.unwrap_or_default(),
                    currency: r.attributes.payment_currency.unwrap_or_default(),
                    status: r.attributes.payment_status.unwrap_or_default(),
                    payment_date: r.attributes.payment_date,
                    payment_reference: r.attributes.payment_reference.unwrap_or_default(),
                    recipient: recipient.bank_account_name,
                    recipient_country: recipient.bank_account_country,
                }
            })
            .collect())
    }
}
