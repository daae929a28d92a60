//! Email source: fetches remittance emails through the mail gateway and
//! runs the CSV parser over their attachments.

use super::{FetchWindow, SourceError};
use crate::config::{EmailFeedConfig, EmailSourceConfig};
use crate::parser::{self, ParsedRemittance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use service_core::retry::{RetryPolicy, retry_source_call};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Raw message as delivered by the mail gateway.
#[derive(Debug, Clone)]
pub struct FetchedEmail {
    pub id: String,
    pub source: String,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub attachments: Vec<FetchedAttachment>,
}

#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Transport seam for the (out of scope) mail fetching layer.
#[async_trait]
pub trait EmailFeed: Send + Sync {
    async fn fetch(
        &self,
        source_key: &str,
        query: &str,
        window: FetchWindow,
        max_results: u32,
    ) -> Result<Vec<FetchedEmail>, SourceError>;
}

/// One remittance email after parsing: zero or more parsed attachments plus
/// the manual-review verdict.
#[derive(Debug, Clone)]
pub struct RemittanceEmail {
    pub id: String,
    pub source: String,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub attachment_names: Vec<String>,
    pub manual_review: bool,
    pub remittances: Vec<ParsedRemittance>,
    pub parse_failures: u32,
}

/// Adapter over an [`EmailFeed`]: iterates configured sources, parses CSV
/// attachments, and flags what it cannot decode for manual review.
pub struct EmailAdapter<F> {
    feed: F,
    sources: HashMap<String, EmailSourceConfig>,
    max_per_source: u32,
    retry: RetryPolicy,
}

impl<F: EmailFeed> EmailAdapter<F> {
    pub fn new(feed: F, config: &EmailFeedConfig) -> Self {
        Self {
            feed,
            sources: config.sources.clone(),
            max_per_source: config.max_per_source,
            retry: RetryPolicy::with_max_retries(config.max_retries),
        }
    }

    /// Fetch and parse all configured sources. Per-source transport errors
    /// are isolated; the call fails only when every source failed.
    pub async fn fetch(
        &self,
        window: FetchWindow,
        deadline: Option<Instant>,
    ) -> Result<Vec<RemittanceEmail>, SourceError> {
        let mut out = Vec::new();
        let mut last_err: Option<SourceError> = None;
        let mut any_ok = false;

        for (key, source) in &self.sources {
            let fetched = retry_source_call(&self.retry, deadline, &format!("emails:{key}"), || {
                self.feed
                    .fetch(key, &source.query, window, self.max_per_source)
            })
            .await;

            match fetched {
                Ok(emails) => {
                    any_ok = true;
                    info!(source = %key, count = emails.len(), "fetched remittance emails");
                    for email in emails {
                        out.push(self.parse_email(email, source.manual_review));
                    }
                }
                Err(e) => {
                    warn!(source = %key, error = %e, "email source failed, continuing with others");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(err) if !any_ok && !self.sources.is_empty() => Err(err),
            _ => Ok(out),
        }
    }

    fn parse_email(&self, email: FetchedEmail, image_only_source: bool) -> RemittanceEmail {
        let attachment_names: Vec<String> = email
            .attachments
            .iter()
            .map(|a| a.filename.clone())
            .collect();

        let mut remittances = Vec::new();
        let mut parse_failures = 0;

        if !image_only_source {
            for att in &email.attachments {
                if !att.filename.to_lowercase().ends_with(".csv") {
                    continue;
                }
                match parser::parse_remittance_csv(&att.data, &email.subject) {
                    Some(parsed) => remittances.push(parsed),
                    None => {
                        parse_failures += 1;
                        warn!(
                            email_id = %email.id,
                            attachment = %att.filename,
                            "undecodable remittance attachment"
                        );
                    }
                }
            }
        }

        // Image-only sources and emails with nothing parseable go to a human.
        let manual_review = image_only_source || remittances.is_empty();

        RemittanceEmail {
            id: email.id,
            source: email.source,
            subject: email.subject,
            sender: email.sender,
            date: email.date,
            attachment_names,
            manual_review,
            remittances,
            parse_failures,
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP gateway client
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    id: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Vec<GatewayAttachment>,
}

#[derive(Debug, Deserialize)]
struct GatewayAttachment {
    filename: String,
    #[serde(default)]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GatewayListResponse {
    #[serde(default)]
    messages: Vec<GatewayMessage>,
}

/// Mail gateway client: lists messages per source query, then pulls each
/// attachment as raw bytes.
pub struct HttpEmailFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmailFeed {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(SourceError::transport)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmailFeed for HttpEmailFeed {
    async fn fetch(
        &self,
        source_key: &str,
        query: &str,
        window: FetchWindow,
        max_results: u32,
    ) -> Result<Vec<FetchedEmail>, SourceError> {
        let after = window.cutoff_date().format("%Y/%m/%d").to_string();
        let list: GatewayListResponse = self
            .client
            .get(format!("{}/messages", self.base_url))
            .query(&[
                ("source", source_key),
                ("query", query),
                ("after", after.as_str()),
                ("max_results", &max_results.to_string()),
            ])
            .send()
            .await
            .map_err(SourceError::from_reqwest)?
            .error_for_status()
            .map_err(SourceError::from_reqwest)?
            .json()
            .await
            .map_err(|e| SourceError::malformed(anyhow::anyhow!("message list: {e}")))?;

        let mut out = Vec::with_capacity(list.messages.len());
        for msg in list.messages {
            let mut attachments = Vec::with_capacity(msg.attachments.len());
            for att in &msg.attachments {
                let data = self
                    .client
                    .get(format!(
                        "{}/messages/{}/attachments/{}",
                        self.base_url, msg.id, att.filename
                    ))
                    .send()
                    .await
                    .map_err(SourceError::from_reqwest)?
                    .error_for_status()
                    .map_err(SourceError::from_reqwest)?
                    .bytes()
                    .await
                    .map_err(SourceError::from_reqwest)?;
                attachments.push(FetchedAttachment {
                    filename: att.filename.clone(),
                    mime_type: att.mime_type.clone(),
                    data: data.to_vec(),
                });
            }
            out.push(FetchedEmail {
                id: msg.id,
                source: source_key.to_string(),
                subject: msg.subject,
                sender: msg.from,
                date: msg.date,
                attachments,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFeed {
        emails: Vec<FetchedEmail>,
    }

    #[async_trait]
    impl EmailFeed for StaticFeed {
        async fn fetch(
            &self,
            source_key: &str,
            _query: &str,
            _window: FetchWindow,
            _max_results: u32,
        ) -> Result<Vec<FetchedEmail>, SourceError> {
            Ok(self
                .emails
                .iter()
                .filter(|e| e.source == source_key)
                .cloned()
                .collect())
        }
    }

    fn config_with(keys: &[(&str, bool)]) -> EmailFeedConfig {
        let mut sources = HashMap::new();
        for (key, manual) in keys {
            sources.insert(
                key.to_string(),
                EmailSourceConfig {
                    query: format!("from:{key}"),
                    description: String::new(),
                    manual_review: *manual,
                },
            );
        }
        EmailFeedConfig {
            gateway_url: "http://gateway".to_string(),
            sources,
            timeout_secs: 30,
            max_retries: 0,
            max_per_source: 50,
        }
    }

    const CSV: &str = "Account Number: V1\n\
Payment date: 20260208\n\
Payment Amount : 600.00\n\
Ref Number\tInv Nbr\tInvoice description\tCompany Statement Name\tInv Date\tInv Orig Amt\tAmt Pd\tDisc Amt\n\
REF1\tNVC7KAAA\tCat Ventura\tOmni Prod. LLC\t20260129\t600.00\t600.00\t0.00\n";

    fn email(id: &str, source: &str, attachments: Vec<FetchedAttachment>) -> FetchedEmail {
        FetchedEmail {
            id: id.to_string(),
            source: source.to_string(),
            subject: "On behalf of BBDO USA LLC".to_string(),
            sender: "notify@agency.example".to_string(),
            date: None,
            attachments,
        }
    }

    fn csv_attachment() -> FetchedAttachment {
        FetchedAttachment {
            filename: "Remittance.csv".to_string(),
            mime_type: "text/csv".to_string(),
            data: CSV.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn parses_csv_attachments() {
        let feed = StaticFeed {
            emails: vec![email("E1", "oasys", vec![csv_attachment()])],
        };
        let adapter = EmailAdapter::new(feed, &config_with(&[("oasys", false)]));

        let batch = adapter.fetch(FetchWindow::days(60), None).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch[0].manual_review);
        assert_eq!(batch[0].remittances.len(), 1);
        assert_eq!(batch[0].remittances[0].lines[0].nvc_code, "NVC7KAAA");
        assert_eq!(
            batch[0].remittances[0].agency.as_deref(),
            Some("BBDO USA LLC")
        );
    }

    #[tokio::test]
    async fn image_only_source_is_manual_review() {
        let feed = StaticFeed {
            emails: vec![email(
                "E2",
                "ldn_gss",
                vec![FetchedAttachment {
                    filename: "scan.png".to_string(),
                    mime_type: "image/png".to_string(),
                    data: vec![0x89, 0x50],
                }],
            )],
        };
        let adapter = EmailAdapter::new(feed, &config_with(&[("ldn_gss", true)]));

        let batch = adapter.fetch(FetchWindow::days(60), None).await.unwrap();
        assert!(batch[0].manual_review);
        assert!(batch[0].remittances.is_empty());
    }

    #[tokio::test]
    async fn undecodable_attachment_flags_manual_review() {
        let feed = StaticFeed {
            emails: vec![email(
                "E3",
                "oasys",
                vec![FetchedAttachment {
                    filename: "broken.csv".to_string(),
                    mime_type: "text/csv".to_string(),
                    data: b"nothing remittance shaped".to_vec(),
                }],
            )],
        };
        let adapter = EmailAdapter::new(feed, &config_with(&[("oasys", false)]));

        let batch = adapter.fetch(FetchWindow::days(60), None).await.unwrap();
        assert!(batch[0].manual_review);
        assert_eq!(batch[0].parse_failures, 1);
    }
}
