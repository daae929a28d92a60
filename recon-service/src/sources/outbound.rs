//! Outbound payment adapter: contractor payouts per sub-account, keyed back
//! to NVC codes through the payment reference.

use super::{FetchWindow, SourceError};
use crate::sources::processor::ProcessorFeed;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::retry::{RetryPolicy, retry_source_call};
use tokio::time::Instant;
use tracing::{info, warn};

/// One outbound payment as delivered by the processor.
#[derive(Debug, Clone)]
pub struct OutboundPaymentRecord {
    pub id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub payment_date: Option<NaiveDate>,
    /// `{tenant}.{nvc_code}`, e.g. `omnicomtbwa.NVC7KVAR66CR`.
    pub payment_reference: String,
    pub recipient: Option<String>,
    pub recipient_country: Option<String>,
}

impl OutboundPaymentRecord {
    /// NVC code extracted from the payment reference. References without
    /// the `tenant.NVC…` shape yield nothing; those rows are cached but
    /// never projected onto reconciliation records.
    pub fn nvc_code(&self) -> Option<&str> {
        let (_, rest) = self.payment_reference.split_once('.')?;
        rest.starts_with("NVC").then_some(rest)
    }

    pub fn tenant(&self) -> Option<&str> {
        let (tenant, rest) = self.payment_reference.split_once('.')?;
        rest.starts_with("NVC").then_some(tenant)
    }
}

pub struct OutboundAdapter<P> {
    feed: P,
    account_ids: Vec<String>,
    retry: RetryPolicy,
}

impl<P: ProcessorFeed> OutboundAdapter<P> {
    pub fn new(feed: P, account_ids: Vec<String>, max_retries: u32) -> Self {
        Self {
            feed,
            account_ids,
            retry: RetryPolicy::with_max_retries(max_retries),
        }
    }

    pub async fn fetch(
        &self,
        window: FetchWindow,
        deadline: Option<Instant>,
    ) -> Result<Vec<OutboundPaymentRecord>, SourceError> {
        let cutoff = window.cutoff_date();
        let mut out = Vec::new();
        let mut last_err: Option<SourceError> = None;
        let mut any_ok = false;

        for account_id in &self.account_ids {
            let result = retry_source_call(
                &self.retry,
                deadline,
                &format!("payments:{account_id}"),
                || self.feed.fetch_payments(account_id),
            )
            .await;

            match result {
                Ok(payments) => {
                    any_ok = true;
                    let with_nvc = payments.iter().filter(|p| p.nvc_code().is_some()).count();
                    info!(
                        account_id = %account_id,
                        fetched = payments.len(),
                        with_nvc,
                        "fetched outbound payments"
                    );
                    out.extend(
                        payments
                            .into_iter()
                            .filter(|p| p.payment_date.map(|d| d >= cutoff).unwrap_or(true)),
                    );
                }
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "outbound payments fetch failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(err) if !any_ok && !self.account_ids.is_empty() => Err(err),
            _ => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(reference: &str) -> OutboundPaymentRecord {
        OutboundPaymentRecord {
            id: "MC1".to_string(),
            account_id: "859152".to_string(),
            amount: Decimal::new(100000, 2),
            currency: "USD".to_string(),
            status: "Cleared".to_string(),
            payment_date: None,
            payment_reference: reference.to_string(),
            recipient: None,
            recipient_country: None,
        }
    }

    #[test]
    fn extracts_nvc_from_reference() {
        let p = payment("omnicomtbwa.NVC7KVAR66CR");
        assert_eq!(p.nvc_code(), Some("NVC7KVAR66CR"));
        assert_eq!(p.tenant(), Some("omnicomtbwa"));
    }

    #[test]
    fn rejects_references_without_nvc() {
        assert_eq!(payment("freeform reference").nvc_code(), None);
        assert_eq!(payment("omnicomtbwa.INV-1234").nvc_code(), None);
        assert_eq!(payment("").nvc_code(), None);
    }
}
