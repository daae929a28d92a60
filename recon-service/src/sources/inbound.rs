//! Inbound funding adapter: received lump-sum payments per sub-account.

use super::{FetchWindow, SourceError};
use crate::matcher::lump_sum::parse_payer_name;
use crate::sources::processor::ProcessorFeed;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::retry::{RetryPolicy, retry_source_call};
use tokio::time::Instant;
use tracing::{info, warn};

/// One received payment as delivered by the processor.
#[derive(Debug, Clone)]
pub struct ReceivedPaymentRecord {
    pub id: String,
    pub account_id: String,
    pub account_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_date: Option<NaiveDate>,
    pub payment_status: String,
    pub raw_info: String,
}

impl ReceivedPaymentRecord {
    /// Payer name parsed out of the free-text bank info field.
    pub fn payer_name(&self) -> String {
        parse_payer_name(&self.raw_info)
    }
}

pub struct InboundAdapter<P> {
    feed: P,
    account_ids: Vec<String>,
    retry: RetryPolicy,
}

impl<P: ProcessorFeed> InboundAdapter<P> {
    pub fn new(feed: P, account_ids: Vec<String>, max_retries: u32) -> Self {
        Self {
            feed,
            account_ids,
            retry: RetryPolicy::with_max_retries(max_retries),
        }
    }

    /// Fetch received payments across all configured sub-accounts, dropping
    /// rows outside the lookback window. Per-account failures are isolated.
    pub async fn fetch(
        &self,
        window: FetchWindow,
        deadline: Option<Instant>,
    ) -> Result<Vec<ReceivedPaymentRecord>, SourceError> {
        let cutoff = window.cutoff_date();
        let mut out = Vec::new();
        let mut last_err: Option<SourceError> = None;
        let mut any_ok = false;

        for account_id in &self.account_ids {
            let result = retry_source_call(
                &self.retry,
                deadline,
                &format!("received_payments:{account_id}"),
                || self.feed.fetch_received(account_id),
            )
            .await;

            match result {
                Ok(payments) => {
                    any_ok = true;
                    let before = payments.len();
                    out.extend(
                        payments
                            .into_iter()
                            .filter(|p| p.payment_date.map(|d| d >= cutoff).unwrap_or(true)),
                    );
                    info!(account_id = %account_id, fetched = before, "fetched received payments");
                }
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "received payments fetch failed");
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

    #[test]
    fn payer_name_strips_bank_noise() {
        let rp = ReceivedPaymentRecord {
            id: "P1".to_string(),
            account_id: "859152".to_string(),
            account_name: "Omni BBDO".to_string(),
            amount: Decimal::new(450000, 2),
            currency: "USD".to_string(),
            payment_date: None,
            payment_status: "Cleared".to_string(),
            raw_info: "BBDO USA LLC DES:ACH PMTS ID:00012345".to_string(),
        };
        assert_eq!(rp.payer_name(), "BBDO USA LLC");
    }
}
