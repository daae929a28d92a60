//! Invoice adapter: read-only rows from the operations database.

use super::{FetchWindow, SourceError};
use crate::config::InvoiceFeedConfig;
use crate::models::InvoiceStatus;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::retry::{RetryPolicy, retry_source_call};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// One invoice line from the operations database. `nvc_code` is the
/// source's `invoice_id` column.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRecord {
    pub nvc_code: String,
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: i64,
    pub tenant: String,
    pub payrun_id: Option<i64>,
    pub payrun_reference: Option<String>,
    pub paid_date: Option<NaiveDate>,
    pub processing_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
}

impl InvoiceRecord {
    pub fn status_label(&self) -> &'static str {
        InvoiceStatus::from_code(self.status).as_str()
    }

    /// Tenants arrive as full domains; the short slug is what operators see.
    pub fn tenant_slug(&self) -> String {
        self.tenant.trim_end_matches(".worksuite.com").to_string()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PayrunRecord {
    pub id: i64,
    pub reference: Option<String>,
    pub tenant: String,
    pub status: i64,
    pub payment_count: i64,
    pub total_amount: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Transport seam for the operations database.
#[async_trait]
pub trait InvoiceFeed: Send + Sync {
    async fn fetch_invoices(&self, window: FetchWindow) -> Result<Vec<InvoiceRecord>, SourceError>;
    async fn fetch_payruns(&self, window: FetchWindow) -> Result<Vec<PayrunRecord>, SourceError>;
}

pub struct InvoiceAdapter<F> {
    feed: F,
    retry: RetryPolicy,
}

impl<F: InvoiceFeed> InvoiceAdapter<F> {
    pub fn new(feed: F, max_retries: u32) -> Self {
        Self {
            feed,
            retry: RetryPolicy::with_max_retries(max_retries),
        }
    }

    pub async fn fetch_invoices(
        &self,
        window: FetchWindow,
        deadline: Option<Instant>,
    ) -> Result<Vec<InvoiceRecord>, SourceError> {
        retry_source_call(&self.retry, deadline, "invoices", || {
            self.feed.fetch_invoices(window)
        })
        .await
    }

    pub async fn fetch_payruns(
        &self,
        window: FetchWindow,
        deadline: Option<Instant>,
    ) -> Result<Vec<PayrunRecord>, SourceError> {
        retry_source_call(&self.retry, deadline, "payruns", || {
            self.feed.fetch_payruns(window)
        })
        .await
    }
}

/// Read-only Postgres client for the operations database. The tunnel that
/// fronts the database in production is out of scope; this speaks to
/// whatever host the configured URL points at.
pub struct PgInvoiceFeed {
    pool: PgPool,
    tenants: Vec<String>,
}

impl PgInvoiceFeed {
    /// Lazy pool: connections are established per cycle, so a database
    /// outage degrades that cycle instead of failing startup.
    pub fn connect(config: &InvoiceFeedConfig) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.database_url)
            .map_err(SourceError::auth)?;
        info!(tenants = config.tenants.len(), "invoice database pool configured");
        Ok(Self {
            pool,
            tenants: config.tenants.clone(),
        })
    }
}

#[async_trait]
impl InvoiceFeed for PgInvoiceFeed {
    async fn fetch_invoices(&self, window: FetchWindow) -> Result<Vec<InvoiceRecord>, SourceError> {
        sqlx::query_as::<_, InvoiceRecord>(
            r#"
            SELECT
                p.invoice_id AS nvc_code,
                p.number AS invoice_number,
                p.total_amount,
                p.currency,
                p.status::BIGINT AS status,
                p.tenant,
                p.payrun_id::BIGINT AS payrun_id,
                pr.reference AS payrun_reference,
                p.paid_date,
                p.processing_date,
                p.created_at
            FROM documents_payment p
            LEFT JOIN documents_payrun pr ON p.payrun_id = pr.id AND p.tenant = pr.tenant
            WHERE p.tenant = ANY($1)
              AND p.created_at >= $2
              AND p.invoice_id IS NOT NULL
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(&self.tenants)
        .bind(window.cutoff())
        .fetch_all(&self.pool)
        .await
        .map_err(SourceError::transport)
    }

    async fn fetch_payruns(&self, window: FetchWindow) -> Result<Vec<PayrunRecord>, SourceError> {
        sqlx::query_as::<_, PayrunRecord>(
            r#"
            SELECT
                pr.id::BIGINT AS id,
                pr.reference,
                pr.tenant,
                pr.status::BIGINT AS status,
                COUNT(p.id) AS payment_count,
                SUM(p.total_amount) AS total_amount,
                pr.created_at
            FROM documents_payrun pr
            LEFT JOIN documents_payment p ON p.payrun_id = pr.id AND p.tenant = pr.tenant
            WHERE pr.tenant = ANY($1)
              AND pr.created_at >= $2
            GROUP BY pr.id, pr.reference, pr.tenant, pr.status, pr.created_at
            ORDER BY pr.created_at DESC
            "#,
        )
        .bind(&self.tenants)
        .bind(window.cutoff())
        .fetch_all(&self.pool)
        .await
        .map_err(SourceError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_follow_the_canonical_table() {
        let mut rec = InvoiceRecord {
            nvc_code: "NVC1".to_string(),
            invoice_number: "INV-1".to_string(),
            total_amount: Decimal::new(10000, 2),
            currency: "USD".to_string(),
            status: 1,
            tenant: "omcbbdo.worksuite.com".to_string(),
            payrun_id: None,
            payrun_reference: None,
            paid_date: None,
            processing_date: None,
            created_at: None,
        };
        assert_eq!(rec.status_label(), "Approved");
        rec.status = 5;
        assert_eq!(rec.status_label(), "Rejected");
        rec.status = 42;
        assert_eq!(rec.status_label(), "Unknown");
    }

    #[test]
    fn tenant_slug_trims_domain() {
        let rec = InvoiceRecord {
            nvc_code: "NVC1".to_string(),
            invoice_number: String::new(),
            total_amount: Decimal::ZERO,
            currency: String::new(),
            status: 0,
            tenant: "omcbbdo.worksuite.com".to_string(),
            payrun_id: None,
            payrun_reference: None,
            paid_date: None,
            processing_date: None,
            created_at: None,
        };
        assert_eq!(rec.tenant_slug(), "omcbbdo");
    }
}
