//! Store layer for recon-service.
//!
//! A single embedded SQLite file owns every persisted row. All reads and
//! writes go through the typed repository functions here; nothing else in
//! the crate opens a connection.

#![allow(clippy::too_many_arguments)]

use crate::matcher;
use crate::models::{
    CachedEmail, CachedInvoice, CachedPayment, CachedPayrun, LinkState, MatchStatus,
    ReceivedPayment, ReconciliationRecord, SyncState,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::sources::inbound::ReceivedPaymentRecord;
use crate::sources::invoice::{InvoiceRecord, PayrunRecord};
use crate::sources::outbound::OutboundPaymentRecord;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::QueryBuilder;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

impl Database {
    /// Open (or create) the embedded store.
    ///
    /// `path` is a filesystem path, or `sqlite::memory:` for tests. The
    /// in-memory variant pins the pool to one connection since every
    /// connection would otherwise see its own database.
    #[instrument(skip(path))]
    pub async fn new(path: &str, connect_timeout_secs: u64) -> Result<Self, AppError> {
        let in_memory = path == "sqlite::memory:" || path == ":memory:";

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| db_err("invalid sqlite options", e))?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| db_err("failed to create data directory", e))?;
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| db_err("failed to open store", e))?;

        info!(path = %path, "embedded store opened");

        Ok(Self { pool })
    }

    /// Run schema migrations. Additive plus the funding_* -> payment_*
    /// rename; applied once per database.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("running store migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| db_err("migration failed", e))?;
        info!("store migrations completed");
        Ok(())
    }

    /// Check store health.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("health check failed", e))?;
        Ok(())
    }

    // =========================================================================
    // Leg Upserts
    // =========================================================================

    #[instrument(skip(self), fields(nvc_code = %nvc_code))]
    pub async fn upsert_remittance_line(
        &self,
        nvc_code: &str,
        amount: Decimal,
        date: Option<NaiveDate>,
        source: &str,
        email_id: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_remittance_line"])
            .start_timer();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO reconciliation_records
                (nvc_code, remittance_amount, remittance_date, remittance_source, remittance_email_id, first_seen_at, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(nvc_code) DO UPDATE SET
                remittance_amount = excluded.remittance_amount,
                remittance_date = excluded.remittance_date,
                remittance_source = excluded.remittance_source,
                remittance_email_id = excluded.remittance_email_id,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(nvc_code)
        .bind(amount.to_string())
        .bind(date)
        .bind(source)
        .bind(email_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert remittance line", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(nvc_code = %nvc_code))]
    pub async fn upsert_invoice_leg(
        &self,
        nvc_code: &str,
        amount: Decimal,
        status_label: &str,
        tenant: &str,
        payrun_ref: &str,
        currency: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_invoice_leg"])
            .start_timer();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO reconciliation_records
                (nvc_code, invoice_amount, invoice_status, invoice_tenant, invoice_payrun_ref, invoice_currency, first_seen_at, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(nvc_code) DO UPDATE SET
                invoice_amount = excluded.invoice_amount,
                invoice_status = excluded.invoice_status,
                invoice_tenant = excluded.invoice_tenant,
                invoice_payrun_ref = excluded.invoice_payrun_ref,
                invoice_currency = excluded.invoice_currency,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(nvc_code)
        .bind(amount.to_string())
        .bind(status_label)
        .bind(tenant)
        .bind(payrun_ref)
        .bind(currency)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert invoice leg", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(nvc_code = %nvc_code))]
    pub async fn upsert_outbound_payment(
        &self,
        nvc_code: &str,
        amount: Decimal,
        account_id: &str,
        date: Option<NaiveDate>,
        currency: &str,
        status: &str,
        recipient: Option<&str>,
        recipient_country: Option<&str>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_outbound_payment"])
            .start_timer();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO reconciliation_records
                (nvc_code, payment_amount, payment_account_id, payment_date, payment_currency,
                 payment_status, payment_recipient, payment_recipient_country, first_seen_at, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(nvc_code) DO UPDATE SET
                payment_amount = excluded.payment_amount,
                payment_account_id = excluded.payment_account_id,
                payment_date = excluded.payment_date,
                payment_currency = excluded.payment_currency,
                payment_status = excluded.payment_status,
                payment_recipient = excluded.payment_recipient,
                payment_recipient_country = excluded.payment_recipient_country,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(nvc_code)
        .bind(amount.to_string())
        .bind(account_id)
        .bind(date)
        .bind(currency)
        .bind(status)
        .bind(recipient)
        .bind(recipient_country)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert outbound payment", e))?;

        timer.observe_duration();
        Ok(())
    }

    /// Nullify one leg of a record (targeted forget). The caller must
    /// reclassify afterwards.
    #[instrument(skip(self), fields(nvc_code = %nvc_code, leg = %leg))]
    pub async fn clear_leg(&self, nvc_code: &str, leg: &str) -> Result<(), AppError> {
        let set_clause = match leg {
            "remittance" => {
                "remittance_amount = NULL, remittance_date = NULL, remittance_source = NULL, remittance_email_id = NULL"
            }
            "invoice" => {
                "invoice_amount = NULL, invoice_status = NULL, invoice_tenant = NULL, invoice_payrun_ref = NULL, invoice_currency = NULL"
            }
            "funding" => {
                "received_payment_id = NULL, received_payment_amount = NULL, received_payment_date = NULL"
            }
            "payment" => {
                "payment_amount = NULL, payment_account_id = NULL, payment_date = NULL, payment_currency = NULL, payment_status = NULL, payment_recipient = NULL, payment_recipient_country = NULL"
            }
            other => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "unknown leg: {}",
                    other
                )));
            }
        };

        let sql = format!(
            "UPDATE reconciliation_records SET {set_clause}, last_updated_at = ? WHERE nvc_code = ?"
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(nvc_code)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to clear leg", e))?;
        Ok(())
    }

    /// Recompute and persist the derived match status for one record.
    #[instrument(skip(self, amount_tol), fields(nvc_code = %nvc_code))]
    pub async fn reclassify(
        &self,
        nvc_code: &str,
        amount_tol: Decimal,
    ) -> Result<Option<MatchStatus>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reclassify"])
            .start_timer();

        let Some(record) = self.get_record(nvc_code).await? else {
            timer.observe_duration();
            return Ok(None);
        };

        let classification = matcher::classify(&record, amount_tol);
        let flags = serde_json::to_string(&classification.flags)
            .map_err(|e| db_err("failed to encode match flags", e))?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET match_status = ?, match_flags = ?, last_updated_at = ?
            WHERE nvc_code = ?
            "#,
        )
        .bind(classification.status.as_str())
        .bind(flags)
        .bind(Utc::now())
        .bind(nvc_code)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to store match status", e))?;

        timer.observe_duration();
        Ok(Some(classification.status))
    }

    // =========================================================================
    // Source Caches
    // =========================================================================

    /// Idempotent email fingerprint upsert. Link columns survive
    /// re-observation so a refetch never clobbers an existing lump-sum link.
    #[instrument(skip_all, fields(email_id = %id))]
    pub async fn upsert_cached_email(
        &self,
        id: &str,
        source: &str,
        subject: &str,
        sender: &str,
        email_date: Option<chrono::DateTime<Utc>>,
        attachment_names: &[String],
        remittance_total: Option<Decimal>,
        remittance_date: Option<NaiveDate>,
        agency_name: Option<&str>,
        manual_review: bool,
        line_count: i64,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_cached_email"])
            .start_timer();

        let names = serde_json::to_string(attachment_names)
            .map_err(|e| db_err("failed to encode attachment names", e))?;

        sqlx::query(
            r#"
            INSERT INTO cached_emails
                (id, source, subject, sender, email_date, fetched_at, attachment_count,
                 attachment_names, remittance_total, remittance_date, agency_name,
                 manual_review, line_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                subject = excluded.subject,
                sender = excluded.sender,
                email_date = excluded.email_date,
                fetched_at = excluded.fetched_at,
                attachment_count = excluded.attachment_count,
                attachment_names = excluded.attachment_names,
                remittance_total = excluded.remittance_total,
                remittance_date = excluded.remittance_date,
                agency_name = excluded.agency_name,
                manual_review = excluded.manual_review,
                line_count = excluded.line_count
            "#,
        )
        .bind(id)
        .bind(source)
        .bind(subject)
        .bind(sender)
        .bind(email_date)
        .bind(Utc::now())
        .bind(attachment_names.len() as i64)
        .bind(names)
        .bind(remittance_total.map(|d| d.to_string()))
        .bind(remittance_date)
        .bind(agency_name)
        .bind(manual_review)
        .bind(line_count)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert cached email", e))?;

        timer.observe_duration();
        Ok(())
    }

    /// Idempotent received-payment upsert; link columns survive refetch.
    #[instrument(skip_all, fields(payment_id = %record.id))]
    pub async fn upsert_received_payment(
        &self,
        record: &ReceivedPaymentRecord,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_received_payment"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO received_payments
                (id, account_id, account_name, amount, currency, payment_date,
                 payment_status, payer_name, raw_info, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                account_name = excluded.account_name,
                amount = excluded.amount,
                currency = excluded.currency,
                payment_date = excluded.payment_date,
                payment_status = excluded.payment_status,
                payer_name = excluded.payer_name,
                raw_info = excluded.raw_info,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.account_id)
        .bind(&record.account_name)
        .bind(record.amount.to_string())
        .bind(&record.currency)
        .bind(record.payment_date)
        .bind(&record.payment_status)
        .bind(record.payer_name())
        .bind(&record.raw_info)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert received payment", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip_all, fields(count = invoices.len()))]
    pub async fn cache_invoices(&self, invoices: &[InvoiceRecord]) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cache_invoices"])
            .start_timer();
        let now = Utc::now();

        for inv in invoices {
            sqlx::query(
                r#"
                INSERT INTO cached_invoices
                    (nvc_code, invoice_number, total_amount, currency, status, status_label,
                     tenant, payrun_ref, paid_date, processing_date, created_at, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(nvc_code) DO UPDATE SET
                    invoice_number = excluded.invoice_number,
                    total_amount = excluded.total_amount,
                    currency = excluded.currency,
                    status = excluded.status,
                    status_label = excluded.status_label,
                    tenant = excluded.tenant,
                    payrun_ref = excluded.payrun_ref,
                    paid_date = excluded.paid_date,
                    processing_date = excluded.processing_date,
                    created_at = excluded.created_at,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(&inv.nvc_code)
            .bind(&inv.invoice_number)
            .bind(inv.total_amount.to_string())
            .bind(&inv.currency)
            .bind(inv.status)
            .bind(inv.status_label())
            .bind(inv.tenant_slug())
            .bind(inv.payrun_reference.as_deref().unwrap_or_default())
            .bind(inv.paid_date)
            .bind(inv.processing_date)
            .bind(inv.created_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to cache invoice", e))?;
        }

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip_all, fields(count = payruns.len()))]
    pub async fn cache_payruns(&self, payruns: &[PayrunRecord]) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cache_payruns"])
            .start_timer();
        let now = Utc::now();

        for pr in payruns {
            sqlx::query(
                r#"
                INSERT INTO cached_payruns
                    (id, reference, tenant, status, payment_count, total_amount, created_at, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    reference = excluded.reference,
                    tenant = excluded.tenant,
                    status = excluded.status,
                    payment_count = excluded.payment_count,
                    total_amount = excluded.total_amount,
                    created_at = excluded.created_at,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(pr.id)
            .bind(pr.reference.as_deref().unwrap_or_default())
            .bind(pr.tenant.trim_end_matches(".worksuite.com"))
            .bind(pr.status)
            .bind(pr.payment_count)
            .bind(pr.total_amount.unwrap_or_default().to_string())
            .bind(pr.created_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to cache payrun", e))?;
        }

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip_all, fields(payment_id = %payment.id))]
    pub async fn cache_payment(&self, payment: &OutboundPaymentRecord) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cache_payment"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO cached_payments
                (payment_id, account_id, nvc_code, amount, currency, status,
                 payment_date, recipient, recipient_country, payment_reference, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(payment_id) DO UPDATE SET
                account_id = excluded.account_id,
                nvc_code = excluded.nvc_code,
                amount = excluded.amount,
                currency = excluded.currency,
                status = excluded.status,
                payment_date = excluded.payment_date,
                recipient = excluded.recipient,
                recipient_country = excluded.recipient_country,
                payment_reference = excluded.payment_reference,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.account_id)
        .bind(payment.nvc_code())
        .bind(payment.amount.to_string())
        .bind(&payment.currency)
        .bind(&payment.status)
        .bind(payment.payment_date)
        .bind(&payment.recipient)
        .bind(&payment.recipient_country)
        .bind(&payment.payment_reference)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to cache payment", e))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Lump-Sum Linkage
    // =========================================================================

    /// Record a confirmed link between a received payment and a remittance
    /// email (both directions).
    #[instrument(skip(self), fields(email_id = %email_id, payment_id = %payment_id))]
    pub async fn link_received_payment_to_email(
        &self,
        email_id: &str,
        payment_id: &str,
        confidence: f64,
        method: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["link_received_payment"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = ?, matched_email_id = ?, match_confidence = ?, match_method = ?
            WHERE id = ?
            "#,
        )
        .bind(LinkState::Matched.as_str())
        .bind(email_id)
        .bind(confidence)
        .bind(method)
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark received payment matched", e))?;

        sqlx::query(
            r#"
            UPDATE cached_emails
            SET match_status = ?, received_payment_id = ?, match_confidence = ?, match_method = ?,
                suggested_payment_id = NULL
            WHERE id = ?
            "#,
        )
        .bind(LinkState::Matched.as_str())
        .bind(payment_id)
        .bind(confidence)
        .bind(method)
        .bind(email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark email matched", e))?;

        timer.observe_duration();
        info!(email_id = %email_id, payment_id = %payment_id, confidence, "received payment linked to email");
        Ok(())
    }

    /// Record a suggestion (score in the suggest band, not auto-applied).
    #[instrument(skip(self), fields(payment_id = %payment_id, email_id = %email_id))]
    pub async fn mark_received_payment_suggested(
        &self,
        payment_id: &str,
        email_id: &str,
        score: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = ?, match_confidence = ?,
                notes = ?
            WHERE id = ? AND match_status != 'matched'
            "#,
        )
        .bind(LinkState::Suggested.as_str())
        .bind(score)
        .bind(format!("Suggested: email {} (score: {:.2})", email_id, score))
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark received payment suggested", e))?;

        sqlx::query(
            r#"
            UPDATE cached_emails
            SET match_status = ?, suggested_payment_id = ?
            WHERE id = ? AND match_status != 'matched'
            "#,
        )
        .bind(LinkState::Suggested.as_str())
        .bind(payment_id)
        .bind(email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark email suggested", e))?;

        Ok(())
    }

    /// Undo a link and strip the inherited funding fields from every NVC
    /// row of the email. Returns the affected NVC codes for reclassification.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn unlink_received_payment(
        &self,
        payment_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let email_id: Option<String> = sqlx::query_scalar(
            "SELECT matched_email_id FROM received_payments WHERE id = ?",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to look up received payment", e))?
        .flatten();

        sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = 'unmatched', matched_email_id = NULL,
                match_confidence = NULL, match_method = NULL, notes = NULL
            WHERE id = ?
            "#,
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to unlink received payment", e))?;

        let Some(email_id) = email_id else {
            return Ok(Vec::new());
        };

        sqlx::query(
            r#"
            UPDATE cached_emails
            SET match_status = 'unmatched', received_payment_id = NULL,
                match_confidence = NULL, match_method = NULL
            WHERE id = ?
            "#,
        )
        .bind(&email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to unlink email", e))?;

        let affected: Vec<String> = sqlx::query_scalar(
            "SELECT nvc_code FROM reconciliation_records WHERE remittance_email_id = ?",
        )
        .bind(&email_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to list linked records", e))?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET received_payment_id = NULL, received_payment_amount = NULL,
                received_payment_date = NULL, last_updated_at = ?
            WHERE remittance_email_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(&email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to strip funding fields", e))?;

        Ok(affected)
    }

    /// Copy the linked received payment's fields onto every NVC row that
    /// came from the given email. Returns the affected NVC codes; the
    /// caller reclassifies them.
    #[instrument(skip(self), fields(email_id = %email_id))]
    pub async fn propagate_funding_to_nvcs(&self, email_id: &str) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["propagate_funding"])
            .start_timer();

        let Some(email) = self.get_email(email_id).await? else {
            timer.observe_duration();
            return Ok(Vec::new());
        };
        let Some(payment_id) = email.received_payment_id else {
            timer.observe_duration();
            return Ok(Vec::new());
        };
        let Some(payment) = self.get_received_payment(&payment_id).await? else {
            timer.observe_duration();
            return Ok(Vec::new());
        };

        let affected: Vec<String> = sqlx::query_scalar(
            "SELECT nvc_code FROM reconciliation_records WHERE remittance_email_id = ?",
        )
        .bind(email_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to list linked records", e))?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET received_payment_id = ?, received_payment_amount = ?,
                received_payment_date = ?, last_updated_at = ?
            WHERE remittance_email_id = ?
            "#,
        )
        .bind(&payment.id)
        .bind(payment.amount.to_string())
        .bind(payment.payment_date)
        .bind(Utc::now())
        .bind(email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to propagate funding", e))?;

        timer.observe_duration();
        info!(email_id = %email_id, payment_id = %payment.id, nvc_count = affected.len(), "funding propagated");
        Ok(affected)
    }

    // =========================================================================
    // Reconciliation Reads
    // =========================================================================

    #[instrument(skip(self), fields(nvc_code = %nvc_code))]
    pub async fn get_record(
        &self,
        nvc_code: &str,
    ) -> Result<Option<ReconciliationRecord>, AppError> {
        sqlx::query_as::<_, ReconciliationRecord>(
            "SELECT * FROM reconciliation_records WHERE nvc_code = ?",
        )
        .bind(nvc_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to get record", e))
    }

    #[instrument(skip_all)]
    pub async fn get_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ReconciliationRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_records"])
            .start_timer();

        let mut qb = QueryBuilder::new("SELECT * FROM reconciliation_records WHERE 1=1");
        if let Some(status) = &filter.status {
            qb.push(" AND match_status = ").push_bind(status.clone());
        }
        if let Some(tenant) = &filter.tenant {
            qb.push(" AND invoice_tenant LIKE ")
                .push_bind(format!("%{tenant}%"));
        }
        if let Some(search) = &filter.search {
            qb.push(" AND nvc_code LIKE ")
                .push_bind(format!("%{search}%"));
        }
        if let Some(from) = &filter.date_from {
            qb.push(" AND first_seen_at >= ").push_bind(from.clone());
        }
        if let Some(to) = &filter.date_to {
            qb.push(" AND first_seen_at <= ").push_bind(to.clone());
        }
        qb.push(" ORDER BY last_updated_at DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 1000))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows = qb
            .build_query_as::<ReconciliationRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list records", e))?;

        timer.observe_duration();
        Ok(rows)
    }

    /// Work queue: open records sorted by priority (worst first).
    /// Terminal statuses are excluded unless explicitly filtered for.
    #[instrument(skip_all)]
    pub async fn get_queue(
        &self,
        filter: &QueueFilter,
    ) -> Result<(Vec<ReconciliationRecord>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_queue"])
            .start_timer();

        let mut count_qb =
            QueryBuilder::new("SELECT COUNT(*) FROM reconciliation_records WHERE 1=1");
        apply_queue_conditions(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("failed to count queue", e))?;

        let order = match filter.sort_by.as_deref() {
            None | Some("priority") => PRIORITY_ORDER.to_string(),
            Some(col) => {
                let allowed = [
                    "last_updated_at",
                    "first_seen_at",
                    "remittance_amount",
                    "invoice_amount",
                    "payment_amount",
                ];
                let col = if allowed.contains(&col) {
                    col
                } else {
                    "last_updated_at"
                };
                let dir = if filter
                    .sort_dir
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case("asc"))
                {
                    "ASC"
                } else {
                    "DESC"
                };
                format!("{col} {dir}")
            }
        };

        let mut rows_qb = QueryBuilder::new("SELECT * FROM reconciliation_records WHERE 1=1");
        apply_queue_conditions(&mut rows_qb, filter);
        rows_qb
            .push(format!(" ORDER BY {order} LIMIT "))
            .push_bind(filter.limit.clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));
        let records = rows_qb
            .build_query_as::<ReconciliationRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list queue", e))?;

        timer.observe_duration();
        Ok((records, total))
    }

    /// Counts per match_status; `total` is the row count of the table, so
    /// the buckets always partition it exactly.
    #[instrument(skip(self))]
    pub async fn get_summary(&self) -> Result<serde_json::Map<String, serde_json::Value>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_summary"])
            .start_timer();

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT match_status, COUNT(*) FROM reconciliation_records GROUP BY match_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to aggregate summary", e))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reconciliation_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("failed to count records", e))?;

        let mut summary = serde_json::Map::new();
        for (status, count) in rows {
            summary.insert(status, serde_json::Value::from(count));
        }
        summary.insert("total".to_string(), serde_json::Value::from(total));

        timer.observe_duration();
        Ok(summary)
    }

    /// Partner suggestions for the missing legs of a record: candidates
    /// whose present leg lies inside the amount window, gated on tenant
    /// when both sides know theirs.
    #[instrument(skip(self), fields(nvc_code = %nvc_code))]
    pub async fn find_suggestions(&self, nvc_code: &str) -> Result<Vec<Suggestion>, AppError> {
        let Some(target) = self.get_record(nvc_code).await? else {
            return Ok(Vec::new());
        };

        let Some(reference) = target
            .remittance_amount
            .or(target.invoice_amount)
            .or(target.payment_amount)
        else {
            return Ok(Vec::new());
        };
        let reference_f = reference.to_f64().unwrap_or(0.0);
        if reference_f <= 0.0 {
            return Ok(Vec::new());
        }
        let low = reference_f * 0.99;
        let high = reference_f * 1.01;

        let mut missing = Vec::new();
        if target.remittance_amount.is_none() {
            missing.push(("remittance", "remittance_amount"));
        }
        if target.invoice_amount.is_none() {
            missing.push(("invoice", "invoice_amount"));
        }
        if target.payment_amount.is_none() {
            missing.push(("payment", "payment_amount"));
        }

        let mut suggestions = Vec::new();
        for (leg, column) in missing {
            let mut qb =
                QueryBuilder::new("SELECT * FROM reconciliation_records WHERE nvc_code != ");
            qb.push_bind(nvc_code.to_string());
            qb.push(format!(
                " AND {column} IS NOT NULL AND CAST({column} AS REAL) BETWEEN "
            ));
            qb.push_bind(low).push(" AND ").push_bind(high);
            if let Some(tenant) = &target.invoice_tenant {
                qb.push(" AND (invoice_tenant IS NULL OR invoice_tenant = ")
                    .push_bind(tenant.clone())
                    .push(")");
            }
            qb.push(format!(
                " ORDER BY ABS(CAST({column} AS REAL) - {reference_f}) LIMIT 10"
            ));

            let candidates = qb
                .build_query_as::<ReconciliationRecord>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err("failed to find suggestions", e))?;

            for candidate in candidates {
                let amount = match leg {
                    "remittance" => candidate.remittance_amount,
                    "invoice" => candidate.invoice_amount,
                    _ => candidate.payment_amount,
                };
                let Some(amount) = amount else { continue };
                let diff = (amount - reference).abs().to_f64().unwrap_or(f64::MAX);
                suggestions.push(Suggestion {
                    nvc_code: candidate.nvc_code,
                    leg: leg.to_string(),
                    amount,
                    tenant: candidate.invoice_tenant,
                    score: (1.0 - diff / reference_f).max(0.0),
                });
            }
        }

        suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(suggestions)
    }

    /// Per-tenant roll-up for the dashboard overview.
    #[instrument(skip(self))]
    pub async fn tenant_rollups(&self) -> Result<Vec<TenantRollup>, AppError> {
        let rows: Vec<TenantRollup> = sqlx::query_as(
            r#"
            SELECT
                COALESCE(invoice_tenant, '') AS tenant,
                COUNT(*) AS record_count,
                COALESCE(SUM(CAST(invoice_amount AS REAL)), 0.0) AS invoice_total,
                COALESCE(SUM(CAST(remittance_amount AS REAL)), 0.0) AS remittance_total,
                SUM(CASE WHEN match_status = 'amount_mismatch' THEN 1 ELSE 0 END) AS mismatched
            FROM reconciliation_records
            WHERE invoice_tenant IS NOT NULL
            GROUP BY invoice_tenant
            ORDER BY invoice_total DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to roll up tenants", e))?;
        Ok(rows)
    }

    // =========================================================================
    // Manual Mutations
    // =========================================================================

    /// Append a free-text audit line to a record's notes.
    #[instrument(skip(self, note), fields(nvc_code = %nvc_code))]
    pub async fn append_note(&self, nvc_code: &str, note: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET notes = COALESCE(notes || char(10), '') || ?, last_updated_at = ?
            WHERE nvc_code = ?
            "#,
        )
        .bind(note)
        .bind(Utc::now())
        .bind(nvc_code)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to append note", e))?;
        Ok(())
    }

    /// Set or clear the manual flag. `resolved` stamps the sticky terminal
    /// state; any other value (or clearing) lifts it.
    #[instrument(skip(self, notes), fields(nvc_code = %nvc_code))]
    pub async fn update_flag(
        &self,
        nvc_code: &str,
        flag: Option<&str>,
        notes: &str,
        actor: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        if flag == Some("resolved") {
            sqlx::query(
                r#"
                UPDATE reconciliation_records
                SET flag = ?, flag_notes = ?, resolved_at = ?, resolved_by = ?, last_updated_at = ?
                WHERE nvc_code = ?
                "#,
            )
            .bind(flag)
            .bind(notes)
            .bind(now)
            .bind(actor)
            .bind(now)
            .bind(nvc_code)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to set resolved flag", e))?;
        } else {
            sqlx::query(
                r#"
                UPDATE reconciliation_records
                SET flag = ?, flag_notes = ?, resolved_at = NULL, resolved_by = NULL, last_updated_at = ?
                WHERE nvc_code = ?
                "#,
            )
            .bind(flag)
            .bind(notes)
            .bind(now)
            .bind(nvc_code)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to update flag", e))?;
        }
        Ok(())
    }

    // =========================================================================
    // Source Cache Reads
    // =========================================================================

    pub async fn get_email(&self, id: &str) -> Result<Option<CachedEmail>, AppError> {
        sqlx::query_as::<_, CachedEmail>("SELECT * FROM cached_emails WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to get email", e))
    }

    #[instrument(skip_all)]
    pub async fn get_emails(
        &self,
        source: Option<&str>,
        match_status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedEmail>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM cached_emails WHERE 1=1");
        if let Some(source) = source {
            qb.push(" AND source = ").push_bind(source.to_string());
        }
        if let Some(status) = match_status {
            qb.push(" AND match_status = ").push_bind(status.to_string());
        }
        qb.push(" ORDER BY fetched_at DESC LIMIT ")
            .push_bind(limit.clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        qb.build_query_as::<CachedEmail>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list emails", e))
    }

    /// Emails eligible for lump-sum matching: parseable, unlinked, with a
    /// known lump-sum total.
    pub async fn get_candidate_emails(&self) -> Result<Vec<CachedEmail>, AppError> {
        sqlx::query_as::<_, CachedEmail>(
            r#"
            SELECT * FROM cached_emails
            WHERE manual_review = 0
              AND match_status != 'matched'
              AND remittance_total IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to list candidate emails", e))
    }

    pub async fn get_received_payment(
        &self,
        id: &str,
    ) -> Result<Option<ReceivedPayment>, AppError> {
        sqlx::query_as::<_, ReceivedPayment>("SELECT * FROM received_payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to get received payment", e))
    }

    #[instrument(skip_all)]
    pub async fn get_received_payments(
        &self,
        filter: &ReceivedPaymentFilter,
    ) -> Result<(Vec<ReceivedPayment>, i64), AppError> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM received_payments WHERE 1=1");
        apply_rp_conditions(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("failed to count received payments", e))?;

        let mut rows_qb = QueryBuilder::new("SELECT * FROM received_payments WHERE 1=1");
        apply_rp_conditions(&mut rows_qb, filter);
        rows_qb
            .push(" ORDER BY payment_date DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 1000))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));
        let rows = rows_qb
            .build_query_as::<ReceivedPayment>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list received payments", e))?;

        Ok((rows, total))
    }

    pub async fn get_unmatched_received_payments(&self) -> Result<Vec<ReceivedPayment>, AppError> {
        sqlx::query_as::<_, ReceivedPayment>(
            "SELECT * FROM received_payments WHERE match_status = 'unmatched'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to list unmatched received payments", e))
    }

    pub async fn received_payments_summary(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, AppError> {
        let rows: Vec<(String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT match_status, COUNT(*), COALESCE(SUM(CAST(amount AS REAL)), 0)
            FROM received_payments
            GROUP BY match_status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to summarize received payments", e))?;

        let mut out = serde_json::Map::new();
        let mut total_count = 0i64;
        let mut total_amount = 0f64;
        for (status, count, amount) in rows {
            out.insert(
                status,
                serde_json::json!({ "count": count, "amount": amount }),
            );
            total_count += count;
            total_amount += amount;
        }
        out.insert("total_count".to_string(), serde_json::Value::from(total_count));
        out.insert("total_amount".to_string(), serde_json::Value::from(total_amount));
        Ok(out)
    }

    #[instrument(skip_all)]
    pub async fn get_payruns(
        &self,
        tenant: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedPayrun>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM cached_payruns WHERE 1=1");
        if let Some(tenant) = tenant {
            qb.push(" AND tenant LIKE ").push_bind(format!("%{tenant}%"));
        }
        if let Some(search) = search {
            qb.push(" AND (reference LIKE ")
                .push_bind(format!("%{search}%"))
                .push(" OR tenant LIKE ")
                .push_bind(format!("%{search}%"))
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit.clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        qb.build_query_as::<CachedPayrun>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list payruns", e))
    }

    // =========================================================================
    // Cross-Search
    // =========================================================================

    #[instrument(skip_all)]
    pub async fn search_emails(
        &self,
        q: Option<&str>,
        amount_min: Option<f64>,
        amount_max: Option<f64>,
        limit: i64,
    ) -> Result<Vec<CachedEmail>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM cached_emails WHERE 1=1");
        if let Some(q) = q {
            let like = format!("%{q}%");
            qb.push(" AND (subject LIKE ")
                .push_bind(like.clone())
                .push(" OR agency_name LIKE ")
                .push_bind(like.clone())
                .push(" OR id LIKE ")
                .push_bind(like)
                .push(")");
        }
        if let Some(min) = amount_min {
            qb.push(" AND CAST(remittance_total AS REAL) >= ").push_bind(min);
        }
        if let Some(max) = amount_max {
            qb.push(" AND CAST(remittance_total AS REAL) <= ").push_bind(max);
        }
        qb.push(" ORDER BY fetched_at DESC LIMIT ")
            .push_bind(limit.clamp(1, 200));

        qb.build_query_as::<CachedEmail>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to search emails", e))
    }

    #[instrument(skip_all)]
    pub async fn search_invoices(
        &self,
        q: Option<&str>,
        amount_min: Option<f64>,
        amount_max: Option<f64>,
        tenant: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CachedInvoice>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM cached_invoices WHERE 1=1");
        if let Some(q) = q {
            let like = format!("%{q}%");
            qb.push(" AND (nvc_code LIKE ")
                .push_bind(like.clone())
                .push(" OR invoice_number LIKE ")
                .push_bind(like)
                .push(")");
        }
        if let Some(tenant) = tenant {
            qb.push(" AND tenant LIKE ").push_bind(format!("%{tenant}%"));
        }
        if let Some(min) = amount_min {
            qb.push(" AND CAST(total_amount AS REAL) >= ").push_bind(min);
        }
        if let Some(max) = amount_max {
            qb.push(" AND CAST(total_amount AS REAL) <= ").push_bind(max);
        }
        qb.push(" ORDER BY fetched_at DESC LIMIT ")
            .push_bind(limit.clamp(1, 200));

        qb.build_query_as::<CachedInvoice>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to search invoices", e))
    }

    #[instrument(skip_all)]
    pub async fn search_payments(
        &self,
        q: Option<&str>,
        amount_min: Option<f64>,
        amount_max: Option<f64>,
        limit: i64,
    ) -> Result<Vec<CachedPayment>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM cached_payments WHERE 1=1");
        if let Some(q) = q {
            let like = format!("%{q}%");
            qb.push(" AND (nvc_code LIKE ")
                .push_bind(like.clone())
                .push(" OR payment_reference LIKE ")
                .push_bind(like.clone())
                .push(" OR recipient LIKE ")
                .push_bind(like)
                .push(")");
        }
        if let Some(min) = amount_min {
            qb.push(" AND CAST(amount AS REAL) >= ").push_bind(min);
        }
        if let Some(max) = amount_max {
            qb.push(" AND CAST(amount AS REAL) <= ").push_bind(max);
        }
        qb.push(" ORDER BY fetched_at DESC LIMIT ")
            .push_bind(limit.clamp(1, 200));

        qb.build_query_as::<CachedPayment>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to search payments", e))
    }

    // =========================================================================
    // Sync State
    // =========================================================================

    #[instrument(skip(self), fields(source = %source, status = %status))]
    pub async fn update_sync_state(
        &self,
        source: &str,
        count: i64,
        status: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source, last_sync_at, last_count, status)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                last_count = excluded.last_count,
                status = excluded.status
            "#,
        )
        .bind(source)
        .bind(Utc::now())
        .bind(count)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to update sync state", e))?;
        Ok(())
    }

    pub async fn get_sync_state(&self) -> Result<Vec<SyncState>, AppError> {
        sqlx::query_as::<_, SyncState>("SELECT * FROM sync_state ORDER BY source")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to get sync state", e))
    }
}

/// Priority ordering for the work queue: mismatches first, then partials,
/// then single-leg rows.
const PRIORITY_ORDER: &str = r#"CASE match_status
    WHEN 'amount_mismatch' THEN 1
    WHEN 'status_issue' THEN 2
    WHEN '3way_awaiting_payment' THEN 3
    WHEN '3way_no_funding' THEN 4
    WHEN '2way_matched' THEN 5
    WHEN 'invoice_payment_only' THEN 6
    WHEN 'remittance_only' THEN 7
    WHEN 'invoice_only' THEN 8
    WHEN 'payment_only' THEN 9
    WHEN 'unmatched' THEN 10
    ELSE 11
END ASC, last_updated_at DESC"#;

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<String>,
    pub tenant: Option<String>,
    pub search: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<String>,
    pub tenant: Option<String>,
    pub flag: Option<String>,
    pub invoice_status: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ReceivedPaymentFilter {
    pub account_id: Option<String>,
    pub match_status: Option<String>,
    pub payer: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub nvc_code: String,
    pub leg: String,
    pub amount: Decimal,
    pub tenant: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TenantRollup {
    pub tenant: String,
    pub record_count: i64,
    pub invoice_total: f64,
    pub remittance_total: f64,
    pub mismatched: i64,
}

fn apply_queue_conditions(qb: &mut QueryBuilder<'static, sqlx::Sqlite>, filter: &QueueFilter) {
    match &filter.status {
        Some(status) => {
            qb.push(" AND match_status = ").push_bind(status.clone());
        }
        None => {
            qb.push(" AND match_status NOT IN ('full_4way', 'resolved')");
        }
    }
    if let Some(tenant) = &filter.tenant {
        qb.push(" AND invoice_tenant LIKE ")
            .push_bind(format!("%{tenant}%"));
    }
    if let Some(flag) = &filter.flag {
        qb.push(" AND flag = ").push_bind(flag.clone());
    }
    if let Some(invoice_status) = &filter.invoice_status {
        qb.push(" AND invoice_status = ")
            .push_bind(invoice_status.clone());
    }
    if let Some(search) = &filter.search {
        qb.push(" AND nvc_code LIKE ")
            .push_bind(format!("%{search}%"));
    }
}

fn apply_rp_conditions(
    qb: &mut QueryBuilder<'static, sqlx::Sqlite>,
    filter: &ReceivedPaymentFilter,
) {
    if let Some(account_id) = &filter.account_id {
        qb.push(" AND account_id = ").push_bind(account_id.clone());
    }
    if let Some(status) = &filter.match_status {
        qb.push(" AND match_status = ").push_bind(status.clone());
    }
    if let Some(payer) = &filter.payer {
        qb.push(" AND payer_name LIKE ")
            .push_bind(format!("%{payer}%"));
    }
}
