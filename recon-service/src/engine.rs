//! Reconciliation engine: projects source batches onto reconciliation
//! records, reclassifies affected NVCs, and runs the lump-sum matcher.
//!
//! Every operation is idempotent: replaying a batch produces the same rows
//! and statuses. The engine never deletes rows; forgetting a leg is a
//! targeted nullify plus a forced reclassify.

use crate::config::MatchingConfig;
use crate::matcher::lump_sum::{self, LinkDecision};
use crate::models::ManualFlag;
use crate::models::ReconciliationRecord;
use crate::services::Database;
use crate::services::metrics;
use crate::sources::email::RemittanceEmail;
use crate::sources::inbound::ReceivedPaymentRecord;
use crate::sources::invoice::{InvoiceRecord, PayrunRecord};
use crate::sources::outbound::OutboundPaymentRecord;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ReconEngine {
    db: Arc<Database>,
    matching: MatchingConfig,
}

/// Candidate email for a received payment, ranked by matcher score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmailSuggestion {
    pub email_id: String,
    pub subject: String,
    pub total_amount: Option<rust_decimal::Decimal>,
    pub date: Option<chrono::NaiveDate>,
    pub agency_name: Option<String>,
    pub score: f64,
}

impl ReconEngine {
    pub fn new(db: Arc<Database>, matching: MatchingConfig) -> Self {
        Self { db, matching }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    // =========================================================================
    // Batch Application
    // =========================================================================

    /// Apply a batch of parsed remittance emails. Returns the number of
    /// remittance lines upserted.
    #[instrument(skip_all, fields(emails = batch.len()))]
    pub async fn apply_email_batch(&self, batch: &[RemittanceEmail]) -> Result<i64, AppError> {
        let mut line_count = 0i64;

        for email in batch {
            // Lump-sum total and date for the matcher come from the parsed
            // attachments; a multi-attachment email sums its remittances.
            let remittance_total = email
                .remittances
                .iter()
                .map(|r| r.payment_amount)
                .reduce(|a, b| a + b);
            let remittance_date = email.remittances.iter().find_map(|r| r.payment_date);
            let agency = email.remittances.iter().find_map(|r| r.agency.clone());
            let email_lines: i64 = email.remittances.iter().map(|r| r.lines.len() as i64).sum();

            self.db
                .upsert_cached_email(
                    &email.id,
                    &email.source,
                    &email.subject,
                    &email.sender,
                    email.date,
                    &email.attachment_names,
                    remittance_total,
                    remittance_date,
                    agency.as_deref(),
                    email.manual_review,
                    email_lines,
                )
                .await?;

            for _ in 0..email.parse_failures {
                metrics::record_parse_failure("emails");
            }

            if email.manual_review {
                continue;
            }

            for remittance in &email.remittances {
                for line in &remittance.lines {
                    self.db
                        .upsert_remittance_line(
                            &line.nvc_code,
                            line.amount_paid,
                            remittance.payment_date,
                            &email.source,
                            &email.id,
                        )
                        .await?;
                    self.db
                        .reclassify(&line.nvc_code, self.matching.amount_tol)
                        .await?;
                    metrics::record_leg_upsert("remittance");
                    line_count += 1;
                }
            }
        }

        info!(lines = line_count, "email batch applied");
        Ok(line_count)
    }

    /// Apply a batch of invoice rows (and refresh the invoice cache).
    #[instrument(skip_all, fields(invoices = batch.len()))]
    pub async fn apply_invoice_batch(&self, batch: &[InvoiceRecord]) -> Result<i64, AppError> {
        let mut count = 0i64;

        for invoice in batch {
            if invoice.nvc_code.is_empty() {
                continue;
            }
            let payrun_ref = invoice
                .payrun_reference
                .clone()
                .or_else(|| invoice.payrun_id.map(|id| id.to_string()))
                .unwrap_or_default();

            self.db
                .upsert_invoice_leg(
                    &invoice.nvc_code,
                    invoice.total_amount,
                    invoice.status_label(),
                    &invoice.tenant_slug(),
                    &payrun_ref,
                    &invoice.currency,
                )
                .await?;
            self.db
                .reclassify(&invoice.nvc_code, self.matching.amount_tol)
                .await?;
            metrics::record_leg_upsert("invoice");
            count += 1;
        }

        self.db.cache_invoices(batch).await?;
        info!(invoices = count, "invoice batch applied");
        Ok(count)
    }

    #[instrument(skip_all, fields(payruns = batch.len()))]
    pub async fn apply_payrun_batch(&self, batch: &[PayrunRecord]) -> Result<i64, AppError> {
        self.db.cache_payruns(batch).await?;
        Ok(batch.len() as i64)
    }

    /// Apply a batch of received (inbound) payments. Linking to emails
    /// happens in the lump-sum pass, not here.
    #[instrument(skip_all, fields(payments = batch.len()))]
    pub async fn apply_received_batch(
        &self,
        batch: &[ReceivedPaymentRecord],
    ) -> Result<i64, AppError> {
        for payment in batch {
            self.db.upsert_received_payment(payment).await?;
        }
        info!(payments = batch.len(), "received payment batch applied");
        Ok(batch.len() as i64)
    }

    /// Apply a batch of outbound payments. Rows without an NVC-shaped
    /// reference are cached for search but never projected.
    #[instrument(skip_all, fields(payments = batch.len()))]
    pub async fn apply_outbound_batch(
        &self,
        batch: &[OutboundPaymentRecord],
    ) -> Result<i64, AppError> {
        let mut count = 0i64;

        for payment in batch {
            self.db.cache_payment(payment).await?;

            let Some(nvc_code) = payment.nvc_code() else {
                continue;
            };
            self.db
                .upsert_outbound_payment(
                    nvc_code,
                    payment.amount,
                    &payment.account_id,
                    payment.payment_date,
                    &payment.currency,
                    &payment.status,
                    payment.recipient.as_deref(),
                    payment.recipient_country.as_deref(),
                )
                .await?;
            self.db.reclassify(nvc_code, self.matching.amount_tol).await?;
            metrics::record_leg_upsert("payment");
            count += 1;
        }

        info!(payments = count, "outbound payment batch applied");
        Ok(count)
    }

    // =========================================================================
    // Lump-Sum Pass
    // =========================================================================

    /// Match unlinked received payments against candidate remittance
    /// emails. Auto-links at/above the auto threshold and propagates
    /// funding; scores in the suggest band are recorded, not applied.
    /// Returns the number of auto-links made.
    #[instrument(skip(self))]
    pub async fn run_lump_sum_pass(&self) -> Result<i64, AppError> {
        let unmatched = self.db.get_unmatched_received_payments().await?;
        if unmatched.is_empty() {
            return Ok(0);
        }
        let candidates = self.db.get_candidate_emails().await?;

        let mut claimed: HashSet<String> = HashSet::new();
        let mut linked = 0i64;

        for payment in &unmatched {
            let mut best: Option<(&str, f64)> = None;

            for email in &candidates {
                if claimed.contains(&email.id) {
                    continue;
                }
                let email_date = email
                    .remittance_date
                    .or_else(|| email.email_date.map(|d| d.date_naive()));
                let score = lump_sum::score_pair(
                    payment.amount,
                    payment.payment_date,
                    &payment.payer_name,
                    email.remittance_total,
                    email_date,
                    email.agency_name.as_deref(),
                    &self.matching,
                );
                if best.map(|(_, s)| score.total > s).unwrap_or(score.total > 0.0) {
                    best = Some((email.id.as_str(), score.total));
                }
            }

            let Some((email_id, score)) = best else {
                continue;
            };

            match lump_sum::decide(score, &self.matching) {
                LinkDecision::AutoLink => {
                    self.db
                        .link_received_payment_to_email(
                            email_id,
                            &payment.id,
                            score,
                            "auto_amount_date_payer",
                        )
                        .await?;
                    let affected = self.db.propagate_funding_to_nvcs(email_id).await?;
                    for nvc in &affected {
                        self.db.reclassify(nvc, self.matching.amount_tol).await?;
                    }
                    claimed.insert(email_id.to_string());
                    metrics::record_lump_sum_outcome("auto");
                    linked += 1;
                    info!(
                        payment_id = %payment.id,
                        email_id = %email_id,
                        score,
                        nvc_count = affected.len(),
                        "received payment auto-linked"
                    );
                }
                LinkDecision::Suggest => {
                    self.db
                        .mark_received_payment_suggested(&payment.id, email_id, score)
                        .await?;
                    metrics::record_lump_sum_outcome("suggest");
                }
                LinkDecision::NoMatch => {
                    metrics::record_lump_sum_outcome("none");
                }
            }
        }

        info!(linked, unmatched = unmatched.len(), "lump-sum pass complete");
        Ok(linked)
    }

    /// Ranked candidate emails for one received payment (read-only; used by
    /// the suggestions endpoint).
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn received_payment_suggestions(
        &self,
        payment_id: &str,
    ) -> Result<Vec<EmailSuggestion>, AppError> {
        let payment = self
            .db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("received payment not found")))?;

        let candidates = self.db.get_candidate_emails().await?;
        let mut suggestions: Vec<EmailSuggestion> = candidates
            .iter()
            .filter_map(|email| {
                let email_date = email
                    .remittance_date
                    .or_else(|| email.email_date.map(|d| d.date_naive()));
                let score = lump_sum::score_pair(
                    payment.amount,
                    payment.payment_date,
                    &payment.payer_name,
                    email.remittance_total,
                    email_date,
                    email.agency_name.as_deref(),
                    &self.matching,
                );
                (score.total > 0.0).then(|| EmailSuggestion {
                    email_id: email.id.clone(),
                    subject: email.subject.clone(),
                    total_amount: email.remittance_total,
                    date: email_date,
                    agency_name: email.agency_name.clone(),
                    score: (score.total * 1000.0).round() / 1000.0,
                })
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(10);
        Ok(suggestions)
    }

    // =========================================================================
    // Manual Operations
    // =========================================================================

    /// Copy a donor record's leg onto the target, note the action, and
    /// reclassify. `source` is one of `remittance`, `invoice`, `payment`
    /// (the legacy name `funding` is accepted for the outbound leg).
    #[instrument(skip(self, notes), fields(nvc_code = %nvc_code, donor = %donor_nvc, source = %source))]
    pub async fn associate(
        &self,
        nvc_code: &str,
        donor_nvc: &str,
        source: &str,
        notes: &str,
    ) -> Result<ReconciliationRecord, AppError> {
        let _target = self
            .db
            .get_record(nvc_code)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("target {} not found", nvc_code)))?;
        let donor = self
            .db
            .get_record(donor_nvc)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("source {} not found", donor_nvc)))?;

        match source {
            "remittance" => {
                let amount = donor.remittance_amount.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("no remittance data in {}", donor_nvc))
                })?;
                self.db
                    .upsert_remittance_line(
                        nvc_code,
                        amount,
                        donor.remittance_date,
                        donor.remittance_source.as_deref().unwrap_or_default(),
                        donor.remittance_email_id.as_deref().unwrap_or_default(),
                    )
                    .await?;
            }
            "invoice" => {
                let amount = donor.invoice_amount.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("no invoice data in {}", donor_nvc))
                })?;
                self.db
                    .upsert_invoice_leg(
                        nvc_code,
                        amount,
                        donor.invoice_status.as_deref().unwrap_or_default(),
                        donor.invoice_tenant.as_deref().unwrap_or_default(),
                        donor.invoice_payrun_ref.as_deref().unwrap_or_default(),
                        donor.invoice_currency.as_deref().unwrap_or_default(),
                    )
                    .await?;
            }
            "payment" | "funding" => {
                let amount = donor.payment_amount.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("no payment data in {}", donor_nvc))
                })?;
                self.db
                    .upsert_outbound_payment(
                        nvc_code,
                        amount,
                        donor.payment_account_id.as_deref().unwrap_or_default(),
                        donor.payment_date,
                        donor.payment_currency.as_deref().unwrap_or_default(),
                        donor.payment_status.as_deref().unwrap_or_default(),
                        donor.payment_recipient.as_deref(),
                        donor.payment_recipient_country.as_deref(),
                    )
                    .await?;
            }
            other => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "unknown source leg: {}",
                    other
                )));
            }
        }

        let audit = format!(
            "[{}] Associated {} from {}. {}",
            Utc::now().to_rfc3339(),
            source,
            donor_nvc,
            notes
        );
        self.db.append_note(nvc_code, audit.trim_end()).await?;
        self.db.reclassify(nvc_code, self.matching.amount_tol).await?;

        self.db.get_record(nvc_code).await?.ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("record vanished during associate"))
        })
    }

    /// Set or clear the manual follow-up flag. `resolved` is sticky: the
    /// record classifies as resolved until the flag is lifted.
    #[instrument(skip(self, notes), fields(nvc_code = %nvc_code))]
    pub async fn flag(
        &self,
        nvc_code: &str,
        flag: Option<ManualFlag>,
        notes: &str,
        actor: &str,
    ) -> Result<ReconciliationRecord, AppError> {
        self.db
            .get_record(nvc_code)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("NVC code not found")))?;

        self.db
            .update_flag(nvc_code, flag.map(|f| f.as_str()), notes, actor)
            .await?;
        self.db.reclassify(nvc_code, self.matching.amount_tol).await?;

        self.db
            .get_record(nvc_code)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("record vanished during flag")))
    }

    /// Manually link a received payment to an email, with propagation.
    #[instrument(skip(self), fields(payment_id = %payment_id, email_id = %email_id))]
    pub async fn link_received_payment(
        &self,
        payment_id: &str,
        email_id: &str,
        confidence: f64,
        method: &str,
    ) -> Result<usize, AppError> {
        self.db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("received payment not found")))?;
        self.db
            .get_email(email_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("email not found")))?;

        self.db
            .link_received_payment_to_email(email_id, payment_id, confidence, method)
            .await?;
        let affected = self.db.propagate_funding_to_nvcs(email_id).await?;
        for nvc in &affected {
            self.db.reclassify(nvc, self.matching.amount_tol).await?;
        }
        Ok(affected.len())
    }

    /// Undo a received-payment link and reclassify the stripped records.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn unlink_received_payment(&self, payment_id: &str) -> Result<usize, AppError> {
        self.db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("received payment not found")))?;

        let affected = self.db.unlink_received_payment(payment_id).await?;
        if affected.is_empty() {
            warn!(payment_id = %payment_id, "unlink affected no reconciliation records");
        }
        for nvc in &affected {
            self.db.reclassify(nvc, self.matching.amount_tol).await?;
        }
        Ok(affected.len())
    }
}
