//! Domain models for recon-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

// ============================================================================
// Match Status
// ============================================================================

/// Derived four-way match status of a reconciliation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Full4Way,
    ThreeWayAwaitingPayment,
    ThreeWayNoFunding,
    TwoWayMatched,
    AmountMismatch,
    StatusIssue,
    InvoicePaymentOnly,
    RemittanceOnly,
    InvoiceOnly,
    PaymentOnly,
    Unmatched,
    Resolved,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full4Way => "full_4way",
            Self::ThreeWayAwaitingPayment => "3way_awaiting_payment",
            Self::ThreeWayNoFunding => "3way_no_funding",
            Self::TwoWayMatched => "2way_matched",
            Self::AmountMismatch => "amount_mismatch",
            Self::StatusIssue => "status_issue",
            Self::InvoicePaymentOnly => "invoice_payment_only",
            Self::RemittanceOnly => "remittance_only",
            Self::InvoiceOnly => "invoice_only",
            Self::PaymentOnly => "payment_only",
            Self::Unmatched => "unmatched",
            Self::Resolved => "resolved",
        }
    }

    /// Unknown strings map to `Unmatched` so rows written by a newer schema
    /// still load.
    pub fn from_str(s: &str) -> Self {
        match s {
            "full_4way" => Self::Full4Way,
            "3way_awaiting_payment" => Self::ThreeWayAwaitingPayment,
            "3way_no_funding" => Self::ThreeWayNoFunding,
            "2way_matched" => Self::TwoWayMatched,
            "amount_mismatch" => Self::AmountMismatch,
            "status_issue" => Self::StatusIssue,
            "invoice_payment_only" => Self::InvoicePaymentOnly,
            "remittance_only" => Self::RemittanceOnly,
            "invoice_only" => Self::InvoiceOnly,
            "payment_only" => Self::PaymentOnly,
            "resolved" => Self::Resolved,
            _ => Self::Unmatched,
        }
    }

    /// Statuses excluded from the work queue by default.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Full4Way | Self::Resolved)
    }
}

// ============================================================================
// Invoice Status
// ============================================================================

/// Invoice lifecycle status from the operations database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Approved,
    Processing,
    InFlight,
    Paid,
    Rejected,
    Cancelled,
    Unknown,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Approved => "Approved",
            Self::Processing => "Processing",
            Self::InFlight => "In Flight",
            Self::Paid => "Paid",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
            Self::Unknown => "Unknown",
        }
    }

    /// Canonical numeric status codes used by the invoice source.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Draft,
            1 => Self::Approved,
            2 => Self::Processing,
            3 => Self::InFlight,
            4 => Self::Paid,
            5 => Self::Rejected,
            6 => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Draft" => Self::Draft,
            "Approved" => Self::Approved,
            "Processing" => Self::Processing,
            "In Flight" => Self::InFlight,
            "Paid" => Self::Paid,
            "Rejected" => Self::Rejected,
            "Cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Rejected/Cancelled invoices override matched/mismatched counting.
    pub fn is_issue(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

// ============================================================================
// Received Payment Link State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unmatched,
    Suggested,
    Matched,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Suggested => "suggested",
            Self::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "suggested" => Self::Suggested,
            "matched" => Self::Matched,
            _ => Self::Unmatched,
        }
    }
}

// ============================================================================
// Manual Flag
// ============================================================================

/// Operator follow-up flag on a reconciliation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualFlag {
    NeedsOutreach,
    Investigating,
    Escalated,
    Resolved,
}

impl ManualFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsOutreach => "needs_outreach",
            Self::Investigating => "investigating",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }

    /// Strict parse for API input validation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "needs_outreach" => Some(Self::NeedsOutreach),
            "investigating" => Some(Self::Investigating),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

// ============================================================================
// Reconciliation Record
// ============================================================================

/// The central entity: one row per NVC code, carrying the latest known
/// state of each leg plus the derived match status.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationRecord {
    pub nvc_code: String,

    // Leg 1 — remittance
    pub remittance_amount: Option<Decimal>,
    pub remittance_date: Option<NaiveDate>,
    pub remittance_source: Option<String>,
    pub remittance_email_id: Option<String>,

    // Leg 2 — invoice
    pub invoice_amount: Option<Decimal>,
    pub invoice_status: Option<String>,
    pub invoice_tenant: Option<String>,
    pub invoice_payrun_ref: Option<String>,
    pub invoice_currency: Option<String>,

    // Leg 3 — inbound funding (inherited via remittance email linkage)
    pub received_payment_id: Option<String>,
    pub received_payment_amount: Option<Decimal>,
    pub received_payment_date: Option<NaiveDate>,

    // Leg 4 — outbound payment
    pub payment_amount: Option<Decimal>,
    pub payment_account_id: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_currency: Option<String>,
    pub payment_status: Option<String>,
    pub payment_recipient: Option<String>,
    pub payment_recipient_country: Option<String>,

    // Derived
    pub match_status: String,
    pub match_flags: String,

    // Manual
    pub flag: Option<String>,
    pub flag_notes: Option<String>,
    pub notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,

    // Audit
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

// ============================================================================
// Cached Source Rows
// ============================================================================

/// Fingerprint of a remittance email plus its lump-sum link state.
#[derive(Debug, Clone, Serialize)]
pub struct CachedEmail {
    pub id: String,
    pub source: String,
    pub subject: String,
    pub sender: String,
    pub email_date: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub attachment_count: i64,
    pub attachment_names: String,
    pub remittance_total: Option<Decimal>,
    pub remittance_date: Option<NaiveDate>,
    pub agency_name: Option<String>,
    pub manual_review: bool,
    pub line_count: i64,
    pub received_payment_id: Option<String>,
    pub match_status: String,
    pub match_confidence: Option<f64>,
    pub match_method: Option<String>,
    pub suggested_payment_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedInvoice {
    pub nvc_code: String,
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: i64,
    pub status_label: String,
    pub tenant: String,
    pub payrun_ref: String,
    pub paid_date: Option<NaiveDate>,
    pub processing_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedPayrun {
    pub id: i64,
    pub reference: String,
    pub tenant: String,
    pub status: i64,
    pub payment_count: i64,
    pub total_amount: Decimal,
    pub created_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Outbound processor payment (leg 4 source row).
#[derive(Debug, Clone, Serialize)]
pub struct CachedPayment {
    pub payment_id: String,
    pub account_id: String,
    pub nvc_code: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub payment_date: Option<NaiveDate>,
    pub recipient: Option<String>,
    pub recipient_country: Option<String>,
    pub payment_reference: String,
    pub fetched_at: DateTime<Utc>,
}

/// Inbound lump-sum funding receipt (leg 3 source row).
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedPayment {
    pub id: String,
    pub account_id: String,
    pub account_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_date: Option<NaiveDate>,
    pub payment_status: String,
    pub payer_name: String,
    pub raw_info: String,
    pub match_status: String,
    pub matched_email_id: Option<String>,
    pub match_confidence: Option<f64>,
    pub match_method: Option<String>,
    pub notes: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncState {
    pub source: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_count: i64,
    pub status: String,
}

// ============================================================================
// Row Decoding
// ============================================================================

// Amounts are persisted as canonical decimal strings; decode by hand so the
// cent precision survives the round trip.

fn amount(row: &SqliteRow, name: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(name)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: name.to_string(),
        source: Box::new(e),
    })
}

fn opt_amount(row: &SqliteRow, name: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(name)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: name.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

impl sqlx::FromRow<'_, SqliteRow> for ReconciliationRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            nvc_code: row.try_get("nvc_code")?,
            remittance_amount: opt_amount(row, "remittance_amount")?,
            remittance_date: row.try_get("remittance_date")?,
            remittance_source: row.try_get("remittance_source")?,
            remittance_email_id: row.try_get("remittance_email_id")?,
            invoice_amount: opt_amount(row, "invoice_amount")?,
            invoice_status: row.try_get("invoice_status")?,
            invoice_tenant: row.try_get("invoice_tenant")?,
            invoice_payrun_ref: row.try_get("invoice_payrun_ref")?,
            invoice_currency: row.try_get("invoice_currency")?,
            received_payment_id: row.try_get("received_payment_id")?,
            received_payment_amount: opt_amount(row, "received_payment_amount")?,
            received_payment_date: row.try_get("received_payment_date")?,
            payment_amount: opt_amount(row, "payment_amount")?,
            payment_account_id: row.try_get("payment_account_id")?,
            payment_date: row.try_get("payment_date")?,
            payment_currency: row.try_get("payment_currency")?,
            payment_status: row.try_get("payment_status")?,
            payment_recipient: row.try_get("payment_recipient")?,
            payment_recipient_country: row.try_get("payment_recipient_country")?,
            match_status: row.try_get("match_status")?,
            match_flags: row.try_get("match_flags")?,
            flag: row.try_get("flag")?,
            flag_notes: row.try_get("flag_notes")?,
            notes: row.try_get("notes")?,
            resolved_at: row.try_get("resolved_at")?,
            resolved_by: row.try_get("resolved_by")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for CachedEmail {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            source: row.try_get("source")?,
            subject: row.try_get("subject")?,
            sender: row.try_get("sender")?,
            email_date: row.try_get("email_date")?,
            fetched_at: row.try_get("fetched_at")?,
            attachment_count: row.try_get("attachment_count")?,
            attachment_names: row.try_get("attachment_names")?,
            remittance_total: opt_amount(row, "remittance_total")?,
            remittance_date: row.try_get("remittance_date")?,
            agency_name: row.try_get("agency_name")?,
            manual_review: row.try_get("manual_review")?,
            line_count: row.try_get("line_count")?,
            received_payment_id: row.try_get("received_payment_id")?,
            match_status: row.try_get("match_status")?,
            match_confidence: row.try_get("match_confidence")?,
            match_method: row.try_get("match_method")?,
            suggested_payment_id: row.try_get("suggested_payment_id")?,
            notes: row.try_get("notes")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for CachedInvoice {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            nvc_code: row.try_get("nvc_code")?,
            invoice_number: row.try_get("invoice_number")?,
            total_amount: amount(row, "total_amount")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            status_label: row.try_get("status_label")?,
            tenant: row.try_get("tenant")?,
            payrun_ref: row.try_get("payrun_ref")?,
            paid_date: row.try_get("paid_date")?,
            processing_date: row.try_get("processing_date")?,
            created_at: row.try_get("created_at")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for CachedPayrun {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            tenant: row.try_get("tenant")?,
            status: row.try_get("status")?,
            payment_count: row.try_get("payment_count")?,
            total_amount: amount(row, "total_amount")?,
            created_at: row.try_get("created_at")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for CachedPayment {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            payment_id: row.try_get("payment_id")?,
            account_id: row.try_get("account_id")?,
            nvc_code: row.try_get("nvc_code")?,
            amount: amount(row, "amount")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            payment_date: row.try_get("payment_date")?,
            recipient: row.try_get("recipient")?,
            recipient_country: row.try_get("recipient_country")?,
            payment_reference: row.try_get("payment_reference")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for ReceivedPayment {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            account_name: row.try_get("account_name")?,
            amount: amount(row, "amount")?,
            currency: row.try_get("currency")?,
            payment_date: row.try_get("payment_date")?,
            payment_status: row.try_get("payment_status")?,
            payer_name: row.try_get("payer_name")?,
            raw_info: row.try_get("raw_info")?,
            match_status: row.try_get("match_status")?,
            matched_email_id: row.try_get("matched_email_id")?,
            match_confidence: row.try_get("match_confidence")?,
            match_method: row.try_get("match_method")?,
            notes: row.try_get("notes")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}
