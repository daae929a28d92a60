//! Stateless matching logic.
//!
//! `classify` derives the four-way match status for a single NVC row;
//! `lump_sum` scores inbound funding receipts against remittance emails.

pub mod lump_sum;

use crate::models::{InvoiceStatus, MatchStatus, ReconciliationRecord};
use rust_decimal::Decimal;

/// Result of classifying one reconciliation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: MatchStatus,
    pub flags: Vec<&'static str>,
}

impl Classification {
    fn new(status: MatchStatus) -> Self {
        Self {
            status,
            flags: Vec::new(),
        }
    }

    fn with_flag(mut self, flag: &'static str) -> Self {
        self.flags.push(flag);
        self
    }
}

fn amounts_match(a: Decimal, b: Decimal, tol: Decimal) -> bool {
    (a - b).abs() <= tol
}

/// Whether the outbound payment amount may be compared against the
/// reporting-currency legs. Legs 1-3 share the reporting currency; leg 4
/// may be anything, and cross-currency comparisons are skipped.
fn payment_comparable(record: &ReconciliationRecord) -> bool {
    let payment_ccy = match record.payment_currency.as_deref() {
        Some(c) if !c.is_empty() => c,
        _ => return true,
    };
    let reporting = record
        .invoice_currency
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or("USD");
    payment_ccy == reporting
}

/// Derive the match status and flags for a record.
///
/// Pure: the same record and tolerance always produce the same result.
/// A record resolved through the manual-flag path stays `resolved`
/// regardless of leg content.
pub fn classify(record: &ReconciliationRecord, tol: Decimal) -> Classification {
    if record.resolved_at.is_some() {
        return Classification::new(MatchStatus::Resolved);
    }

    let remittance = record.remittance_amount;
    let invoice = record.invoice_amount;
    let has_funding = record.received_payment_id.is_some();
    let payment = record.payment_amount;

    match (remittance, invoice) {
        (Some(rem), Some(inv)) => {
            let invoice_status = record
                .invoice_status
                .as_deref()
                .map(InvoiceStatus::from_str)
                .unwrap_or(InvoiceStatus::Unknown);

            if invoice_status.is_issue() {
                let mut c = Classification::new(MatchStatus::StatusIssue)
                    .with_flag("invoice_status_issue");
                if !amounts_match(rem, inv, tol) {
                    c = c.with_flag("remittance_invoice_mismatch");
                }
                return c;
            }

            if !amounts_match(rem, inv, tol) {
                return Classification::new(MatchStatus::AmountMismatch)
                    .with_flag("remittance_invoice_mismatch");
            }

            match (has_funding, payment) {
                (true, Some(pay)) => {
                    if !payment_comparable(record) {
                        Classification::new(MatchStatus::ThreeWayAwaitingPayment)
                            .with_flag("payment_currency_skipped")
                    } else if amounts_match(pay, rem, tol) {
                        Classification::new(MatchStatus::Full4Way)
                    } else {
                        Classification::new(MatchStatus::ThreeWayAwaitingPayment)
                            .with_flag("payment_amount_divergent")
                    }
                }
                (true, None) => Classification::new(MatchStatus::ThreeWayAwaitingPayment)
                    .with_flag("missing_payment"),
                (false, Some(_)) => {
                    Classification::new(MatchStatus::ThreeWayNoFunding).with_flag("missing_funding")
                }
                (false, None) => Classification::new(MatchStatus::TwoWayMatched)
                    .with_flag("missing_funding")
                    .with_flag("missing_payment"),
            }
        }
        (Some(_), None) => {
            let mut c = Classification::new(MatchStatus::RemittanceOnly).with_flag("missing_invoice");
            if !has_funding {
                c = c.with_flag("missing_funding");
            }
            if payment.is_none() {
                c = c.with_flag("missing_payment");
            }
            c
        }
        (None, Some(_)) => {
            if payment.is_some() {
                Classification::new(MatchStatus::InvoicePaymentOnly)
                    .with_flag("missing_remittance")
                    .with_flag("missing_funding")
            } else {
                Classification::new(MatchStatus::InvoiceOnly)
                    .with_flag("missing_remittance")
                    .with_flag("missing_funding")
                    .with_flag("missing_payment")
            }
        }
        (None, None) => {
            if payment.is_some() {
                Classification::new(MatchStatus::PaymentOnly)
                    .with_flag("missing_remittance")
                    .with_flag("missing_invoice")
                    .with_flag("missing_funding")
            } else {
                Classification::new(MatchStatus::Unmatched)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn tol() -> Decimal {
        Decimal::new(1, 2)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn empty_record(nvc: &str) -> ReconciliationRecord {
        let now = Utc::now();
        ReconciliationRecord {
            nvc_code: nvc.to_string(),
            remittance_amount: None,
            remittance_date: None,
            remittance_source: None,
            remittance_email_id: None,
            invoice_amount: None,
            invoice_status: None,
            invoice_tenant: None,
            invoice_payrun_ref: None,
            invoice_currency: None,
            received_payment_id: None,
            received_payment_amount: None,
            received_payment_date: None,
            payment_amount: None,
            payment_account_id: None,
            payment_date: None,
            payment_currency: None,
            payment_status: None,
            payment_recipient: None,
            payment_recipient_country: None,
            match_status: "unmatched".to_string(),
            match_flags: "[]".to_string(),
            flag: None,
            flag_notes: None,
            notes: None,
            resolved_at: None,
            resolved_by: None,
            first_seen_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn two_way_match_within_tolerance() {
        let mut r = empty_record("NVC_T1");
        r.remittance_amount = Some(dec("1000.00"));
        r.invoice_amount = Some(dec("1000.00"));
        r.invoice_status = Some("Approved".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::TwoWayMatched);
    }

    #[test]
    fn exact_tolerance_boundary_is_matched() {
        let mut r = empty_record("NVC_T2");
        r.remittance_amount = Some(dec("1000.00"));
        r.invoice_amount = Some(dec("1000.01"));
        r.invoice_status = Some("Approved".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::TwoWayMatched);
    }

    #[test]
    fn divergent_amounts_mismatch() {
        let mut r = empty_record("NVC_T3");
        r.remittance_amount = Some(dec("1000.00"));
        r.invoice_amount = Some(dec("900.00"));
        r.invoice_status = Some("Approved".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::AmountMismatch);
        assert!(c.flags.contains(&"remittance_invoice_mismatch"));
    }

    #[test]
    fn full_four_way() {
        let mut r = empty_record("NVC_T4");
        r.remittance_amount = Some(dec("4500.00"));
        r.invoice_amount = Some(dec("4500.00"));
        r.invoice_status = Some("Approved".to_string());
        r.invoice_currency = Some("USD".to_string());
        r.received_payment_id = Some("RP1".to_string());
        r.received_payment_amount = Some(dec("4500.00"));
        r.payment_amount = Some(dec("4500.00"));
        r.payment_currency = Some("USD".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::Full4Way);
        assert!(c.flags.is_empty());
    }

    #[test]
    fn cross_currency_payment_falls_back_to_three_way() {
        let mut r = empty_record("NVC_T5");
        r.remittance_amount = Some(dec("4500.00"));
        r.invoice_amount = Some(dec("4500.00"));
        r.invoice_status = Some("Approved".to_string());
        r.invoice_currency = Some("USD".to_string());
        r.received_payment_id = Some("RP1".to_string());
        r.payment_amount = Some(dec("4100.00"));
        r.payment_currency = Some("EUR".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::ThreeWayAwaitingPayment);
        assert!(c.flags.contains(&"payment_currency_skipped"));
    }

    #[test]
    fn divergent_payment_amount_demotes_four_way() {
        let mut r = empty_record("NVC_T6");
        r.remittance_amount = Some(dec("4500.00"));
        r.invoice_amount = Some(dec("4500.00"));
        r.invoice_status = Some("Approved".to_string());
        r.received_payment_id = Some("RP1".to_string());
        r.payment_amount = Some(dec("4000.00"));

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::ThreeWayAwaitingPayment);
        assert!(c.flags.contains(&"payment_amount_divergent"));
    }

    #[test]
    fn funding_without_payment_is_awaiting_payment() {
        let mut r = empty_record("NVC_T7");
        r.remittance_amount = Some(dec("100.00"));
        r.invoice_amount = Some(dec("100.00"));
        r.invoice_status = Some("Approved".to_string());
        r.received_payment_id = Some("RP1".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::ThreeWayAwaitingPayment);
    }

    #[test]
    fn payment_without_funding_is_no_funding() {
        let mut r = empty_record("NVC_T8");
        r.remittance_amount = Some(dec("100.00"));
        r.invoice_amount = Some(dec("100.00"));
        r.invoice_status = Some("Approved".to_string());
        r.payment_amount = Some(dec("100.00"));

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::ThreeWayNoFunding);
    }

    #[test]
    fn rejected_invoice_overrides_match() {
        let mut r = empty_record("NVC_T9");
        r.remittance_amount = Some(dec("2000.00"));
        r.invoice_amount = Some(dec("2000.00"));
        r.invoice_status = Some("Rejected".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::StatusIssue);
        assert!(c.flags.contains(&"invoice_status_issue"));
    }

    #[test]
    fn cancelled_invoice_overrides_mismatch() {
        let mut r = empty_record("NVC_T10");
        r.remittance_amount = Some(dec("2000.00"));
        r.invoice_amount = Some(dec("1500.00"));
        r.invoice_status = Some("Cancelled".to_string());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::StatusIssue);
        assert!(c.flags.contains(&"remittance_invoice_mismatch"));
    }

    #[test]
    fn single_leg_fallbacks() {
        let mut r = empty_record("NVC_T11");
        r.remittance_amount = Some(dec("50.00"));
        assert_eq!(classify(&r, tol()).status, MatchStatus::RemittanceOnly);

        let mut r = empty_record("NVC_T12");
        r.invoice_amount = Some(dec("50.00"));
        assert_eq!(classify(&r, tol()).status, MatchStatus::InvoiceOnly);

        let mut r = empty_record("NVC_T13");
        r.payment_amount = Some(dec("50.00"));
        assert_eq!(classify(&r, tol()).status, MatchStatus::PaymentOnly);
    }

    #[test]
    fn invoice_and_payment_without_remittance() {
        let mut r = empty_record("NVC_T14");
        r.invoice_amount = Some(dec("75.00"));
        r.payment_amount = Some(dec("75.00"));

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::InvoicePaymentOnly);
    }

    #[test]
    fn resolved_is_sticky() {
        let mut r = empty_record("NVC_T15");
        r.remittance_amount = Some(dec("1000.00"));
        r.invoice_amount = Some(dec("500.00"));
        r.invoice_status = Some("Approved".to_string());
        r.resolved_at = Some(Utc::now());

        let c = classify(&r, tol());
        assert_eq!(c.status, MatchStatus::Resolved);
    }

    #[test]
    fn empty_record_is_unmatched() {
        let r = empty_record("NVC_T16");
        assert_eq!(classify(&r, tol()).status, MatchStatus::Unmatched);
    }
}
