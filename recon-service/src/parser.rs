//! Parser for agency remittance CSV attachments.
//!
//! The format is a short header (account number, payment date, lump-sum
//! payment amount) followed by tab-delimited invoice lines keyed by NVC
//! code. Files arrive UTF-16 as often as UTF-8.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RemittanceLine {
    pub ref_number: String,
    pub nvc_code: String,
    /// Invoice description, in practice the contractor name.
    pub description: String,
    /// Company statement name.
    pub company: String,
    pub invoice_date: Option<NaiveDate>,
    pub original_amount: Decimal,
    pub amount_paid: Decimal,
    pub discount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRemittance {
    pub account_number: String,
    pub payment_date: Option<NaiveDate>,
    pub payment_amount: Decimal,
    pub agency: Option<String>,
    pub lines: Vec<RemittanceLine>,
}

impl ParsedRemittance {
    pub fn lines_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.amount_paid).sum()
    }
}

static AGENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"On behalf of (.+)").expect("agency regex"));

/// Extract the agency name from a subject like
/// `"On behalf of OGI Shared Service Center Advertising LLC"`.
pub fn agency_from_subject(subject: &str) -> Option<String> {
    AGENCY_RE
        .captures(subject)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Parse a remittance CSV payload.
///
/// Returns `None` when the payload yields neither an account number nor any
/// invoice lines; the caller treats that as a malformed attachment.
pub fn parse_remittance_csv(data: &[u8], subject: &str) -> Option<ParsedRemittance> {
    let text = decode_text(data);

    let mut account_number = String::new();
    let mut payment_date = None;
    let mut payment_amount = Decimal::ZERO;
    let mut lines = Vec::new();
    let mut header_found = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_matches(['\r', '\t', ' ', '\u{feff}']);
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Account Number:") {
            account_number = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("Payment date:") {
            payment_date = parse_date(rest.trim());
            continue;
        }
        if line.starts_with("Payment Amount") {
            if let Some((_, rest)) = line.split_once(':') {
                payment_amount = parse_amount(rest);
            }
            continue;
        }

        if line.contains("Ref Number") && line.contains("Inv Nbr") {
            header_found = true;
            continue;
        }

        if header_found {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 7 {
                continue;
            }
            let nvc_code = parts[1].trim().to_string();
            if nvc_code.is_empty() {
                continue;
            }
            lines.push(RemittanceLine {
                ref_number: parts[0].trim().to_string(),
                nvc_code,
                description: parts[2].trim().to_string(),
                company: parts[3].trim().to_string(),
                invoice_date: parse_date(parts[4].trim()),
                original_amount: parse_amount(parts[5]),
                amount_paid: parse_amount(parts[6]),
                discount: parts.get(7).map(|s| parse_amount(s)).unwrap_or(Decimal::ZERO),
            });
        }
    }

    if account_number.is_empty() && lines.is_empty() {
        warn!("remittance CSV produced no account number and no lines, skipping");
        return None;
    }

    let agency = agency_from_subject(subject);
    debug!(
        account = %account_number,
        lines = lines.len(),
        total = %payment_amount,
        agency = agency.as_deref().unwrap_or("unknown"),
        "parsed remittance CSV"
    );

    Some(ParsedRemittance {
        account_number,
        payment_date,
        payment_amount,
        agency,
        lines,
    })
}

/// Amount strings carry thousands separators; `-` and empty mean zero.
fn parse_amount(s: &str) -> Decimal {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return Decimal::ZERO;
    }
    Decimal::from_str(&cleaned).unwrap_or(Decimal::ZERO)
}

/// Dates appear as `YYYYMMDD` in the wild, occasionally already ISO.
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

/// Decode the attachment bytes, sniffing the BOM. OASYS exports are
/// UTF-16LE more often than not.
fn decode_text(data: &[u8]) -> String {
    if data.len() >= 2 && data[0] == 0xff && data[1] == 0xfe {
        return decode_utf16(&data[2..], true);
    }
    if data.len() >= 2 && data[0] == 0xfe && data[1] == 0xff {
        return decode_utf16(&data[2..], false);
    }
    let data = data.strip_prefix(&[0xef, 0xbb, 0xbf][..]).unwrap_or(data);
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        // Latin-1 fallback: every byte maps to the same code point.
        Err(_) => data.iter().map(|&b| b as char).collect(),
    }
}

fn decode_utf16(data: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Account Number: V00121139\n\
Payment date: 20260208\n\
Payment Amount : 26,872.70\n\
Ref Number\tInv Nbr\tInvoice description\tCompany Statement Name\tInv Date\tInv Orig Amt\tAmt Pd\tDisc Amt\n\
OMPS-PR0005742\tNVC7KTPCPVVV\tCat Ventura\tOmni Prod. LLC\t20260129\t600.00\t600.00\t0.00\n\
OMPS-PR0005742\tNVC7KY46WXLW\tChris James Champeau\tOmni Prod. LLC\t20260202\t14,272.70\t14,272.70\t0.00\n\
OMPS-PR0005742\tNVC7KVC7X37T\tChristopher Hall\tOmni Prod. LLC\t20260130\t12,000.00\t12,000.00\t0.00\n";

    #[test]
    fn parses_header_and_lines() {
        let r = parse_remittance_csv(
            SAMPLE.as_bytes(),
            "On behalf of OGI Shared Service Center Advertising LLC",
        )
        .unwrap();

        assert_eq!(r.account_number, "V00121139");
        assert_eq!(
            r.payment_date,
            Some(NaiveDate::from_ymd_opt(2026, 2, 8).unwrap())
        );
        assert_eq!(r.payment_amount, Decimal::from_str("26872.70").unwrap());
        assert_eq!(r.lines.len(), 3);
        assert_eq!(r.lines[0].nvc_code, "NVC7KTPCPVVV");
        assert_eq!(r.lines[1].amount_paid, Decimal::from_str("14272.70").unwrap());
        assert_eq!(
            r.agency.as_deref(),
            Some("OGI Shared Service Center Advertising LLC")
        );
        assert_eq!(r.lines_total(), Decimal::from_str("26872.70").unwrap());
    }

    #[test]
    fn utf16le_payload_decodes() {
        let mut bytes = vec![0xff, 0xfe];
        for unit in SAMPLE.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let r = parse_remittance_csv(&bytes, "").unwrap();
        assert_eq!(r.lines.len(), 3);
        assert_eq!(r.account_number, "V00121139");
    }

    #[test]
    fn lines_without_nvc_code_are_skipped() {
        let payload = "Account Number: V1\n\
Payment Amount : 100.00\n\
Ref Number\tInv Nbr\tInvoice description\tCompany Statement Name\tInv Date\tInv Orig Amt\tAmt Pd\tDisc Amt\n\
REF1\t\tNo Code\tCo\t20260101\t100.00\t100.00\t0.00\n";
        let r = parse_remittance_csv(payload.as_bytes(), "").unwrap();
        assert!(r.lines.is_empty());
        assert_eq!(r.account_number, "V1");
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_remittance_csv(b"PDF-1.4 binary sludge", "").is_none());
    }

    #[test]
    fn short_rows_are_ignored() {
        let payload = "Account Number: V2\n\
Ref Number\tInv Nbr\tInvoice description\n\
REF1\tNVC123\tonly three cols\n";
        let r = parse_remittance_csv(payload.as_bytes(), "").unwrap();
        assert!(r.lines.is_empty());
    }

    #[test]
    fn no_agency_without_marker_subject() {
        assert_eq!(agency_from_subject("Remittance advice 2026-02-08"), None);
        assert_eq!(
            agency_from_subject("Payment sent On behalf of BBDO USA LLC").as_deref(),
            Some("BBDO USA LLC")
        );
    }
}
