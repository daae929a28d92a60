//! Lump-sum matcher: scores inbound funding receipts against remittance
//! emails. Inbound wires carry no NVC breakdown, so the link is inferred
//! from amount, date proximity and payer-name similarity.

use crate::config::MatchingConfig;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use strsim::normalized_levenshtein;

const WEIGHT_AMOUNT: f64 = 0.5;
const WEIGHT_DATE: f64 = 0.2;
const WEIGHT_PAYER: f64 = 0.3;

/// Per-signal contributions plus the weighted total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub amount: f64,
    pub date: f64,
    pub payer: f64,
    pub total: f64,
}

/// What to do with a scored pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecision {
    AutoLink,
    Suggest,
    NoMatch,
}

pub fn decide(total: f64, cfg: &MatchingConfig) -> LinkDecision {
    if total >= cfg.auto_match_conf {
        LinkDecision::AutoLink
    } else if total >= cfg.suggest_conf {
        LinkDecision::Suggest
    } else {
        LinkDecision::NoMatch
    }
}

/// Score a (received payment, remittance email) pair.
pub fn score_pair(
    rp_amount: Decimal,
    rp_date: Option<NaiveDate>,
    rp_payer: &str,
    email_total: Option<Decimal>,
    email_date: Option<NaiveDate>,
    email_agency: Option<&str>,
    cfg: &MatchingConfig,
) -> ScoreBreakdown {
    let amount = amount_score(rp_amount, email_total, cfg.amount_tol);
    let date = match (rp_date, email_date) {
        (Some(a), Some(b)) => date_score(a, b, cfg.date_window_days),
        _ => 0.0,
    };
    let payer = payer_score(rp_payer, email_agency.unwrap_or(""), cfg);

    ScoreBreakdown {
        amount,
        date,
        payer,
        total: WEIGHT_AMOUNT * amount + WEIGHT_DATE * date + WEIGHT_PAYER * payer,
    }
}

/// Exact within tolerance scores 1.0; close misses (split fees, partial
/// withholding) score on relative distance against the larger amount.
fn amount_score(rp_amount: Decimal, email_total: Option<Decimal>, tol: Decimal) -> f64 {
    let email_total = match email_total {
        Some(t) if !t.is_zero() => t,
        _ => return 0.0,
    };
    if rp_amount.is_zero() {
        return 0.0;
    }

    let diff = (rp_amount - email_total).abs();
    if diff <= tol {
        return 1.0;
    }

    let larger = rp_amount.max(email_total);
    let pct = diff / larger;
    if pct <= Decimal::new(5, 2) {
        0.7
    } else if pct <= Decimal::new(10, 2) {
        0.3
    } else {
        0.0
    }
}

fn date_score(a: NaiveDate, b: NaiveDate, window_days: i64) -> f64 {
    let diff = (a - b).num_days().abs();
    if diff == 0 {
        1.0
    } else if diff <= 1 {
        0.8
    } else if diff <= window_days {
        0.5
    } else if diff <= 7 {
        0.2
    } else {
        0.0
    }
}

fn payer_score(payer: &str, agency: &str, cfg: &MatchingConfig) -> f64 {
    let pn = normalize_name(payer);
    let an = normalize_name(agency);
    if pn.is_empty() || an.is_empty() {
        return 0.0;
    }
    if pn == an {
        return 1.0;
    }

    // Alias table: both names resolving to the same canonical entry is as
    // good as an exact hit.
    for (canonical, aliases) in &cfg.agency_aliases {
        let canon = normalize_name(canonical);
        let alias_norms: Vec<String> = aliases.iter().map(|a| normalize_name(a)).collect();
        let payer_hits = pn == canon || alias_norms.contains(&pn);
        let agency_hits = an == canon || alias_norms.contains(&an);
        if payer_hits && agency_hits {
            return 1.0;
        }
    }

    normalized_levenshtein(&pn, &an)
}

/// Normalize a counterparty name for comparison: uppercase, strip corporate
/// suffixes and punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut upper = name.trim().to_uppercase();
    for suffix in [" LLC", " L.L.C.", " INC", " INC.", " LTD", " LTD.", " CORP", " CORP.", " CO", " CO."] {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            upper = stripped.trim_end().to_string();
        }
    }
    let cleaned: String = upper
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the payer name from a free-text bank info field, e.g.
/// `"BBDO USA LLC DES:ACH PMTS ID:0000123"` -> `"BBDO USA LLC"`.
pub fn parse_payer_name(raw_info: &str) -> String {
    let mut cut = raw_info.len();
    for marker in ["DES:", "WIRE TYPE:", "ORIG ID:", "ID:", "TRN:", "SEC:", "REF:"] {
        if let Some(idx) = raw_info.find(marker) {
            cut = cut.min(idx);
        }
    }
    raw_info[..cut].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn cfg() -> MatchingConfig {
        let mut aliases = HashMap::new();
        aliases.insert(
            "Omnicom Media".to_string(),
            vec![
                "OMNICOM MEDIA GROUP".to_string(),
                "OMG".to_string(),
            ],
        );
        MatchingConfig {
            amount_tol: Decimal::new(1, 2),
            date_window_days: 3,
            auto_match_conf: 0.80,
            suggest_conf: 0.50,
            agency_aliases: aliases,
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn exact_amount_same_day_alias_payer_scores_full() {
        let s = score_pair(
            dec("10000.00"),
            Some(date("2026-02-08")),
            "OMNICOM MEDIA GROUP",
            Some(dec("10000.00")),
            Some(date("2026-02-08")),
            Some("Omnicom Media"),
            &cfg(),
        );
        assert_eq!(s.amount, 1.0);
        assert_eq!(s.date, 1.0);
        assert_eq!(s.payer, 1.0);
        assert!((s.total - 1.0).abs() < 1e-9);
        assert_eq!(decide(s.total, &cfg()), LinkDecision::AutoLink);
    }

    #[test]
    fn close_amount_still_auto_links() {
        // $10,500 against a $10,000 email: amount 0.7, date 1.0, payer 1.0
        // -> 0.5*0.7 + 0.2*1.0 + 0.3*1.0 = 0.85
        let s = score_pair(
            dec("10500.00"),
            Some(date("2026-02-08")),
            "OMNICOM MEDIA GROUP",
            Some(dec("10000.00")),
            Some(date("2026-02-08")),
            Some("Omnicom Media"),
            &cfg(),
        );
        assert_eq!(s.amount, 0.7);
        assert!((s.total - 0.85).abs() < 1e-9);
        assert_eq!(decide(s.total, &cfg()), LinkDecision::AutoLink);
    }

    #[test]
    fn wider_amount_gap_only_suggests() {
        // $10,600 against $10,000: amount 0.3 -> 0.15 + 0.2 + 0.3 = 0.65
        let s = score_pair(
            dec("10600.00"),
            Some(date("2026-02-08")),
            "OMNICOM MEDIA GROUP",
            Some(dec("10000.00")),
            Some(date("2026-02-08")),
            Some("Omnicom Media"),
            &cfg(),
        );
        assert_eq!(s.amount, 0.3);
        assert!((s.total - 0.65).abs() < 1e-9);
        assert_eq!(decide(s.total, &cfg()), LinkDecision::Suggest);
    }

    #[test]
    fn date_boundary_at_window_scores_half() {
        let s = score_pair(
            dec("100.00"),
            Some(date("2026-02-11")),
            "",
            Some(dec("100.00")),
            Some(date("2026-02-08")),
            None,
            &cfg(),
        );
        assert_eq!(s.date, 0.5);
    }

    #[test]
    fn date_beyond_seven_days_scores_zero() {
        let s = score_pair(
            dec("100.00"),
            Some(date("2026-02-20")),
            "",
            Some(dec("100.00")),
            Some(date("2026-02-08")),
            None,
            &cfg(),
        );
        assert_eq!(s.date, 0.0);
    }

    #[test]
    fn missing_email_total_scores_zero_amount() {
        let s = score_pair(dec("100.00"), None, "", None, None, None, &cfg());
        assert_eq!(s.amount, 0.0);
        assert_eq!(s.total, 0.0);
        assert_eq!(decide(s.total, &cfg()), LinkDecision::NoMatch);
    }

    #[test]
    fn payer_suffix_and_punctuation_normalize_away() {
        assert_eq!(normalize_name("BBDO USA LLC"), "BBDO USA");
        assert_eq!(normalize_name("bbdo usa, inc."), "BBDO USA");
        assert_eq!(normalize_name("  Omni  Prod. LLC "), "OMNI PROD");
    }

    #[test]
    fn payer_exact_after_cleanup_scores_one() {
        let s = payer_score("BBDO USA LLC", "BBDO USA", &cfg());
        assert_eq!(s, 1.0);
    }

    #[test]
    fn parse_payer_strips_bank_noise() {
        assert_eq!(
            parse_payer_name("BBDO USA LLC DES:ACH PMTS ID:0000123"),
            "BBDO USA LLC"
        );
        assert_eq!(
            parse_payer_name("WIRE TYPE:WIRE IN BNF OMNICOM"),
            ""
        );
        assert_eq!(parse_payer_name("  DDB Worldwide  "), "DDB Worldwide");
    }
}
