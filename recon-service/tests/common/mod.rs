//! Common test utilities for recon-service integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use recon_service::config::{
    EmailFeedConfig, InvoiceFeedConfig, MatchingConfig, ProcessorConfig, ReconConfig, StoreConfig,
    SyncConfig,
};
use recon_service::engine::ReconEngine;
use recon_service::parser::{ParsedRemittance, RemittanceLine};
use recon_service::services::Database;
use recon_service::sources::email::RemittanceEmail;
use recon_service::sources::inbound::ReceivedPaymentRecord;
use recon_service::sources::invoice::InvoiceRecord;
use recon_service::sources::outbound::OutboundPaymentRecord;
use recon_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,recon_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test configuration: in-memory store, every source disabled.
pub fn test_config() -> ReconConfig {
    let mut aliases = HashMap::new();
    aliases.insert(
        "Omnicom Media".to_string(),
        vec!["OMNICOM MEDIA GROUP".to_string(), "OMG".to_string()],
    );

    ReconConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            log_level: "debug".to_string(),
        },
        service_name: "recon-service-test".to_string(),
        store: StoreConfig {
            path: "sqlite::memory:".to_string(),
            connect_timeout_secs: 5,
            max_retries: 3,
        },
        sync: SyncConfig {
            interval_secs: 300,
            lookback_days: 60,
        },
        matching: MatchingConfig {
            amount_tol: Decimal::new(1, 2),
            date_window_days: 3,
            auto_match_conf: 0.80,
            suggest_conf: 0.50,
            agency_aliases: aliases,
        },
        email_feed: EmailFeedConfig {
            gateway_url: String::new(),
            sources: HashMap::new(),
            timeout_secs: 30,
            max_retries: 0,
            max_per_source: 50,
        },
        invoice_feed: InvoiceFeedConfig {
            database_url: String::new(),
            tenants: Vec::new(),
            connect_timeout_secs: 5,
            max_retries: 0,
        },
        processor: ProcessorConfig {
            api_url: String::new(),
            login_id: String::new(),
            api_key: String::new(),
            account_ids: Vec::new(),
            timeout_secs: 30,
            max_retries: 0,
        },
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub db: Arc<Database>,
    pub engine: Arc<ReconEngine>,
}

/// Spawn a test application over an in-memory store and return handles.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let app = Application::build_without_scheduler(test_config())
        .await
        .expect("Failed to build application");

    let port = app.port();
    let db = app.db();
    let engine = app.engine();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        db,
        engine,
    }
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Build a parsed remittance email with the given NVC lines.
pub fn remittance_email(
    id: &str,
    agency: &str,
    payment_date: &str,
    total: &str,
    lines: &[(&str, &str)],
) -> RemittanceEmail {
    let parsed_lines: Vec<RemittanceLine> = lines
        .iter()
        .map(|(nvc, amount)| RemittanceLine {
            ref_number: "OMPS-PR0005742".to_string(),
            nvc_code: nvc.to_string(),
            description: "Contractor".to_string(),
            company: "Omni Prod. LLC".to_string(),
            invoice_date: Some(date(payment_date)),
            original_amount: dec(amount),
            amount_paid: dec(amount),
            discount: Decimal::ZERO,
        })
        .collect();

    RemittanceEmail {
        id: id.to_string(),
        source: "oasys".to_string(),
        subject: format!("On behalf of {agency}"),
        sender: "notify@agency.example".to_string(),
        date: None,
        attachment_names: vec!["Remittance.csv".to_string()],
        manual_review: false,
        remittances: vec![ParsedRemittance {
            account_number: "V00121139".to_string(),
            payment_date: Some(date(payment_date)),
            payment_amount: dec(total),
            agency: Some(agency.to_string()),
            lines: parsed_lines,
        }],
        parse_failures: 0,
    }
}

pub fn invoice(nvc: &str, amount: &str, status: i64, tenant: &str) -> InvoiceRecord {
    InvoiceRecord {
        nvc_code: nvc.to_string(),
        invoice_number: format!("INV-{nvc}"),
        total_amount: dec(amount),
        currency: "USD".to_string(),
        status,
        tenant: format!("{tenant}.worksuite.com"),
        payrun_id: Some(42),
        payrun_reference: Some("OMPS-PR0005742".to_string()),
        paid_date: None,
        processing_date: None,
        created_at: None,
    }
}

pub fn received_payment(
    id: &str,
    amount: &str,
    payment_date: &str,
    raw_info: &str,
) -> ReceivedPaymentRecord {
    ReceivedPaymentRecord {
        id: id.to_string(),
        account_id: "859152".to_string(),
        account_name: "Omni BBDO".to_string(),
        amount: dec(amount),
        currency: "USD".to_string(),
        payment_date: Some(date(payment_date)),
        payment_status: "Cleared".to_string(),
        raw_info: raw_info.to_string(),
    }
}

pub fn outbound_payment(
    id: &str,
    reference: &str,
    amount: &str,
    payment_date: &str,
) -> OutboundPaymentRecord {
    OutboundPaymentRecord {
        id: id.to_string(),
        account_id: "859152".to_string(),
        amount: dec(amount),
        currency: "USD".to_string(),
        status: "Cleared".to_string(),
        payment_date: Some(date(payment_date)),
        payment_reference: reference.to_string(),
        recipient: Some("Contractor".to_string()),
        recipient_country: Some("US".to_string()),
    }
}
