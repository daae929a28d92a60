//! Full sync cycles over fake transports, including degraded mode.

mod common;

use async_trait::async_trait;
use common::*;
use recon_service::config::{EmailFeedConfig, EmailSourceConfig};
use recon_service::sources::email::{EmailAdapter, EmailFeed, FetchedAttachment, FetchedEmail};
use recon_service::sources::inbound::{InboundAdapter, ReceivedPaymentRecord};
use recon_service::sources::invoice::{InvoiceAdapter, InvoiceFeed, InvoiceRecord, PayrunRecord};
use recon_service::sources::outbound::{OutboundAdapter, OutboundPaymentRecord};
use recon_service::sources::processor::ProcessorFeed;
use recon_service::sources::{FetchWindow, SourceError};
use recon_service::sync::SyncRunner;
use std::collections::HashMap;
use std::sync::Arc;

const CSV: &str = "Account Number: V00121139\n\
Payment date: 20260208\n\
Payment Amount : 4,500.00\n\
Ref Number\tInv Nbr\tInvoice description\tCompany Statement Name\tInv Date\tInv Orig Amt\tAmt Pd\tDisc Amt\n\
OMPS-PR0005742\tNVC7KAAA\tCat Ventura\tOmni Prod. LLC\t20260129\t4,500.00\t4,500.00\t0.00\n";

struct FakeEmailFeed;

#[async_trait]
impl EmailFeed for FakeEmailFeed {
    async fn fetch(
        &self,
        source_key: &str,
        _query: &str,
        _window: FetchWindow,
        _max_results: u32,
    ) -> Result<Vec<FetchedEmail>, SourceError> {
        Ok(vec![FetchedEmail {
            id: "E1".to_string(),
            source: source_key.to_string(),
            subject: "On behalf of BBDO USA LLC".to_string(),
            sender: "oasys@agency.example".to_string(),
            date: None,
            attachments: vec![FetchedAttachment {
                filename: "Remittance.csv".to_string(),
                mime_type: "text/csv".to_string(),
                data: CSV.as_bytes().to_vec(),
            }],
        }])
    }
}

struct FakeInvoiceFeed;

#[async_trait]
impl InvoiceFeed for FakeInvoiceFeed {
    async fn fetch_invoices(
        &self,
        _window: FetchWindow,
    ) -> Result<Vec<InvoiceRecord>, SourceError> {
        Ok(vec![invoice("NVC7KAAA", "4500.00", 1, "omcbbdo")])
    }

    async fn fetch_payruns(&self, _window: FetchWindow) -> Result<Vec<PayrunRecord>, SourceError> {
        Ok(vec![PayrunRecord {
            id: 42,
            reference: Some("OMPS-PR0005742".to_string()),
            tenant: "omcbbdo.worksuite.com".to_string(),
            status: 1,
            payment_count: 1,
            total_amount: Some(dec("4500.00")),
            created_at: None,
        }])
    }
}

struct FailingInvoiceFeed;

#[async_trait]
impl InvoiceFeed for FailingInvoiceFeed {
    async fn fetch_invoices(
        &self,
        _window: FetchWindow,
    ) -> Result<Vec<InvoiceRecord>, SourceError> {
        Err(SourceError::auth(anyhow::anyhow!("connection refused")))
    }

    async fn fetch_payruns(&self, _window: FetchWindow) -> Result<Vec<PayrunRecord>, SourceError> {
        Err(SourceError::auth(anyhow::anyhow!("connection refused")))
    }
}

struct FakeProcessorFeed;

#[async_trait]
impl ProcessorFeed for FakeProcessorFeed {
    async fn fetch_received(
        &self,
        _account_id: &str,
    ) -> Result<Vec<ReceivedPaymentRecord>, SourceError> {
        Ok(vec![received_payment(
            "P1",
            "4500.00",
            "2026-02-08",
            "BBDO USA LLC DES:ACH PMTS ID:0001",
        )])
    }

    async fn fetch_payments(
        &self,
        _account_id: &str,
    ) -> Result<Vec<OutboundPaymentRecord>, SourceError> {
        Ok(vec![outbound_payment(
            "MC1",
            "omcbbdo.NVC7KAAA",
            "4500.00",
            "2026-02-09",
        )])
    }
}

fn email_adapter<F: EmailFeed>(feed: F) -> EmailAdapter<F> {
    let mut sources = HashMap::new();
    sources.insert(
        "oasys".to_string(),
        EmailSourceConfig {
            query: "from:oasys".to_string(),
            description: String::new(),
            manual_review: false,
        },
    );
    EmailAdapter::new(
        feed,
        &EmailFeedConfig {
            gateway_url: "http://gateway".to_string(),
            sources,
            timeout_secs: 30,
            max_retries: 0,
            max_per_source: 50,
        },
    )
}

#[tokio::test]
async fn full_cycle_produces_a_four_way_match() {
    let app = spawn_app().await;
    let config = test_config();

    let runner = SyncRunner::new(
        app.engine.clone(),
        app.db.clone(),
        &config.sync,
        Some(email_adapter(FakeEmailFeed)),
        Some(InvoiceAdapter::new(FakeInvoiceFeed, 0)),
        Some(InboundAdapter::new(
            Arc::new(FakeProcessorFeed),
            vec!["859152".to_string()],
            0,
        )),
        Some(OutboundAdapter::new(
            Arc::new(FakeProcessorFeed),
            vec!["859152".to_string()],
            0,
        )),
    );

    let results = runner.run_cycle().await;
    let by_source: HashMap<_, _> = results.into_iter().collect();
    assert_eq!(by_source["emails"], 1);
    assert_eq!(by_source["invoices"], 1);
    assert_eq!(by_source["received_payments"], 1);
    assert_eq!(by_source["payments"], 1);
    assert_eq!(by_source["lump_sum_matcher"], 1);

    let record = app.db.get_record("NVC7KAAA").await.unwrap().unwrap();
    assert_eq!(record.match_status, "full_4way");
    assert_eq!(record.received_payment_id.as_deref(), Some("P1"));

    // Replaying the same cycle is a no-op on row content.
    runner.run_cycle().await;
    let replayed = app.db.get_record("NVC7KAAA").await.unwrap().unwrap();
    assert_eq!(replayed.match_status, "full_4way");
    assert_eq!(replayed.remittance_amount, record.remittance_amount);
    assert_eq!(replayed.first_seen_at, record.first_seen_at);
}

#[tokio::test]
async fn broken_invoice_source_degrades_that_leg_only() {
    let app = spawn_app().await;
    let config = test_config();

    // Seed a classified row from an earlier, healthy cycle.
    let email = remittance_email(
        "E0",
        "DDB Worldwide",
        "2026-02-01",
        "300.00",
        &[("NVC7KD01", "300.00")],
    );
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_invoice_batch(&[invoice("NVC7KD01", "300.00", 4, "omnicomddb")])
        .await
        .unwrap();

    let runner = SyncRunner::new(
        app.engine.clone(),
        app.db.clone(),
        &config.sync,
        Some(email_adapter(FakeEmailFeed)),
        Some(InvoiceAdapter::new(FailingInvoiceFeed, 0)),
        Some(InboundAdapter::new(
            Arc::new(FakeProcessorFeed),
            vec!["859152".to_string()],
            0,
        )),
        Some(OutboundAdapter::new(
            Arc::new(FakeProcessorFeed),
            vec!["859152".to_string()],
            0,
        )),
    );

    let results = runner.run_cycle().await;
    let by_source: HashMap<_, _> = results.into_iter().collect();
    assert_eq!(by_source["invoices"], 0);
    assert_eq!(by_source["emails"], 1);

    // The failure is recorded, the other sources ran, and previously
    // classified rows were not demoted.
    let states = app.db.get_sync_state().await.unwrap();
    let invoice_state = states.iter().find(|s| s.source == "invoices").unwrap();
    assert!(invoice_state.status.starts_with("error"));
    let email_state = states.iter().find(|s| s.source == "emails").unwrap();
    assert_eq!(email_state.status, "ok");

    let record = app.db.get_record("NVC7KD01").await.unwrap().unwrap();
    assert_eq!(record.match_status, "2way_matched");

    // Cached reads still serve through the API.
    let summary: serde_json::Value = app
        .client
        .get(format!("{}/api/recon/summary", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(summary["total"].as_i64().unwrap() >= 1);

    let overview: serde_json::Value = app
        .client
        .get(format!("{}/api/overview", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["degraded"], true);
    assert!(overview["errors"]["invoices"].is_string());
}

#[tokio::test]
async fn unconfigured_sources_record_skipped() {
    let app = spawn_app().await;

    let response: serde_json::Value = app
        .client
        .post(format!("{}/api/sync/trigger", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["success"], true);

    let status: serde_json::Value = app
        .client
        .get(format!("{}/api/sync/status", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let sources = status["sources"].as_array().unwrap();
    let emails = sources
        .iter()
        .find(|s| s["source"] == "emails")
        .expect("emails sync state present");
    assert_eq!(emails["status"], "skipped");
}
