//! Lump-sum matcher behavior: auto-link, suggest, propagation, exclusions.

mod common;

use common::*;

#[tokio::test]
async fn close_amount_with_alias_payer_auto_links_and_propagates() {
    let app = spawn_app().await;

    // Email total $10,000 over two NVC lines; payment $10,500 same day,
    // payer resolves through the alias table.
    let email = remittance_email(
        "E2",
        "Omnicom Media",
        "2026-02-08",
        "10000.00",
        &[("NVC7KL01", "6000.00"), ("NVC7KL02", "4000.00")],
    );
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_received_batch(&[received_payment(
            "P2",
            "10500.00",
            "2026-02-08",
            "OMNICOM MEDIA GROUP DES:WIRE",
        )])
        .await
        .unwrap();

    let linked = app.engine.run_lump_sum_pass().await.unwrap();
    assert_eq!(linked, 1);

    // Every NVC of the email inherited the funding leg.
    for nvc in ["NVC7KL01", "NVC7KL02"] {
        let record = app.db.get_record(nvc).await.unwrap().unwrap();
        assert_eq!(record.received_payment_id.as_deref(), Some("P2"));
        assert_eq!(record.received_payment_amount, Some(dec("10500.00")));
    }

    let payment = app.db.get_received_payment("P2").await.unwrap().unwrap();
    assert_eq!(payment.match_status, "matched");
    assert_eq!(payment.matched_email_id.as_deref(), Some("E2"));

    let email = app.db.get_email("E2").await.unwrap().unwrap();
    assert_eq!(email.match_status, "matched");
    assert_eq!(email.received_payment_id.as_deref(), Some("P2"));
}

#[tokio::test]
async fn wider_amount_gap_is_suggested_not_applied() {
    let app = spawn_app().await;

    let email = remittance_email(
        "E2",
        "Omnicom Media",
        "2026-02-08",
        "10000.00",
        &[("NVC7KL01", "10000.00")],
    );
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_received_batch(&[received_payment(
            "P3",
            "10600.00",
            "2026-02-08",
            "OMNICOM MEDIA GROUP DES:WIRE",
        )])
        .await
        .unwrap();

    let linked = app.engine.run_lump_sum_pass().await.unwrap();
    assert_eq!(linked, 0);

    let payment = app.db.get_received_payment("P3").await.unwrap().unwrap();
    assert_eq!(payment.match_status, "suggested");
    assert!(payment.notes.unwrap_or_default().contains("E2"));

    // No funding was propagated.
    let record = app.db.get_record("NVC7KL01").await.unwrap().unwrap();
    assert!(record.received_payment_id.is_none());
}

#[tokio::test]
async fn manual_review_emails_never_participate() {
    let app = spawn_app().await;

    let mut email = remittance_email(
        "E9",
        "BBDO USA LLC",
        "2026-02-08",
        "5000.00",
        &[("NVC7KL09", "5000.00")],
    );
    email.manual_review = true;
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_received_batch(&[received_payment(
            "P9",
            "5000.00",
            "2026-02-08",
            "BBDO USA LLC DES:ACH",
        )])
        .await
        .unwrap();

    let linked = app.engine.run_lump_sum_pass().await.unwrap();
    assert_eq!(linked, 0);

    let payment = app.db.get_received_payment("P9").await.unwrap().unwrap();
    assert_eq!(payment.match_status, "unmatched");
}

#[tokio::test]
async fn manual_link_and_unlink_round_trip() {
    let app = spawn_app().await;

    let email = remittance_email(
        "E5",
        "DDB Worldwide",
        "2026-02-08",
        "800.00",
        &[("NVC7KU01", "800.00")],
    );
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_received_batch(&[received_payment(
            "P5",
            "800.00",
            "2026-02-08",
            "Some Unrelated Payer",
        )])
        .await
        .unwrap();

    let linked = app
        .engine
        .link_received_payment("P5", "E5", 1.0, "manual")
        .await
        .unwrap();
    assert_eq!(linked, 1);
    let record = app.db.get_record("NVC7KU01").await.unwrap().unwrap();
    assert_eq!(record.received_payment_id.as_deref(), Some("P5"));

    let cleared = app.engine.unlink_received_payment("P5").await.unwrap();
    assert_eq!(cleared, 1);
    let record = app.db.get_record("NVC7KU01").await.unwrap().unwrap();
    assert!(record.received_payment_id.is_none());
    assert_eq!(record.match_status, "remittance_only");

    let payment = app.db.get_received_payment("P5").await.unwrap().unwrap();
    assert_eq!(payment.match_status, "unmatched");
}

#[tokio::test]
async fn an_email_links_to_at_most_one_payment() {
    let app = spawn_app().await;

    let email = remittance_email(
        "E7",
        "Omnicom Media",
        "2026-02-08",
        "1000.00",
        &[("NVC7KO01", "1000.00")],
    );
    app.engine.apply_email_batch(&[email]).await.unwrap();
    app.engine
        .apply_received_batch(&[
            received_payment("PA", "1000.00", "2026-02-08", "OMNICOM MEDIA GROUP"),
            received_payment("PB", "1000.00", "2026-02-08", "OMNICOM MEDIA GROUP"),
        ])
        .await
        .unwrap();

    let linked = app.engine.run_lump_sum_pass().await.unwrap();
    assert_eq!(linked, 1);

    let pa = app.db.get_received_payment("PA").await.unwrap().unwrap();
    let pb = app.db.get_received_payment("PB").await.unwrap().unwrap();
    let matched = [&pa, &pb]
        .iter()
        .filter(|p| p.match_status == "matched")
        .count();
    assert_eq!(matched, 1);
}
