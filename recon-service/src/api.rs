//! HTTP/JSON surface: read model over the local store plus the manual
//! mutations. Handlers stay thin; query logic lives in the repositories
//! and orchestration in the engine.

use crate::engine::ReconEngine;
use crate::models::ManualFlag;
use crate::services::database::{QueueFilter, ReceivedPaymentFilter, RecordFilter};
use crate::services::{Database, get_metrics};
use crate::sync::SyncTrigger;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use service_core::error::AppError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<ReconEngine>,
    pub sync: Arc<dyn SyncTrigger>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/overview", get(overview))
        .route("/api/recon/records", get(records))
        .route("/api/recon/record/:nvc_code", get(record_detail))
        .route("/api/recon/queue", get(queue))
        .route("/api/recon/summary", get(summary))
        .route("/api/recon/suggestions/:nvc_code", get(record_suggestions))
        .route("/api/recon/associate", post(associate))
        .route("/api/recon/flag", post(flag))
        .route("/api/search/cross", get(cross_search))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/trigger", post(sync_trigger))
        .route("/api/emails", get(emails))
        .route("/api/emails/:email_id", get(email_detail))
        .route("/api/payruns", get(payruns))
        .route("/api/received-payments", get(received_payments))
        .route("/api/received-payments/summary", get(received_payments_summary))
        .route("/api/received-payments/:payment_id", get(received_payment_detail))
        .route(
            "/api/received-payments/:payment_id/suggestions",
            get(received_payment_suggestions),
        )
        .route("/api/received-payments/:payment_id/match", post(match_received_payment))
        .route(
            "/api/received-payments/:payment_id/unmatch",
            post(unmatch_received_payment),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness only: reports the process is up without probing sources.
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "recon-service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

// ============================================================================
// Reconciliation Reads
// ============================================================================

#[derive(Debug, Deserialize)]
struct RecordParams {
    status: Option<String>,
    tenant: Option<String>,
    search: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn records(
    State(state): State<AppState>,
    Query(params): Query<RecordParams>,
) -> Result<Json<Value>, AppError> {
    let filter = RecordFilter {
        status: params.status,
        tenant: params.tenant,
        search: params.search,
        date_from: params.date_from,
        date_to: params.date_to,
        limit: params.limit.unwrap_or(200),
        offset: params.offset.unwrap_or(0),
    };
    let rows = state.db.get_records(&filter).await?;
    Ok(Json(json!({ "count": rows.len(), "records": rows })))
}

async fn record_detail(
    State(state): State<AppState>,
    Path(nvc_code): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state
        .db
        .get_record(&nvc_code)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("NVC code not found")))?;
    Ok(Json(serde_json::to_value(record).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("serialize record: {e}"))
    })?))
}

#[derive(Debug, Deserialize)]
struct QueueParams {
    status: Option<String>,
    tenant: Option<String>,
    flag: Option<String>,
    invoice_status: Option<String>,
    search: Option<String>,
    sort_by: Option<String>,
    sort_dir: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn queue(
    State(state): State<AppState>,
    Query(params): Query<QueueParams>,
) -> Result<Json<Value>, AppError> {
    let filter = QueueFilter {
        status: params.status,
        tenant: params.tenant,
        flag: params.flag,
        invoice_status: params.invoice_status,
        search: params.search,
        sort_by: params.sort_by,
        sort_dir: params.sort_dir,
        limit: params.limit.unwrap_or(100),
        offset: params.offset.unwrap_or(0),
    };
    let (rows, total) = state.db.get_queue(&filter).await?;
    Ok(Json(json!({ "records": rows, "total": total })))
}

async fn summary(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(Value::Object(state.db.get_summary().await?)))
}

async fn record_suggestions(
    State(state): State<AppState>,
    Path(nvc_code): Path<String>,
) -> Result<Json<Value>, AppError> {
    state
        .db
        .get_record(&nvc_code)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("NVC code not found")))?;
    let suggestions = state.db.find_suggestions(&nvc_code).await?;
    Ok(Json(json!({ "nvc_code": nvc_code, "suggestions": suggestions })))
}

// ============================================================================
// Overview
// ============================================================================

async fn overview(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let summary = state.db.get_summary().await?;
    let agencies = state.db.tenant_rollups().await?;
    let sync_rows = state.db.get_sync_state().await?;

    let bucket = |key: &str| summary.get(key).and_then(Value::as_i64).unwrap_or(0);
    let total = bucket("total");
    let matched_4way = bucket("full_4way");
    let matched_2way = matched_4way
        + bucket("2way_matched")
        + bucket("3way_awaiting_payment")
        + bucket("3way_no_funding");

    let mut sync = serde_json::Map::new();
    let mut errors = serde_json::Map::new();
    for row in &sync_rows {
        sync.insert(row.source.clone(), Value::from(row.status.clone()));
        if row.status.starts_with("error") {
            errors.insert(row.source.clone(), Value::from(row.status.clone()));
        }
    }

    Ok(Json(json!({
        "summary": summary,
        "total": total,
        "matched_4way": matched_4way,
        "matched_2way": matched_2way,
        "mismatched": bucket("amount_mismatch"),
        "status_issues": bucket("status_issue"),
        "unverified": total - matched_4way,
        "agencies": agencies,
        "sync": sync,
        "errors": errors,
        "degraded": !errors.is_empty(),
    })))
}

// ============================================================================
// Cross-Search
// ============================================================================

#[derive(Debug, Deserialize)]
struct CrossSearchParams {
    q: Option<String>,
    source: Option<String>,
    amount_min: Option<f64>,
    amount_max: Option<f64>,
    tenant: Option<String>,
    limit: Option<i64>,
}

async fn cross_search(
    State(state): State<AppState>,
    Query(params): Query<CrossSearchParams>,
) -> Result<Json<Value>, AppError> {
    let limit = params.limit.unwrap_or(50);
    let q = params.q.as_deref();

    let results = match params.source.as_deref().unwrap_or("invoices") {
        "emails" => serde_json::to_value(
            state
                .db
                .search_emails(q, params.amount_min, params.amount_max, limit)
                .await?,
        ),
        "invoices" => serde_json::to_value(
            state
                .db
                .search_invoices(
                    q,
                    params.amount_min,
                    params.amount_max,
                    params.tenant.as_deref(),
                    limit,
                )
                .await?,
        ),
        "payments" | "funding" => serde_json::to_value(
            state
                .db
                .search_payments(q, params.amount_min, params.amount_max, limit)
                .await?,
        ),
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "unknown source: {other} (use emails|invoices|payments)"
            )));
        }
    }
    .map_err(|e| AppError::InternalError(anyhow::anyhow!("serialize results: {e}")))?;

    let count = results.as_array().map(|a| a.len()).unwrap_or(0);
    Ok(Json(json!({ "count": count, "results": results })))
}

// ============================================================================
// Sync
// ============================================================================

async fn sync_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let sources = state.db.get_sync_state().await?;
    Ok(Json(json!({ "sources": sources })))
}

async fn sync_trigger(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let results = state.sync.trigger().await;
    Ok(Json(json!({ "success": true, "results": results })))
}

// ============================================================================
// Manual Mutations
// ============================================================================

#[derive(Debug, Deserialize)]
struct AssociateRequest {
    nvc_code: String,
    associate_with: String,
    source: String,
    #[serde(default)]
    notes: String,
}

async fn associate(
    State(state): State<AppState>,
    Json(req): Json<AssociateRequest>,
) -> Result<Json<Value>, AppError> {
    let record = state
        .engine
        .associate(&req.nvc_code, &req.associate_with, &req.source, &req.notes)
        .await?;
    Ok(Json(json!({ "success": true, "record": record })))
}

#[derive(Debug, Deserialize)]
struct FlagRequest {
    nvc_code: String,
    /// Empty string clears the flag.
    #[serde(default)]
    flag: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    actor: Option<String>,
}

async fn flag(
    State(state): State<AppState>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<Value>, AppError> {
    let flag = if req.flag.is_empty() {
        None
    } else {
        Some(ManualFlag::parse(&req.flag).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "invalid flag: use needs_outreach|investigating|escalated|resolved"
            ))
        })?)
    };

    let record = state
        .engine
        .flag(
            &req.nvc_code,
            flag,
            &req.notes,
            req.actor.as_deref().unwrap_or("api"),
        )
        .await?;
    Ok(Json(json!({ "success": true, "record": record })))
}

// ============================================================================
// Emails
// ============================================================================

#[derive(Debug, Deserialize)]
struct EmailParams {
    source: Option<String>,
    match_status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn emails(
    State(state): State<AppState>,
    Query(params): Query<EmailParams>,
) -> Result<Json<Value>, AppError> {
    let rows = state
        .db
        .get_emails(
            params.source.as_deref(),
            params.match_status.as_deref(),
            params.limit.unwrap_or(100),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(json!({ "count": rows.len(), "emails": rows })))
}

async fn email_detail(
    State(state): State<AppState>,
    Path(email_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let email = state
        .db
        .get_email(&email_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("email not found")))?;
    Ok(Json(serde_json::to_value(email).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("serialize email: {e}"))
    })?))
}

// ============================================================================
// Pay Runs
// ============================================================================

#[derive(Debug, Deserialize)]
struct PayrunParams {
    tenant: Option<String>,
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn payruns(
    State(state): State<AppState>,
    Query(params): Query<PayrunParams>,
) -> Result<Json<Value>, AppError> {
    let rows = state
        .db
        .get_payruns(
            params.tenant.as_deref(),
            params.search.as_deref(),
            params.limit.unwrap_or(200),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(json!({ "count": rows.len(), "payruns": rows })))
}

// ============================================================================
// Received Payments
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReceivedPaymentParams {
    account_id: Option<String>,
    match_status: Option<String>,
    payer: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn received_payments(
    State(state): State<AppState>,
    Query(params): Query<ReceivedPaymentParams>,
) -> Result<Json<Value>, AppError> {
    let filter = ReceivedPaymentFilter {
        account_id: params.account_id,
        match_status: params.match_status,
        payer: params.payer,
        limit: params.limit.unwrap_or(200),
        offset: params.offset.unwrap_or(0),
    };
    let (rows, total) = state.db.get_received_payments(&filter).await?;
    Ok(Json(json!({ "records": rows, "total": total })))
}

async fn received_payments_summary(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(Value::Object(
        state.db.received_payments_summary().await?,
    )))
}

async fn received_payment_detail(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let payment = state
        .db
        .get_received_payment(&payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("received payment not found")))?;
    Ok(Json(serde_json::to_value(payment).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("serialize payment: {e}"))
    })?))
}

async fn received_payment_suggestions(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let suggestions = state.engine.received_payment_suggestions(&payment_id).await?;
    Ok(Json(
        json!({ "payment_id": payment_id, "suggestions": suggestions }),
    ))
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    email_id: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default = "default_method")]
    method: String,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_method() -> String {
    "manual".to_string()
}

async fn match_received_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<Value>, AppError> {
    let linked = state
        .engine
        .link_received_payment(&payment_id, &req.email_id, req.confidence, &req.method)
        .await?;
    Ok(Json(json!({ "success": true, "linked_nvcs": linked })))
}

async fn unmatch_received_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let cleared = state.engine.unlink_received_payment(&payment_id).await?;
    Ok(Json(json!({ "success": true, "cleared_nvcs": cleared })))
}
