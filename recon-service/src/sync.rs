//! Background sync: drives the fixed-order cycle on a configured interval.
//!
//! Cycle order: (1) emails, (2) invoices, (3) received payments,
//! (4) outbound payments — concurrently — then (5) the lump-sum matcher
//! pass once emails and received payments have both landed.

use crate::config::SyncConfig;
use crate::engine::ReconEngine;
use crate::services::Database;
use crate::services::metrics;
use crate::sources::email::{EmailAdapter, EmailFeed};
use crate::sources::inbound::InboundAdapter;
use crate::sources::invoice::{InvoiceAdapter, InvoiceFeed};
use crate::sources::outbound::OutboundAdapter;
use crate::sources::processor::ProcessorFeed;
use crate::sources::{FetchWindow, SourceError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Handle the API layer uses to force an immediate cycle.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    async fn trigger(&self) -> serde_json::Value;
}

pub struct SyncRunner<E, I, P> {
    engine: Arc<ReconEngine>,
    db: Arc<Database>,
    email: Option<EmailAdapter<E>>,
    invoices: Option<InvoiceAdapter<I>>,
    inbound: Option<InboundAdapter<P>>,
    outbound: Option<OutboundAdapter<P>>,
    window: FetchWindow,
    interval: Duration,
}

impl<E, I, P> SyncRunner<E, I, P>
where
    E: EmailFeed,
    I: InvoiceFeed,
    P: ProcessorFeed,
{
    pub fn new(
        engine: Arc<ReconEngine>,
        db: Arc<Database>,
        config: &SyncConfig,
        email: Option<EmailAdapter<E>>,
        invoices: Option<InvoiceAdapter<I>>,
        inbound: Option<InboundAdapter<P>>,
        outbound: Option<OutboundAdapter<P>>,
    ) -> Self {
        Self {
            engine,
            db,
            email,
            invoices,
            inbound,
            outbound,
            window: FetchWindow::days(config.lookback_days),
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// Drive cycles until the task is dropped. Ticks missed while a slow
    /// cycle runs are skipped, never queued, so cycles cannot overlap.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            // The cycle deadline equals the interval; an overrun is cut off
            // and recorded, and the skipped ticks surface in sync state.
            match tokio::time::timeout(self.interval, self.run_cycle()).await {
                Ok(results) => {
                    info!(?results, "sync cycle complete");
                }
                Err(_) => {
                    warn!("sync cycle overran its deadline, skipping until next tick");
                    metrics::record_sync_run("scheduler", "skipped");
                    if let Err(e) = self.db.update_sync_state("scheduler", 0, "skipped").await {
                        error!(error = %e, "failed to record skipped cycle");
                    }
                }
            }
        }
    }

    /// One full cycle. Each step isolates its own failure into sync state;
    /// a broken source never stops the others.
    pub async fn run_cycle(&self) -> Vec<(&'static str, i64)> {
        let deadline = Instant::now() + self.interval;
        info!(lookback_days = self.window.days_back, "sync cycle started");

        let (emails, invoices, received, payments) = tokio::join!(
            self.sync_emails(deadline),
            self.sync_invoices(deadline),
            self.sync_received_payments(deadline),
            self.sync_outbound_payments(deadline),
        );

        // Step 5 needs legs 1 and 3 in the store.
        let matched = match self.engine.run_lump_sum_pass().await {
            Ok(count) => {
                self.record_ok("lump_sum_matcher", count).await;
                count
            }
            Err(e) => {
                error!(error = %e, "lump-sum matcher pass failed");
                self.fail("lump_sum_matcher", e.to_string()).await;
                0
            }
        };

        vec![
            ("emails", emails),
            ("invoices", invoices),
            ("received_payments", received),
            ("payments", payments),
            ("lump_sum_matcher", matched),
        ]
    }

    async fn sync_emails(&self, deadline: Instant) -> i64 {
        let Some(adapter) = &self.email else {
            self.record_skipped("emails").await;
            return 0;
        };
        match adapter.fetch(self.window, Some(deadline)).await {
            Ok(batch) => match self.engine.apply_email_batch(&batch).await {
                Ok(count) => {
                    self.record_ok("emails", count).await;
                    count
                }
                Err(e) => self.fail("emails", e.to_string()).await,
            },
            Err(e) => self.fail_source("emails", e).await,
        }
    }

    async fn sync_invoices(&self, deadline: Instant) -> i64 {
        let Some(adapter) = &self.invoices else {
            self.record_skipped("invoices").await;
            return 0;
        };

        let result: Result<i64, SourceError> = async {
            let invoices = adapter.fetch_invoices(self.window, Some(deadline)).await?;
            let payruns = adapter.fetch_payruns(self.window, Some(deadline)).await?;
            let count = self
                .engine
                .apply_invoice_batch(&invoices)
                .await
                .map_err(|e| SourceError::malformed(anyhow::anyhow!("{e}")))?;
            self.engine
                .apply_payrun_batch(&payruns)
                .await
                .map_err(|e| SourceError::malformed(anyhow::anyhow!("{e}")))?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                self.record_ok("invoices", count).await;
                count
            }
            Err(e) => self.fail_source("invoices", e).await,
        }
    }

    async fn sync_received_payments(&self, deadline: Instant) -> i64 {
        let Some(adapter) = &self.inbound else {
            self.record_skipped("received_payments").await;
            return 0;
        };
        match adapter.fetch(self.window, Some(deadline)).await {
            Ok(batch) => match self.engine.apply_received_batch(&batch).await {
                Ok(count) => {
                    self.record_ok("received_payments", count).await;
                    count
                }
                Err(e) => self.fail("received_payments", e.to_string()).await,
            },
            Err(e) => self.fail_source("received_payments", e).await,
        }
    }

    async fn sync_outbound_payments(&self, deadline: Instant) -> i64 {
        let Some(adapter) = &self.outbound else {
            self.record_skipped("payments").await;
            return 0;
        };
        match adapter.fetch(self.window, Some(deadline)).await {
            Ok(batch) => match self.engine.apply_outbound_batch(&batch).await {
                Ok(count) => {
                    self.record_ok("payments", count).await;
                    count
                }
                Err(e) => self.fail("payments", e.to_string()).await,
            },
            Err(e) => self.fail_source("payments", e).await,
        }
    }

    async fn record_ok(&self, source: &str, count: i64) {
        metrics::record_sync_run(source, "ok");
        if let Err(e) = self.db.update_sync_state(source, count, "ok").await {
            error!(source = %source, error = %e, "failed to record sync state");
        }
    }

    async fn record_skipped(&self, source: &str) {
        if let Err(e) = self.db.update_sync_state(source, 0, "skipped").await {
            error!(source = %source, error = %e, "failed to record sync state");
        }
    }

    async fn fail_source(&self, source: &str, err: SourceError) -> i64 {
        self.fail(source, err.to_string()).await
    }

    /// Degraded mode: record the error, keep serving cached data.
    async fn fail(&self, source: &str, message: String) -> i64 {
        error!(source = %source, error = %message, "sync step failed");
        metrics::record_sync_run(source, "error");
        metrics::record_source_error(source);
        let status: String = format!("error: {message}").chars().take(96).collect();
        if let Err(e) = self.db.update_sync_state(source, 0, &status).await {
            error!(source = %source, error = %e, "failed to record sync state");
        }
        0
    }
}

#[async_trait]
impl<E, I, P> SyncTrigger for SyncRunner<E, I, P>
where
    E: EmailFeed,
    I: InvoiceFeed,
    P: ProcessorFeed,
{
    async fn trigger(&self) -> serde_json::Value {
        let results = self.run_cycle().await;
        serde_json::Value::Object(
            results
                .into_iter()
                .map(|(source, count)| (source.to_string(), serde_json::Value::from(count)))
                .collect(),
        )
    }
}
