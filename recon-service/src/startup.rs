//! Application startup and lifecycle management.

use crate::api::{self, AppState};
use crate::config::ReconConfig;
use crate::engine::ReconEngine;
use crate::services::{Database, init_metrics};
use crate::sources::email::{EmailAdapter, HttpEmailFeed};
use crate::sources::inbound::InboundAdapter;
use crate::sources::invoice::{InvoiceAdapter, PgInvoiceFeed};
use crate::sources::outbound::OutboundAdapter;
use crate::sources::processor::HttpProcessorFeed;
use crate::sync::{SyncRunner, SyncTrigger};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::net::TcpListener;

type Runner = SyncRunner<HttpEmailFeed, PgInvoiceFeed, Arc<HttpProcessorFeed>>;

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    runner: Arc<Runner>,
    spawn_scheduler: bool,
}

impl Application {
    /// Build the application: store, engine, source adapters, listener.
    pub async fn build(config: ReconConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build without spawning the background scheduler. Cycles still run
    /// on demand through the sync trigger; used by tests.
    pub async fn build_without_scheduler(config: ReconConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: ReconConfig, spawn_scheduler: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(&config.store.path, config.store.connect_timeout_secs)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to open embedded store");
                e
            })?;
        db.run_migrations().await?;
        let db = Arc::new(db);

        let engine = Arc::new(ReconEngine::new(db.clone(), config.matching.clone()));

        // Sources with no configured endpoint are disabled; their sync
        // steps record `skipped` and the engine serves cached data.
        let email = if config.email_feed.gateway_url.is_empty() {
            tracing::info!("email gateway not configured - email source disabled");
            None
        } else {
            let feed =
                HttpEmailFeed::new(&config.email_feed.gateway_url, config.email_feed.timeout_secs)?;
            Some(EmailAdapter::new(feed, &config.email_feed))
        };

        let invoices = if config.invoice_feed.database_url.is_empty() {
            tracing::info!("invoice database not configured - invoice source disabled");
            None
        } else {
            let feed = PgInvoiceFeed::connect(&config.invoice_feed)?;
            Some(InvoiceAdapter::new(feed, config.invoice_feed.max_retries))
        };

        let (inbound, outbound) = if config.processor.api_url.is_empty() {
            tracing::info!("processor API not configured - processor sources disabled");
            (None, None)
        } else {
            let feed = Arc::new(HttpProcessorFeed::new(&config.processor)?);
            (
                Some(InboundAdapter::new(
                    feed.clone(),
                    config.processor.account_ids.clone(),
                    config.processor.max_retries,
                )),
                Some(OutboundAdapter::new(
                    feed,
                    config.processor.account_ids.clone(),
                    config.processor.max_retries,
                )),
            )
        };

        let runner = Arc::new(SyncRunner::new(
            engine.clone(),
            db.clone(),
            &config.sync,
            email,
            invoices,
            inbound,
            outbound,
        ));

        let state = AppState {
            db,
            engine,
            sync: runner.clone() as Arc<dyn SyncTrigger>,
        };

        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            sync_interval_secs = config.sync.interval_secs,
            "recon service listener bound"
        );

        Ok(Self {
            port,
            listener,
            state,
            runner,
            spawn_scheduler,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a handle to the store.
    pub fn db(&self) -> Arc<Database> {
        self.state.db.clone()
    }

    /// Get a handle to the engine.
    pub fn engine(&self) -> Arc<ReconEngine> {
        self.state.engine.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = api::router(self.state.clone());

        if self.spawn_scheduler {
            tokio::spawn(self.runner.clone().run());
        }

        tracing::info!(
            service = "recon-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
