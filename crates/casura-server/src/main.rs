// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Casura Server - HTTP API for the case orchestration engine.
//!
//! Connects to PostgreSQL or SQLite (selected by the database URL scheme),
//! runs migrations, builds the engine, and serves the API until ctrl-c.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info};

use casura_core::config::Config;
use casura_core::engine::CaseEngine;
use casura_core::migrations;
use casura_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use casura_server::routes;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("casura_core=info".parse().unwrap())
                .add_directive("casura_server=info".parse().unwrap()),
        )
        .init();

    info!("Starting Casura Server");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        command_retries = config.command_retries,
        authorization_enabled = config.authorization_enabled,
        "Configuration loaded"
    );

    // Connect to the database and run migrations
    info!("Connecting to database...");
    let persistence: Arc<dyn Persistence> = if config.database_url.starts_with("postgres") {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        info!("Running database migrations...");
        migrations::run_postgres(&pool).await?;
        Arc::new(PostgresPersistence::new(pool))
    } else {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        info!("Running database migrations...");
        migrations::run_sqlite(&pool).await?;
        Arc::new(SqlitePersistence::new(pool))
    };
    info!("Database ready");

    // Build the engine
    let engine = Arc::new(
        CaseEngine::builder()
            .persistence(persistence)
            .command_retries(config.command_retries)
            .authorization_enabled(config.authorization_enabled)
            .build()?,
    );

    // Serve the API until shutdown
    let app = routes::router(engine);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
