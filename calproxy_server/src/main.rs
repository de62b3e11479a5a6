//! This crate implements an iCalendar server merging the calendars listed in an upstream index.
//!
//! The merged calendar is served on every path except `/health` and `/metrics`.

mod args;
mod route;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use calproxy_core::{
    config::{without_userinfo, Config},
    metrics::Counters,
    Pipeline,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{args::Arguments, route::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Arguments::parse();
    let config = Config::from(&args.upstream);
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(&config, counters.clone())?;
    let state = Arc::new(AppState {
        pipeline,
        counters,
        request_timeout: Duration::from_secs(args.request_timeout),
    });
    let app = route::router(state);

    info!(addr = %args.addr, target = %without_userinfo(&config.target), "serving");
    axum::Server::try_bind(&args.addr)?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server exit");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
