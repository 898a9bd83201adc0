use std::net::SocketAddr;

use futures::future::join_all;
use thiserror::Error;

use crate::util::telemetry;

mod access;
mod api;
mod config;
mod db;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Route(#[from] api::server::RouteError),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::Telemetry::register();

    tracing::info!("starting prop board service");

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();

    let handles = api::server::start_server(tx_server_ready, rx_server_ready).await?;

    _ = join_all(handles).await;
    Ok(())
}
