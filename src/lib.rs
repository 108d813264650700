//! Polling site backend.
//!
//! Users browse published questions, cast one vote per question (a later
//! vote replaces the earlier one) and read the tallied results. Staff
//! accounts create questions and choices.
//!
//! # Layout
//! - [`routes`] wires the HTTP surface onto [`handlers`].
//! - [`store::PollStore`] is the storage seam; [`poll::PgPollStore`] is the
//!   PostgreSQL implementation, `store::MemoryPollStore` (feature `testkit`)
//!   the in-process one used by tests.
//! - [`models::Question`] owns the voting-window rules.
//!
//! # Running
//! ```sh
//! DATABASE_URL=postgres://localhost/polls RUST_LOG=info cargo run
//! ```
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::Handle;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poll;
pub mod routes;
pub mod state;
pub mod store;

use config::Config;
use state::AppState;

pub async fn start_server() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading configuration...");
    let config = Config::load()?;
    let port = config.port;

    info!("Initializing state...");
    let state = AppState::connect(config).await?;
    let app = routes::create_routes(state);

    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
