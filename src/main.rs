//! # wa-bridge-rs
//!
//! A bridge between a chat protocol session and a small local HTTP API.
//!
//! This server provides:
//! - Login-code pairing for a fresh session (terminal QR, code file, remote forward)
//! - Logging of every inbound message to an append-only CSV file
//! - Media download into a per-kind directory tree
//! - REST endpoints to send messages and fetch the login code and the log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ HTTP client │────▶│  Axum HTTP   │────▶│  ChatClient      │
//! └─────────────┘     │  (api.rs)    │     │  (gateway.rs)    │
//!                     └──────────────┘     └──────────────────┘
//!                            │                      │ events
//!                            ▼                      ▼
//!                     ┌──────────────┐     ┌──────────────────┐
//!                     │ messages.csv │◀────│  Classifier      │──▶ media/<kind>/
//!                     └──────────────┘     └──────────────────┘
//! ```
//!
//! ## API Endpoints
//!
//! - `POST /send` - Send a text message (`{"jid", "text"}`)
//! - `GET /qr/text` - Current login code as JSON
//! - `GET /qr/photo` - Current login code as a 256x256 PNG
//! - `GET /csv` - Full contents of the message log
//! - `GET /health` - Server health and session phase

mod api;
mod bootstrap;
mod classifier;
mod client;
mod config;
mod error;
mod gateway;
mod media;
mod message_log;
mod qr;

use std::{net::SocketAddr, sync::Arc, time::Instant};

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bootstrap::{LoginCodeSink, SessionPhase};
use crate::classifier::InboundHandler;
use crate::client::ChatClient;
use crate::config::Config;
use crate::gateway::GatewayClient;
use crate::media::MediaStore;
use crate::message_log::MessageLog;
use crate::qr::LoginCodeFile;

/// Log a fatal startup error and exit.
fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wa_bridge_rs=debug,tower_http=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| fatal("Failed to load configuration", e));

    let client: Arc<dyn ChatClient> = Arc::new(GatewayClient::new(config.gateway_url.clone()));
    let log = Arc::new(MessageLog::new(config.log_file.clone()));
    tracing::info!("Logging messages to {}", log.path().display());
    let code_file = LoginCodeFile::new(config.qr_file.clone());
    let (phase_tx, phase_rx) = watch::channel(SessionPhase::Unauthenticated);
    let phase_tx = Arc::new(phase_tx);

    // Subscribe before connecting so no early event is missed
    let events = client
        .events()
        .await
        .unwrap_or_else(|e| fatal("Failed to open client event stream", e));

    let sink = LoginCodeSink {
        code_file: code_file.clone(),
        forward_url: config.qr_forward_url.clone(),
        http: reqwest::Client::new(),
        render_to_terminal: true,
    };
    let pairing = bootstrap::establish(client.as_ref(), sink, &phase_tx)
        .await
        .unwrap_or_else(|e| fatal("Failed to connect", e));

    if let Some(done) = pairing {
        tokio::spawn(async move {
            if done.await.is_ok() {
                tracing::info!("Login code stream finished");
            }
        });
    }

    let handler = Arc::new(InboundHandler::new(
        client.clone(),
        MediaStore::new(config.media_dir.clone()),
        log.clone(),
    ));
    tokio::spawn(bootstrap::run_event_loop(events, handler, phase_tx.clone()));

    let state = Arc::new(api::AppState {
        start_time: Instant::now(),
        client,
        log,
        code_file,
        send_timeout: config.send_timeout,
        phase: phase_rx,
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("wa-bridge-rs v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| fatal("Failed to bind listener", e));
    if let Err(e) = axum::serve(listener, app).await {
        fatal("Server error", e);
    }
}
