//! Session bootstrap and inbound event dispatch.
//!
//! ```text
//! Unauthenticated ──(no paired session)──▶ AwaitingCode ──(Connected)──▶ Authenticated
//!        │                                                                  ▲
//!        └──────────────────(paired session resumed)─────────────────────────┘
//! ```
//!
//! While awaiting a code, a worker drains the client's login-code stream.
//! Each code is rendered to the terminal, written to the code file and
//! forwarded to the configured endpoint. The worker ends when the stream
//! closes and reports that on a oneshot channel.
//!
//! Authenticated is final for the life of the process. Logouts and
//! disconnects are only logged; reconnecting is left to the client.

use std::io::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn, Instrument};

use crate::classifier::InboundHandler;
use crate::client::{ChatClient, ChatEvent, LoginEvent};
use crate::error::BridgeError;
use crate::qr::{self, LoginCodeFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    AwaitingCode,
    Authenticated,
}

/// Where freshly issued login codes go.
#[derive(Clone)]
pub struct LoginCodeSink {
    pub code_file: LoginCodeFile,
    pub forward_url: Option<String>,
    pub http: reqwest::Client,
    /// Print codes to stdout as half-block QR art
    pub render_to_terminal: bool,
}

impl LoginCodeSink {
    /// Handle one issued code. Every step is best-effort and only logs.
    pub async fn accept(&self, code: &str) {
        if self.render_to_terminal {
            print_code(code);
        }

        if let Err(e) = self.code_file.write(code).await {
            error!("Failed to save QR code to {}: {}", self.code_file.path().display(), e);
        }

        if let Some(url) = &self.forward_url {
            let http = self.http.clone();
            let url = url.clone();
            let code = code.to_string();
            tokio::spawn(
                async move {
                    forward_code(&http, &url, &code).await;
                }
                .in_current_span(),
            );
        }
    }
}

fn print_code(code: &str) {
    print_code_to(&mut io::stdout().lock(), code);
}

fn print_code_to<W: Write>(out: &mut W, code: &str) {
    let art = match qr::render_terminal(code) {
        Ok(art) => art,
        Err(e) => {
            warn!("Failed to render QR code to terminal: {}", e);
            return;
        }
    };
    if let Err(e) = writeln!(out, "{}", art).and_then(|_| out.flush()) {
        warn!("Failed to print QR code to terminal: {}", e);
    }
}

/// POST `{"qr_code": code}` to `url`, logging the outcome.
async fn forward_code(http: &reqwest::Client, url: &str, code: &str) {
    let result = http
        .post(url)
        .json(&serde_json::json!({ "qr_code": code }))
        .send()
        .await;

    match result {
        Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
            info!("QR code forwarded to {}", url);
        }
        Ok(resp) => warn!("QR forward to {} returned {}", url, resp.status()),
        Err(e) => warn!("Failed to forward QR code to {}: {}", url, e),
    }
}

/// Drain the login-code stream until the client closes it.
async fn run_code_worker(
    mut codes: mpsc::Receiver<LoginEvent>,
    sink: LoginCodeSink,
    done: oneshot::Sender<()>,
) {
    while let Some(event) = codes.recv().await {
        match event {
            LoginEvent::Code(code) => {
                info!("New login code issued");
                sink.accept(&code).await;
            }
            LoginEvent::Other(result) => info!("QR channel result: {}", result),
        }
    }
    let _ = done.send(());
}

/// Connect the client, pairing first if no session exists.
///
/// Returns the completion signal of the login-code worker when pairing was
/// needed. Any error here is fatal to startup.
pub async fn establish(
    client: &dyn ChatClient,
    sink: LoginCodeSink,
    phase: &watch::Sender<SessionPhase>,
) -> Result<Option<oneshot::Receiver<()>>, BridgeError> {
    if client.is_paired().await? {
        client.connect().await?;
        info!("Resumed existing session");
        phase.send_replace(SessionPhase::Authenticated);
        return Ok(None);
    }

    info!("No paired session, requesting login code");
    let codes = client.login_codes().await?;
    client.connect().await?;
    phase.send_replace(SessionPhase::AwaitingCode);

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(run_code_worker(codes, sink, done_tx));
    Ok(Some(done_rx))
}

// ============================================================================
// Event dispatch
// ============================================================================

/// React to a single client event.
pub async fn dispatch(
    event: ChatEvent,
    handler: &InboundHandler,
    phase: &watch::Sender<SessionPhase>,
) {
    match event {
        ChatEvent::Message(msg) => {
            if let Err(e) = handler.handle(&msg).await {
                error!(
                    "Failed to handle inbound message {} from {}: {}",
                    msg.info.id, msg.info.sender, e
                );
            }
        }
        ChatEvent::Connected => {
            info!("Connected to chat service");
            phase.send_replace(SessionPhase::Authenticated);
        }
        ChatEvent::OfflineSyncCompleted => info!("Offline sync completed"),
        ChatEvent::LoggedOut => warn!("Logged out"),
        ChatEvent::Disconnected => warn!("Disconnected"),
        ChatEvent::Unhandled(name) => info!("Unhandled event: {}", name),
    }
}

/// Drain client events until the stream closes.
pub async fn run_event_loop(
    mut events: mpsc::Receiver<ChatEvent>,
    handler: Arc<InboundHandler>,
    phase: Arc<watch::Sender<SessionPhase>>,
) {
    while let Some(event) = events.recv().await {
        dispatch(event, &handler, &phase).await;
    }
    warn!("Client event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::{ImageMessage, IncomingMessage, Jid, MediaHandle, MessageInfo, ProtoMessage};
    use crate::media::MediaStore;
    use crate::message_log::MessageLog;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn sink(dir: &std::path::Path) -> LoginCodeSink {
        LoginCodeSink {
            code_file: LoginCodeFile::new(dir.join("qrcode.txt")),
            forward_url: None,
            http: reqwest::Client::new(),
            render_to_terminal: false,
        }
    }

    /// Serve `status` on `/qr` and pass every posted body to the receiver.
    async fn spawn_forward_target(status: StatusCode) -> (String, mpsc::Receiver<serde_json::Value>) {
        let (tx, rx) = mpsc::channel(8);
        let app = Router::new().route(
            "/qr",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body).await;
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/qr", addr), rx)
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_code_is_forwarded_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let (url, mut bodies) = spawn_forward_target(StatusCode::OK).await;
        let sink = LoginCodeSink {
            forward_url: Some(url),
            ..sink(dir.path())
        };

        sink.accept("2@forward-me").await;

        let body = tokio::time::timeout(Duration::from_secs(5), bodies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, serde_json::json!({ "qr_code": "2@forward-me" }));
        let saved = std::fs::read_to_string(dir.path().join("qrcode.txt")).unwrap();
        assert_eq!(saved, "2@forward-me");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_forward_is_only_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (url, mut bodies) = spawn_forward_target(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = LoginCodeSink {
            forward_url: Some(url),
            ..sink(dir.path())
        };

        sink.accept("2@rejected").await;

        let saved = std::fs::read_to_string(dir.path().join("qrcode.txt")).unwrap();
        assert_eq!(saved, "2@rejected");
        tokio::time::timeout(Duration::from_secs(5), bodies.recv())
            .await
            .unwrap()
            .unwrap();
        for _ in 0..100 {
            if logs_contain("QR forward to") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(logs_contain("QR forward to"));
        assert!(logs_contain("500"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_forward_is_only_logged() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/qr", listener.local_addr().unwrap());
        drop(listener);
        let sink = LoginCodeSink {
            forward_url: Some(url),
            ..sink(dir.path())
        };

        sink.accept("2@nobody-home").await;

        let saved = std::fs::read_to_string(dir.path().join("qrcode.txt")).unwrap();
        assert_eq!(saved, "2@nobody-home");
        for _ in 0..100 {
            if logs_contain("Failed to forward QR code") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(logs_contain("Failed to forward QR code"));
    }

    #[test]
    #[traced_test]
    fn test_terminal_write_failure_is_logged() {
        print_code_to(&mut BrokenPipe, "2@terminal");
        assert!(logs_contain("Failed to print QR code to terminal"));
    }

    #[test]
    fn test_terminal_output_is_written() {
        let mut out = Vec::new();
        print_code_to(&mut out, "2@terminal");
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().count() > 10);
    }

    #[tokio::test]
    async fn test_unpaired_session_persists_last_code() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient {
            login_script: vec![
                LoginEvent::Code("first-code".to_string()),
                LoginEvent::Code("second-code".to_string()),
                LoginEvent::Other("success".to_string()),
            ],
            ..Default::default()
        };
        let (phase, phase_rx) = watch::channel(SessionPhase::Unauthenticated);

        let done = establish(&client, sink(dir.path()), &phase)
            .await
            .unwrap()
            .expect("pairing worker");
        assert_eq!(*phase_rx.borrow(), SessionPhase::AwaitingCode);

        done.await.unwrap();
        let saved = std::fs::read_to_string(dir.path().join("qrcode.txt")).unwrap();
        assert_eq!(saved, "second-code");
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_paired_session_resumes_without_code() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient {
            paired: true,
            ..Default::default()
        };
        let (phase, phase_rx) = watch::channel(SessionPhase::Unauthenticated);

        let done = establish(&client, sink(dir.path()), &phase).await.unwrap();
        assert!(done.is_none());
        assert_eq!(*phase_rx.borrow(), SessionPhase::Authenticated);
        assert!(!dir.path().join("qrcode.txt").exists());
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient {
            paired: true,
            fail_connect: true,
            ..Default::default()
        };
        let (phase, _rx) = watch::channel(SessionPhase::Unauthenticated);

        let result = establish(&client, sink(dir.path()), &phase).await;
        assert!(matches!(result, Err(BridgeError::Gateway { .. })));
        assert_eq!(*phase.borrow(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_media_download_is_logged_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MessageLog::new(dir.path().join("messages.csv")));
        let handler = InboundHandler::new(
            Arc::new(MockClient::default()),
            MediaStore::new(dir.path().join("media")),
            log.clone(),
        );
        let (phase, _rx) = watch::channel(SessionPhase::Authenticated);

        let event = ChatEvent::Message(Box::new(IncomingMessage {
            info: MessageInfo {
                id: "3EB0DEAD".to_string(),
                sender: Jid::new("79001234567", "s.whatsapp.net"),
                push_name: None,
                timestamp: "2026-02-07T10:30:00Z".parse().unwrap(),
            },
            message: ProtoMessage {
                image_message: Some(ImageMessage {
                    caption: None,
                    media: MediaHandle { id: "gone".to_string(), mime_type: None },
                }),
                ..Default::default()
            },
        }));

        dispatch(event, &handler, &phase).await;

        assert!(!log.path().exists());
        assert!(logs_contain("Failed to handle inbound message 3EB0DEAD"));
    }

    #[tokio::test]
    async fn test_connected_event_authenticates() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(InboundHandler::new(
            Arc::new(MockClient::default()),
            MediaStore::new(dir.path().join("media")),
            Arc::new(MessageLog::new(dir.path().join("messages.csv"))),
        ));
        let (phase, phase_rx) = watch::channel(SessionPhase::AwaitingCode);
        let (tx, rx) = mpsc::channel(4);

        tx.send(ChatEvent::Unhandled("receipt".to_string())).await.unwrap();
        tx.send(ChatEvent::Connected).await.unwrap();
        drop(tx);

        run_event_loop(rx, handler, Arc::new(phase)).await;
        assert_eq!(*phase_rx.borrow(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_keeps_authenticated_phase() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(InboundHandler::new(
            Arc::new(MockClient::default()),
            MediaStore::new(dir.path().join("media")),
            Arc::new(MessageLog::new(dir.path().join("messages.csv"))),
        ));
        let (phase, phase_rx) = watch::channel(SessionPhase::Authenticated);
        let (tx, rx) = mpsc::channel(4);

        tx.send(ChatEvent::LoggedOut).await.unwrap();
        tx.send(ChatEvent::Disconnected).await.unwrap();
        drop(tx);

        run_event_loop(rx, handler, Arc::new(phase)).await;
        assert_eq!(*phase_rx.borrow(), SessionPhase::Authenticated);
    }
}
