//! HTTP bridge server
//!
//! Accepts `POST /sendToMicrobit` and forwards the request body to the
//! serial sink as a single length-prefixed frame. Everything else is an
//! error response; no filesystem content is ever served.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::protocol::{Frame, DEFAULT_PORT, MAX_PAYLOAD_LEN};
use crate::serial::FrameSink;

/// Hard cap on buffered request bodies. Payloads between the frame limit
/// and this cap are read and answered with a 400; anything larger is
/// refused before buffering.
const BODY_LIMIT: usize = 16 * (MAX_PAYLOAD_LEN + 1);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started and is accepting requests
    Started { bind_addr: SocketAddr },
    /// A payload was framed and written to the serial link
    PayloadForwarded {
        remote: Option<SocketAddr>,
        payload_len: usize,
        wire_len: usize,
    },
    /// A request was refused before reaching the serial link
    RequestRejected {
        remote: Option<SocketAddr>,
        reason: String,
    },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error { message: String },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port to listen on
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Per-request deadline covering body read and serial write
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl BridgeConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: Option<String>) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// The serial sink shared across requests. Requests are handled
/// concurrently, so the mutex is what keeps frames from interleaving.
type SharedSink = Arc<Mutex<Option<Box<dyn FrameSink>>>>;

#[derive(Clone)]
struct AppState {
    sink: SharedSink,
    event_tx: mpsc::Sender<ServerEvent>,
    request_timeout: Duration,
}

/// HTTP bridge server
pub struct BridgeServer {
    /// Server configuration
    config: BridgeConfig,
    /// Serial sink, absent when running without hardware
    sink: SharedSink,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl BridgeServer {
    /// Create a new server around an optional serial sink
    pub fn new(config: BridgeConfig, sink: Option<Box<dyn FrameSink>>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            sink: Arc::new(Mutex::new(sink)),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_host = self.config.bind_address.as_deref().unwrap_or("0.0.0.0");
        let bind_addr = format!("{}:{}", bind_host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let state = AppState {
            sink: self.sink.clone(),
            event_tx: self.event_tx.clone(),
            request_timeout: self.config.request_timeout,
        };
        let app = build_router(state);

        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                tracing::info!("Server shutdown requested");
            });

            if let Err(e) = serve.await {
                tracing::error!("Server error: {}", e);
                let _ = event_tx
                    .send(ServerEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(())
    }

    /// Stop the server
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sendToMicrobit", post(send_to_microbit))
        .fallback(unknown_path)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_timeout,
        ))
        .with_state(state)
}

/// Per-request deadline so a slow client cannot hold the request path open
async fn enforce_timeout(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(state.request_timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out\n").into_response(),
    }
}

/// The one bridge operation: frame the body and write it to the device
async fn send_to_microbit(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);

    if !headers.contains_key(header::CONTENT_LENGTH) {
        return reject(
            &state,
            remote,
            StatusCode::LENGTH_REQUIRED,
            "Content-Length header required\n",
        )
        .await;
    }

    let frame = match Frame::new(body) {
        Ok(frame) => frame,
        Err(e) => {
            return reject(&state, remote, StatusCode::BAD_REQUEST, &format!("{}\n", e)).await;
        }
    };

    let mut sink = state.sink.lock().await;
    match sink.as_mut() {
        None => {
            reject(
                &state,
                remote,
                StatusCode::SERVICE_UNAVAILABLE,
                "No serial device attached\n",
            )
            .await
        }
        Some(sink) => match sink.send_frame(&frame).await {
            Ok(wire_len) => {
                let _ = state
                    .event_tx
                    .send(ServerEvent::PayloadForwarded {
                        remote,
                        payload_len: frame.payload().len(),
                        wire_len,
                    })
                    .await;

                (StatusCode::OK, "Sent to micro:bit\n").into_response()
            }
            Err(e) => {
                tracing::error!("Serial write failed: {}", e);
                let _ = state
                    .event_tx
                    .send(ServerEvent::Error {
                        message: format!("Serial write failed: {}", e),
                    })
                    .await;

                (StatusCode::BAD_GATEWAY, "Serial write failed\n").into_response()
            }
        },
    }
}

/// Catch-all for paths the bridge does not expose
async fn unknown_path(method: Method, uri: Uri) -> Response {
    if method == Method::POST {
        tracing::debug!("Unknown POST path: {}", uri.path());
        (StatusCode::NOT_FOUND, "Unknown POST path\n").into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not found\n").into_response()
    }
}

async fn reject(
    state: &AppState,
    remote: Option<SocketAddr>,
    status: StatusCode,
    message: &str,
) -> Response {
    tracing::warn!("Rejected request ({}): {}", status, message.trim_end());
    let _ = state
        .event_tx
        .send(ServerEvent::RequestRejected {
            remote,
            reason: message.trim_end().to_string(),
        })
        .await;

    (status, message.to_string()).into_response()
}
