//! HTTP server hosting the measurement endpoints.
//!
//! Accepts TCP connections, serves each one on its own task with hyper, and
//! routes requests to the download, upload and latency protocols.

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::protocols::download::{self, random_filler};
use crate::protocols::{latency, upload};

/// Smallest read buffer hyper accepts.
const MIN_READ_BUFFER: usize = 8192;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Download payload, shared by all sessions
    pub filler: Bytes,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Config) -> io::Result<Self> {
        let filler = random_filler(config.chunk_size).map_err(io::Error::from)?;

        Ok(Self {
            config: Arc::new(config),
            filler,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }
}

/// Build the request router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/download", get(download::download))
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/ws", get(latency::ws))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

/// `GET /` and `HEAD /`: liveness.
async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "SpeedTest Backend",
        "uptime": "alive",
        "started_at": state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

/// Allow cross-origin access from browser clients.
async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let allow_origin = HeaderValue::from_str(&state.config.allow_origin)
        .unwrap_or_else(|_| HeaderValue::from_static("*"));

    if request.method() == Method::OPTIONS {
        let allow_headers = request
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));

        return (
            StatusCode::NO_CONTENT,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin),
                (
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("GET, HEAD, POST, OPTIONS"),
                ),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers),
            ],
        )
            .into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    response
}

/// Create a TCP listener with SO_REUSEADDR.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Server instance
pub struct Server {
    state: AppState,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> io::Result<Self> {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Ok(Server {
            state: AppState::new(config)?,
            connection_limit,
        })
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = self.state.config.listen.parse()?;
        let listener = create_listener(addr)?;
        info!(address = %addr, "Server listening");

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        };
        self.serve(listener, shutdown).await?;

        info!("Server stopped");
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), tokio::sync::AcquireError> {
        let app = router(self.state.clone());
        let max_buf_size = self.state.config.chunk_size.max(MIN_READ_BUFFER);
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                permit = self.connection_limit.clone().acquire_owned() => permit?,
                _ = &mut shutdown => return Ok(()),
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown => return Ok(()),
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    let app = app.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, app, max_buf_size).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Serve HTTP/1.1 on a single client connection.
///
/// Upgrades are enabled for the latency WebSocket. The read buffer bound
/// also bounds the size of each upload chunk.
async fn handle_connection(
    stream: TcpStream,
    app: Router,
    max_buf_size: usize,
) -> Result<(), hyper::Error> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    http1::Builder::new()
        .max_buf_size(max_buf_size)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app))
        .with_upgrades()
        .await
}
