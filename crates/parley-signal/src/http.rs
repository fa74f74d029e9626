//! Plain HTTP on the signaling port
//!
//! The listener peeks at each new connection. WebSocket upgrades go to the
//! relay; everything else is handed to an axum [`Router`] served over
//! HTTP/1.1: health stats, the cached ICE server list and the static web
//! client.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::debug;

use parley_core::types::host_scope;

use crate::credentials::CredentialCache;
use crate::relay::{ChannelRelay, Outbox};

/// Largest request head we accept
const MAX_HEAD_LEN: usize = 8 * 1024;

/// How long to wait for a complete request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between peeks while the head is still arriving
const PEEK_RETRY: Duration = Duration::from_millis(10);

/// Body of a failed `/ice` request
const ICE_UNAVAILABLE: &str = "Problem getting ice servers data";

/// The relay as shared between the WebSocket handlers and `/health`
pub type SharedRelay = Arc<Mutex<ChannelRelay<Outbox>>>;

/// Request line and headers, enough to pick a protocol
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Path without the query string
    pub path: String,
    headers: Vec<(String, String)>,
}

/// Outcome of parsing a possibly partial request head
#[derive(Debug)]
pub enum HeadParse {
    /// The blank line has not arrived yet
    Incomplete,
    /// Not an HTTP request; no amount of waiting will fix it
    Malformed,
    Complete(RequestHead),
}

impl RequestHead {
    pub fn parse(buf: &[u8]) -> HeadParse {
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return HeadParse::Incomplete;
        };
        match Self::parse_complete(&buf[..end]) {
            Some(head) => HeadParse::Complete(head),
            None => HeadParse::Malformed,
        }
    }

    fn parse_complete(head: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(head).ok()?;
        let mut lines = text.split("\r\n");

        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?;
        if !request_line.next()?.starts_with("HTTP/") {
            return None;
        }
        let path = target.split('?').next().unwrap_or(target).to_string();

        let headers = lines
            .map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            method,
            path,
            headers,
        })
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Host` header, or empty if absent
    pub fn host(&self) -> &str {
        self.header("host").unwrap_or("")
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }
}

/// Peek until a full request head is buffered, without consuming it.
///
/// Returns `None` if the peer closes, sends garbage, or stalls.
pub async fn peek_head(stream: &TcpStream) -> io::Result<Option<RequestHead>> {
    let mut buf = vec![0u8; MAX_HEAD_LEN];
    let deadline = tokio::time::Instant::now() + HEAD_TIMEOUT;

    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        match RequestHead::parse(&buf[..n]) {
            HeadParse::Complete(head) => return Ok(Some(head)),
            HeadParse::Malformed => return Ok(None),
            HeadParse::Incomplete => {}
        }
        if n == buf.len() || tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(PEEK_RETRY).await;
    }
}

/// State shared by the HTTP routes
#[derive(Clone)]
pub struct AppState {
    pub relay: SharedRelay,
    pub credentials: Arc<CredentialCache>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// Whether `host` may fetch ICE credentials.
    ///
    /// An allow-list entry with a port must match host and port; an entry
    /// without one admits the host on any port.
    fn origin_allowed(&self, host: &str) -> bool {
        let name = host_scope(host);
        !name.is_empty()
            && self.allowed_origins.iter().any(|allowed| {
                let allowed = allowed.trim();
                if host_scope(allowed) == allowed {
                    allowed.eq_ignore_ascii_case(name)
                } else {
                    allowed.eq_ignore_ascii_case(host)
                }
            })
    }
}

/// Routes for everything that is not a WebSocket upgrade
pub fn router(state: AppState, www_dir: &Path) -> Router {
    let index = ServeFile::new(www_dir.join("index.html"));

    // `/ice` is fetched cross-origin by embedded clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/health", get(health))
        .route("/ice", get(ice_servers))
        .route_service("/legal", ServeFile::new(www_dir.join("legal.html")))
        .route_service("/", index.clone())
        // `/standup` is a room page unless a file by that name exists
        .route_service("/:room", ServeDir::new(www_dir).fallback(index))
        .fallback_service(ServeDir::new(www_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer HTTP requests on an accepted connection until the client is done
pub async fn serve_http(stream: TcpStream, app: Router) -> Result<(), hyper::Error> {
    http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app))
        .await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let relay = state.relay.lock();
    Json(json!({
        "status": "healthy",
        "channels": relay.channel_count(),
        "connections": relay.connection_count(),
    }))
}

async fn ice_servers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.credentials.get() {
        Some(servers) if state.origin_allowed(host) => Json(Value::clone(&servers)).into_response(),
        _ => {
            debug!("Refusing /ice for host {:?}", host);
            (StatusCode::BAD_REQUEST, ICE_UNAVAILABLE).into_response()
        }
    }
}
