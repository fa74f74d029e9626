//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

use parley_core::{ChannelId, ClientEvent, Config, ConnectionId, ServerEvent};

use crate::credentials::{source_from_config, CredentialCache};
use crate::http::{peek_head, router, serve_http, AppState, SharedRelay};
use crate::relay::{ChannelRelay, Outbox};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Signal server state
pub struct SignalServer {
    relay: SharedRelay,
    credentials: Arc<CredentialCache>,
    app: Router,
    config: Config,
}

impl SignalServer {
    pub fn new(config: Config) -> Self {
        let relay: SharedRelay = Arc::new(Mutex::new(ChannelRelay::with_pruning(
            config.server.prune_empty_channels,
        )));
        let credentials = Arc::new(CredentialCache::new());

        let state = AppState {
            relay: relay.clone(),
            credentials: credentials.clone(),
            allowed_origins: Arc::new(config.ice.allowed_origins.clone()),
        };
        let app = router(state, &config.server.www_dir);

        Self {
            relay,
            credentials,
            app,
            config,
        }
    }

    /// Bind the configured address and serve forever
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), BoxError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.run(listener).await
    }

    /// Serve connections from an already-bound listener
    pub async fn run(&self, listener: TcpListener) -> Result<(), BoxError> {
        let source = source_from_config(&self.config.ice)?;
        let refresher = self.credentials.spawn_refresher(
            source,
            Duration::from_secs(self.config.ice.refresh_interval_secs.max(1)),
        );

        let result = self.accept_loop(listener).await;
        refresher.abort();
        result
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let relay = self.relay.clone();
            let app = self.app.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, relay, app).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    /// Get channel count (for monitoring)
    pub fn channel_count(&self) -> usize {
        self.relay.lock().channel_count()
    }

    /// Get connection count (for monitoring)
    pub fn connection_count(&self) -> usize {
        self.relay.lock().connection_count()
    }

    /// Cached ICE servers (for monitoring)
    pub fn credentials(&self) -> Arc<CredentialCache> {
        self.credentials.clone()
    }
}

impl Default for SignalServer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    relay: SharedRelay,
    app: Router,
) -> Result<(), BoxError> {
    let Some(head) = peek_head(&stream).await? else {
        debug!("Dropping {}: no request head", peer_addr);
        return Ok(());
    };

    if !head.is_websocket_upgrade() {
        debug!("HTTP {} {} from {}", head.method, head.path, peer_addr);
        serve_http(stream, app).await?;
        return Ok(());
    }

    // Room names are scoped by the host the client connected through
    let host = head.host().to_string();
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let conn_id = ConnectionId::generate()?;
    let (outbox, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();

    if let Err(e) = relay.lock().connect(conn_id.clone(), outbox) {
        error!("Refusing connection from {}: {}", peer_addr, e);
        return Err(e.into());
    }
    info!("[{}] connection accepted from {}", conn_id, peer_addr);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode {:?}: {}", event, e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("[{}] WebSocket error: {:?}", conn_id, e);
                break;
            }
        };

        match ClientEvent::from_json(&text) {
            Ok(event) => handle_event(event, &conn_id, &host, &relay),
            Err(e) => debug!("[{}] dropping unparseable frame: {}", conn_id, e),
        }
    }

    // Cleanup on disconnect
    relay.lock().disconnect(&conn_id);
    writer.abort();

    info!("[{}] disconnected", conn_id);
    Ok(())
}

/// Apply one client event to the relay
fn handle_event(
    event: ClientEvent,
    conn_id: &ConnectionId,
    host: &str,
    relay: &Mutex<ChannelRelay<Outbox>>,
) {
    debug!("[{}] {}", conn_id, event.name());

    match event {
        ClientEvent::Join { channel } => {
            let channel = ChannelId::scoped(host, channel);
            info!("[{}] join {}", conn_id, channel);
            if let Err(e) = relay.lock().join(conn_id, channel) {
                error!("[{}] join failed: {}", conn_id, e);
            }
        }

        ClientEvent::Part { channel } => {
            let channel = ChannelId::scoped(host, channel);
            info!("[{}] part {}", conn_id, channel);
            relay.lock().part(conn_id, &channel);
        }

        ClientEvent::RelayIceCandidate {
            peer_id,
            ice_candidate,
        } => {
            if !relay
                .lock()
                .relay_ice_candidate(conn_id, &peer_id, ice_candidate)
            {
                debug!("[{}] peer [{}] is gone, candidate dropped", conn_id, peer_id);
            }
        }

        ClientEvent::RelaySessionDescription {
            peer_id,
            session_description,
        } => {
            if !relay
                .lock()
                .relay_session_description(conn_id, &peer_id, session_description)
            {
                debug!("[{}] peer [{}] is gone, description dropped", conn_id, peer_id);
            }
        }
    }
}
