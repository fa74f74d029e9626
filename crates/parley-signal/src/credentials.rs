//! STUN/TURN credential cache
//!
//! Browsers fetch their ICE server list from `/ice`. The list (and the TURN
//! credentials inside it) comes from a [`CredentialSource`], is refreshed on
//! a fixed interval and served from memory. A failed refresh keeps the last
//! good list, so `/ice` only fails before the first successful fetch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_core::IceConfig;

/// Timeout for a single credential fetch
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur while fetching credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential response has no ice_servers")]
    MissingIceServers,
}

/// Somewhere ICE server lists come from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a fresh ICE server list (a JSON array)
    async fn fetch(&self) -> Result<Value, CredentialError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Twilio Network Traversal Service tokens
pub struct TwilioTokenSource {
    client: reqwest::Client,
    url: String,
    account_sid: String,
    auth_token: String,
}

#[derive(Deserialize)]
struct TwilioToken {
    ice_servers: Option<Value>,
}

impl TwilioTokenSource {
    pub fn new(
        api_base: &str,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let account_sid = account_sid.into();
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Tokens.json",
            api_base.trim_end_matches('/'),
            account_sid
        );
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

        Ok(Self {
            client,
            url,
            account_sid,
            auth_token: auth_token.into(),
        })
    }
}

#[async_trait]
impl CredentialSource for TwilioTokenSource {
    async fn fetch(&self) -> Result<Value, CredentialError> {
        let token: TwilioToken = self
            .client
            .post(&self.url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        token.ice_servers.ok_or(CredentialError::MissingIceServers)
    }

    fn name(&self) -> &'static str {
        "twilio"
    }
}

/// Fixed list of STUN servers, no credentials
pub struct StaticIceServers {
    servers: Value,
}

impl StaticIceServers {
    pub fn new(urls: &[String]) -> Self {
        let servers = urls.iter().map(|url| json!({ "urls": url })).collect();
        Self {
            servers: Value::Array(servers),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticIceServers {
    async fn fetch(&self) -> Result<Value, CredentialError> {
        Ok(self.servers.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Pick the source the configuration asks for
pub fn source_from_config(config: &IceConfig) -> Result<Arc<dyn CredentialSource>, CredentialError> {
    match config.twilio_credentials() {
        Some((sid, token)) => Ok(Arc::new(TwilioTokenSource::new(
            &config.twilio_api_base,
            sid,
            token,
        )?)),
        None => Ok(Arc::new(StaticIceServers::new(&config.stun_urls))),
    }
}

/// Most recently fetched ICE server list
#[derive(Default)]
pub struct CredentialCache {
    current: RwLock<Option<Arc<Value>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached list, or `None` if nothing has been fetched yet
    pub fn get(&self) -> Option<Arc<Value>> {
        self.current.read().clone()
    }

    /// Fetch once. On failure the previous value stays in place.
    pub async fn refresh(&self, source: &dyn CredentialSource) -> bool {
        match source.fetch().await {
            Ok(servers) => {
                *self.current.write() = Some(Arc::new(servers));
                debug!("ICE servers refreshed from {}", source.name());
                true
            }
            Err(e) => {
                warn!(
                    "Failed to refresh ICE servers from {}: {} (keeping cached value: {})",
                    source.name(),
                    e,
                    self.get().is_some()
                );
                false
            }
        }
    }

    /// Fetch now, then again every `interval`
    pub fn spawn_refresher(
        self: &Arc<Self>,
        source: Arc<dyn CredentialSource>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        info!(
            "Refreshing ICE servers from {} every {}s",
            source.name(),
            interval.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.refresh(source.as_ref()).await;
            }
        })
    }
}
