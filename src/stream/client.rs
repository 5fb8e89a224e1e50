//! Long-lived transaction subscription feeding the decoder and listeners.

use super::backoff::reconnect_delays;
use super::envelope::{parse_message, StreamMessage};
use super::listener::{ListenerRegistry, SubscriptionFilters};
use crate::config::StreamConfig;
use crate::decoder::{decode_transaction, DecodedEvent};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use moka::future::Cache;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct StreamCounters {
    messages_seen: AtomicU64,
    parse_failures: AtomicU64,
    duplicates: AtomicU64,
    events_decoded: AtomicU64,
    events_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub messages_seen: u64,
    pub parse_failures: u64,
    pub duplicates: u64,
    pub events_decoded: u64,
    pub events_dispatched: u64,
    pub dispatch_failures: u64,
    pub reconnects: u64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            messages_seen: self.messages_seen.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            events_decoded: self.events_decoded.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

/// `transactionSubscribe` request for the given filters.
pub fn subscribe_request(filters: &SubscriptionFilters) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "transactionSubscribe",
        "params": [
            {
                "vote": false,
                "failed": false,
                "accountInclude": filters.account_include(),
            },
            {
                "commitment": "confirmed",
                "encoding": "base64",
                "transactionDetails": "full",
                "showRewards": false,
                "maxSupportedTransactionVersion": 0,
            }
        ]
    })
}

pub struct StreamingClient {
    config: StreamConfig,
    registry: ListenerRegistry,
    seen: Cache<String, ()>,
    counters: Arc<StreamCounters>,
}

impl StreamingClient {
    pub fn new(config: StreamConfig, registry: ListenerRegistry) -> Arc<Self> {
        let seen = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(config.dedupe_ttl_secs.max(1)))
            .build();
        Arc::new(Self {
            config,
            registry,
            seen,
            counters: Arc::new(StreamCounters::default()),
        })
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    /// Handle one text frame. Returns the spawned listener calls.
    pub async fn handle_text(&self, text: &str) -> Vec<JoinHandle<()>> {
        self.counters.messages_seen.fetch_add(1, Ordering::Relaxed);

        let tx = match parse_message(text) {
            Ok(StreamMessage::Transaction(tx)) => tx,
            Ok(StreamMessage::Subscribed(id)) => {
                info!("Transaction subscription {} active", id);
                return Vec::new();
            }
            Ok(StreamMessage::RpcError(detail)) => {
                error!("Subscription rejected: {}", detail);
                return Vec::new();
            }
            Ok(StreamMessage::Ignored) => return Vec::new(),
            Err(e) => {
                self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Unparseable stream frame: {}", e);
                return Vec::new();
            }
        };

        if self.seen.contains_key(&tx.signature) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        self.seen.insert(tx.signature.clone(), ()).await;

        let events = decode_transaction(&tx);
        self.counters
            .events_decoded
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        events
            .into_iter()
            .flat_map(|event| self.dispatch(event))
            .collect()
    }

    /// Spawn one bounded call per listener of the event's kind.
    pub fn dispatch(&self, event: DecodedEvent) -> Vec<JoinHandle<()>> {
        let event = Arc::new(event);
        let dispatch_timeout = self.config.dispatch_timeout();

        self.registry
            .listeners_for(event.kind())
            .iter()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let event = Arc::clone(&event);
                let counters = Arc::clone(&self.counters);
                tokio::spawn(async move {
                    match timeout(dispatch_timeout, listener.on_event(&event)).await {
                        Ok(Ok(())) => {
                            counters.events_dispatched.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(e)) => {
                            counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                            warn!("Listener {} failed on {}: {:#}", listener.name(), event.signature(), e);
                        }
                        Err(_) => {
                            counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "Listener {} timed out after {:?} on {}",
                                listener.name(),
                                dispatch_timeout,
                                event.signature()
                            );
                        }
                    }
                })
            })
            .collect()
    }

    /// Keep the subscription alive until shutdown. Disconnects are never fatal.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let filters = self.registry.subscription_filters();
        if filters.is_empty() {
            info!("No stream listeners registered, not subscribing");
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        }

        let initial = Duration::from_millis(self.config.reconnect_initial_ms);
        let max = Duration::from_millis(self.config.reconnect_max_ms);
        let mut delays = reconnect_delays(initial, max);
        let mut attempts: u32 = 0;
        let stable_after = Duration::from_secs(self.config.stable_after_secs);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let started = Instant::now();
            match self.session(&filters, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Transaction stream stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected(reason)) => warn!("Transaction stream disconnected: {}", reason),
                Err(e) => warn!("Transaction stream error: {:#}", e),
            }

            if started.elapsed() >= stable_after {
                delays = reconnect_delays(initial, max);
                attempts = 0;
            }
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            attempts += 1;
            let delay = delays.next().unwrap_or(max);
            info!("Reconnecting in {:?} (attempt {})", delay, attempts);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn session(
        &self,
        filters: &SubscriptionFilters,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let (socket, _) = connect_async(self.config.endpoint())
            .await
            .context("Failed to connect to transaction stream")?;
        let (mut write, mut read) = socket.split();

        write
            .send(Message::Text(subscribe_request(filters).to_string()))
            .await
            .context("Failed to send subscription request")?;
        info!("Subscribed to {} accounts", filters.account_include().len());

        let idle = self.config.idle_timeout();
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if timeout(grace, write.send(Message::Close(None))).await.is_err() {
                        debug!("Close handshake exceeded {:?}", grace);
                    }
                    return Ok(SessionEnd::Shutdown);
                }
                next = timeout(idle, read.next()) => match next {
                    Err(_) => return Ok(SessionEnd::Disconnected(format!("no traffic for {:?}", idle))),
                    Ok(None) => return Ok(SessionEnd::Disconnected("stream ended".to_string())),
                    Ok(Some(Err(e))) => return Err(e).context("Websocket read failed"),
                    Ok(Some(Ok(message))) => match message {
                        Message::Text(text) => {
                            self.handle_text(&text).await;
                        }
                        Message::Binary(bytes) => {
                            if let Ok(text) = String::from_utf8(bytes) {
                                self.handle_text(&text).await;
                            }
                        }
                        Message::Ping(payload) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .context("Failed to answer ping")?;
                        }
                        Message::Close(frame) => {
                            return Ok(SessionEnd::Disconnected(format!("closed by server: {:?}", frame)));
                        }
                        _ => {}
                    },
                },
            }
        }
    }
}
