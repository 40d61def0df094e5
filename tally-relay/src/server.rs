//! WebSocket transport for the polling relay.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌──► outbox A ──► Client A
//!             ├── handle_connection ──┤
//! Client B ──┘         │              └──► outbox B ──► Client B
//!                      ▼
//!                 Dispatcher ── RoomRegistry ── Room (locked per op)
//! ```
//!
//! One task per connection reads text frames and hands them to the
//! [`Dispatcher`]; the same task drains the connection's outbox into the
//! socket. Closing the socket runs `disconnect`, which removes the
//! connection from its room.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::dispatch::Dispatcher;
use crate::protocol::RelayError;
use crate::session::ConnectionId;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before new ones are dropped
    pub outbox_capacity: usize,
    /// Evict rooms that are empty and untouched this long (None = never)
    pub idle_room_ttl_secs: Option<u64>,
    /// How often the idle-room sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            idle_room_ttl_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_messages: u64,
    pub accept_errors: u64,
    pub active_rooms: usize,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    rejected_messages: AtomicU64,
    accept_errors: AtomicU64,
}

/// Delay before retrying after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<Counters>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// Accept failures are logged and retried; only binding is fatal.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        match listener.local_addr() {
            Ok(addr) => log::info!("Relay server listening on {addr}"),
            Err(_) => log::info!("Relay server listening on {}", self.config.bind_addr),
        }

        let _sweeper = self.spawn_sweeper();
        self.accept_loop(|| listener.accept()).await;
        Ok(())
    }

    async fn accept_loop<F, Fut>(&self, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<(TcpStream, SocketAddr)>>,
    {
        loop {
            let (stream, addr) = match accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Accept failed: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let dispatcher = self.dispatcher.clone();
            let counters = self.counters.clone();
            let capacity = self.config.outbox_capacity;

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, dispatcher, counters, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Start the idle-room sweep if a TTL is configured.
    fn spawn_sweeper(&self) -> Option<SweeperGuard> {
        let ttl = Duration::from_secs(self.config.idle_room_ttl_secs?);
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = dispatcher.evict_idle(ttl).await;
                if evicted > 0 {
                    log::info!("Idle sweep evicted {evicted} room(s)");
                }
            }
        });
        Some(SweeperGuard(handle))
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        counters: Arc<Counters>,
        outbox_capacity: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn = ConnectionId::new();
        let mut outbox = dispatcher.connect(conn, outbox_capacity).await;
        counters.total_connections.fetch_add(1, Ordering::Relaxed);
        counters.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("WebSocket connection {conn} established from {addr}");

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                counters.total_messages.fetch_add(1, Ordering::Relaxed);
                                if dispatcher.handle_text(&conn, text.as_str()).await.is_some() {
                                    counters.rejected_messages.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                counters.total_messages.fetch_add(1, Ordering::Relaxed);
                                counters.rejected_messages.fetch_add(1, Ordering::Relaxed);
                                let err = RelayError::MalformedMessage("binary frames are not supported".into());
                                dispatcher.reject(&conn, &err).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {conn} closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::warn!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    frame = outbox.recv() => {
                        match frame {
                            Some(text) => ws_sender.send(Message::Text(text.to_string().into())).await?,
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        dispatcher.disconnect(&conn).await;
        counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let broadcast = self.dispatcher.broadcaster().stats().await;
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            total_messages: self.counters.total_messages.load(Ordering::Relaxed),
            rejected_messages: self.counters.rejected_messages.load(Ordering::Relaxed),
            accept_errors: self.counters.accept_errors.load(Ordering::Relaxed),
            active_rooms: self.dispatcher.registry().room_count().await,
            messages_sent: broadcast.messages_sent,
            messages_dropped: broadcast.messages_dropped,
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// Aborts the sweep task when the serve loop ends.
struct SweeperGuard(tokio::task::JoinHandle<()>);

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
