//! WebSocket client for the polling relay.
//!
//! Used by the integration tests and by tooling that drives a room from the
//! command line. Commands are sent as text frames; every inbound frame is
//! decoded into an [`Event`] and forwarded on a channel.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{Event, Question, HOST_SET_QUESTION, JOIN, VOTE};
use crate::session::Role;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("not connected")]
    NotConnected,
}

pub struct PollClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<Event>,
    event_rx: Option<mpsc::Receiver<Event>>,
}

impl PollClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Event::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Undecodable frame from server: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        *self.state.write().await = ConnectionState::Connected;
        Ok(())
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(text.into()).await.map_err(|_| ClientError::NotConnected)
    }

    pub async fn join(&self, room_id: &str, name: &str, role: Role) -> Result<(), ClientError> {
        self.send_raw(envelope(JOIN, json!({ "roomId": room_id, "name": name, "role": role })))
            .await
    }

    pub async fn set_question(&self, question: &Question) -> Result<(), ClientError> {
        self.send_raw(envelope(HOST_SET_QUESTION, json!({ "question": question })))
            .await
    }

    pub async fn vote(&self, question_id: &str, option_index: u64, name: &str) -> Result<(), ClientError> {
        self.send_raw(envelope(
            VOTE,
            json!({ "questionId": question_id, "optionIndex": option_index, "name": name }),
        ))
        .await
    }

    /// Stop the writer task, which closes the socket.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }
}

fn envelope(kind: &str, payload: serde_json::Value) -> String {
    json!({ "type": kind, "payload": payload }).to_string()
}
