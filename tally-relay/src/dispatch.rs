//! Command dispatch: the single entry point the transport talks to.
//!
//! ```text
//! text ──► Command::decode ──► Session gate ──► Room (locked) ──► Broadcaster
//!                │                   │               │
//!                └──── ERROR ◄───────┴───────────────┘  (sender only)
//! ```
//!
//! The transport calls [`Dispatcher::connect`] once per connection,
//! [`Dispatcher::handle_text`] for each inbound frame (sequentially per
//! connection), and [`Dispatcher::disconnect`] when the socket goes away.
//! Outbound frames are written into the connection's outbox.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::broadcast::{Broadcaster, Frame};
use crate::protocol::{Ballot, Command, Event, QuestionDraft, RelayError};
use crate::registry::{RoomHandle, RoomRegistry};
use crate::room::Room;
use crate::session::{ConnectionId, Identity, Session};

/// Owns all relay state. Shared between connection tasks behind an `Arc`.
#[derive(Default)]
pub struct Dispatcher {
    registry: RoomRegistry,
    broadcaster: Broadcaster,
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Register a new connection in the `Unjoined` state.
    pub async fn connect(&self, conn: ConnectionId, outbox_capacity: usize) -> mpsc::Receiver<Frame> {
        self.sessions.write().await.insert(conn, Session::Unjoined);
        let rx = self.broadcaster.open(conn, outbox_capacity).await;
        log::debug!("Connection {conn} registered");
        rx
    }

    /// Tear down a connection: leave its room, forget its session and outbox.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        self.broadcaster.unregister(conn).await;
        let session = self.sessions.write().await.remove(conn);
        if let Some(Session::Joined(identity)) = session {
            if let Some(room) = self.registry.get(&identity.room_id).await {
                room.lock().await.leave(conn);
            }
            log::info!("{} ({conn}) left room {}", identity.name, identity.room_id);
        }
    }

    pub async fn session(&self, conn: &ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(conn).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Decode and apply one inbound frame. Errors go back to `conn` only.
    ///
    /// Returns the error that was reported, if any.
    pub async fn handle_text(&self, conn: &ConnectionId, text: &str) -> Option<RelayError> {
        let result = match Command::decode(text) {
            Ok(command) => {
                log::trace!("{} from {conn}", command.kind());
                self.apply(conn, command).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => None,
            Err(e) => {
                self.reject(conn, &e).await;
                Some(e)
            }
        }
    }

    /// Report an error to `conn` through its outbox, behind any frames
    /// already queued for it.
    pub async fn reject(&self, conn: &ConnectionId, err: &RelayError) {
        log::debug!("Rejected frame from {conn}: {err}");
        self.reply(conn, &Event::error(err)).await;
    }

    /// Apply an already decoded command.
    pub async fn apply(&self, conn: &ConnectionId, command: Command) -> Result<(), RelayError> {
        match command {
            Command::Join(req) => self.join(conn, Identity::try_from(req)?).await,
            Command::SetQuestion(draft) => self.set_question(conn, draft).await,
            Command::Vote(ballot) => self.vote(conn, &ballot).await,
        }
    }

    async fn join(&self, conn: &ConnectionId, identity: Identity) -> Result<(), RelayError> {
        // Lock order is sessions, then room. Holding the session entry keeps
        // room membership and the bound identity in step with `disconnect`.
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(conn).ok_or(RelayError::NotJoined)?;
        let previous = session.join(identity.clone());

        // A connection is a member of at most one room.
        if let Some(old) = previous.filter(|old| old.room_id != identity.room_id) {
            if let Some(room) = self.registry.get(&old.room_id).await {
                room.lock().await.leave(conn);
                log::info!("{} ({conn}) moved from room {} to {}", identity.name, old.room_id, identity.room_id);
            }
        }

        loop {
            let handle = self.registry.get_or_create(&identity.room_id).await;
            let mut room = handle.lock().await;
            if room.is_retired() {
                continue;
            }
            let snapshot = room.join(*conn);
            self.reply(conn, &Event::State(snapshot)).await;
            break;
        }
        drop(sessions);

        log::info!(
            "{} ({conn}) joined room {} as {}",
            identity.name,
            identity.room_id,
            identity.role
        );
        Ok(())
    }

    async fn set_question(&self, conn: &ConnectionId, draft: Option<QuestionDraft>) -> Result<(), RelayError> {
        let identity = self.joined(conn).await?;
        let handle = self.joined_room(&identity).await?;
        let mut room = handle.lock().await;
        let snapshot = room.set_question(identity.role, draft)?;
        log::info!(
            "Room {}: question {} set by {}",
            identity.room_id,
            snapshot.question.as_ref().map_or("", |q| q.id.as_str()),
            identity.name
        );
        self.publish(&room, &Event::State(snapshot)).await;
        Ok(())
    }

    async fn vote(&self, conn: &ConnectionId, ballot: &Ballot) -> Result<(), RelayError> {
        let identity = self.joined(conn).await?;
        let handle = self.joined_room(&identity).await?;
        let mut room = handle.lock().await;
        let snapshot = room.vote(ballot)?;
        log::debug!("Room {}: vote recorded, total {}", identity.room_id, snapshot.total);
        self.publish(&room, &Event::State(snapshot)).await;
        Ok(())
    }

    async fn joined(&self, conn: &ConnectionId) -> Result<Identity, RelayError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(conn).ok_or(RelayError::NotJoined)?;
        session.identity().cloned()
    }

    async fn joined_room(&self, identity: &Identity) -> Result<RoomHandle, RelayError> {
        // A joined room always has this connection as a member, so it is
        // never evicted while the session is alive.
        self.registry
            .get(&identity.room_id)
            .await
            .ok_or(RelayError::NotJoined)
    }

    /// Send to every member. Called with the room lock held.
    async fn publish(&self, room: &Room, event: &Event) -> usize {
        match event.encode() {
            Ok(text) => self.broadcaster.broadcast(room.members(), Frame::from(text)).await,
            Err(e) => {
                log::error!("Room {}: {e}", room.id());
                0
            }
        }
    }

    async fn reply(&self, conn: &ConnectionId, event: &Event) {
        match event.encode() {
            Ok(text) => {
                self.broadcaster.send_to(conn, Frame::from(text)).await;
            }
            Err(e) => log::error!("Reply to {conn}: {e}"),
        }
    }

    /// Remove idle rooms; see [`RoomRegistry::evict_idle`].
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        self.registry.evict_idle(max_idle).await
    }
}
