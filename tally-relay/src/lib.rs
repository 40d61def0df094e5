//! # tally-relay — real-time polling relay
//!
//! Clients join named rooms over WebSocket. One client per room is the host
//! and publishes multiple-choice questions; players cast one vote per
//! question; every member receives the full room state after each change.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    JSON text frames    ┌──────────────┐
//! │ PollClient  │ ◄────────────────────► │ RelayServer  │
//! │ (per user)  │                        │ (transport)  │
//! └─────────────┘                        └──────┬───────┘
//!                                               │ handle_text / disconnect
//!                                               ▼
//!                                        ┌──────────────┐
//!                                        │ Dispatcher   │── sessions
//!                                        └──────┬───────┘
//!                                ┌──────────────┼──────────────┐
//!                                ▼              ▼              ▼
//!                         ┌────────────┐ ┌────────────┐ ┌────────────┐
//!                         │RoomRegistry│ │ Room       │ │Broadcaster │
//!                         │ (lazy map) │ │ (tallies)  │ │ (outboxes) │
//!                         └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — envelope codec, commands, events, error taxonomy
//! - [`session`] — connection ids, roles, the `Unjoined → Joined` lifecycle
//! - [`room`] — question lifecycle, vote tallies, ballot dedup, membership
//! - [`registry`] — room id → room, created on first join
//! - [`broadcast`] — per-connection outboxes and fan-out
//! - [`dispatch`] — routes decoded commands to rooms and replies
//! - [`server`] — WebSocket server
//! - [`client`] — WebSocket client

pub mod protocol;
pub mod session;
pub mod room;
pub mod registry;
pub mod broadcast;
pub mod dispatch;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    Ballot, Command, ErrorNotice, Event, JoinRequest, Question, QuestionDraft, RelayError,
    Snapshot,
};
pub use session::{ConnectionId, Identity, Role, Session};
pub use room::{BallotKey, Room};
pub use registry::{RoomHandle, RoomRegistry};
pub use broadcast::{BroadcastStats, Broadcaster, Frame};
pub use dispatch::Dispatcher;
pub use server::{RelayServer, ServerConfig, ServerError, ServerStats};
pub use client::{ClientError, ConnectionState, PollClient};
