//! Per-connection identity.
//!
//! A connection starts `Unjoined`. A valid `JOIN` binds a room, display name
//! and role and moves it to `Joined`; later joins overwrite the identity.
//! Every other command is rejected with `NotJoined` until then.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{JoinRequest, RelayError};

/// Transport-assigned identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Player,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Player => "player",
        }
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Role::Host),
            "player" => Ok(Role::Player),
            other => Err(RelayError::InvalidJoin(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated identity bound by a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub room_id: String,
    pub name: String,
    pub role: Role,
}

impl Identity {
    pub fn new(room_id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            room_id: room_id.into(),
            name: name.into(),
            role,
        }
    }
}

impl TryFrom<JoinRequest> for Identity {
    type Error = RelayError;

    fn try_from(req: JoinRequest) -> Result<Self, Self::Error> {
        let room_id = required(req.room_id, "roomId")?;
        let name = required(req.name, "name")?;
        let role = required(req.role, "role")?.parse()?;
        Ok(Self { room_id, name, role })
    }
}

fn required(field: Option<String>, label: &str) -> Result<String, RelayError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RelayError::InvalidJoin(format!("{label} is required"))),
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Unjoined,
    Joined(Identity),
}

impl Session {
    /// The bound identity, or `NotJoined`.
    pub fn identity(&self) -> Result<&Identity, RelayError> {
        match self {
            Session::Joined(identity) => Ok(identity),
            Session::Unjoined => Err(RelayError::NotJoined),
        }
    }

    /// Bind (or rebind) the identity. Returns the previous one, if any.
    pub fn join(&mut self, identity: Identity) -> Option<Identity> {
        match std::mem::replace(self, Session::Joined(identity)) {
            Session::Joined(previous) => Some(previous),
            Session::Unjoined => None,
        }
    }
}
