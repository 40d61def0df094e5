//! Text wire protocol for the polling relay.
//!
//! Every frame, in both directions, is a JSON envelope:
//! ```text
//! { "type": "JOIN" | "HOST_SET_QUESTION" | "VOTE" | "STATE" | "ERROR",
//!   "payload": { ... } }
//! ```
//!
//! Inbound frames decode into a [`Command`]; outbound [`Event`]s encode into
//! the same envelope shape. Payload fields that are absent decode as `None`
//! so the room layer can report the precise validation failure; fields of the
//! wrong JSON type make the whole frame malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound command types.
pub const JOIN: &str = "JOIN";
pub const HOST_SET_QUESTION: &str = "HOST_SET_QUESTION";
pub const VOTE: &str = "VOTE";

/// A multiple-choice question as published by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
}

impl Question {
    pub fn new<I, S>(id: impl Into<String>, text: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            text: text.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// Full room state, the unit of broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub room_id: String,
    pub question: Option<Question>,
    pub counts: Vec<u64>,
    pub total: u64,
}

/// `JOIN` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Question as received from the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuestionDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

impl From<Question> for QuestionDraft {
    fn from(q: Question) -> Self {
        Self {
            id: Some(q.id),
            text: Some(q.text),
            options: Some(q.options),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetQuestionPayload {
    #[serde(default)]
    question: Option<QuestionDraft>,
}

/// `VOTE` payload.
///
/// `option_index` is `None` when the field is absent or is not a
/// non-negative integer; either way the vote is rejected as an invalid option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ballot {
    pub question_id: Option<String>,
    pub option_index: Option<u64>,
    pub name: Option<String>,
}

impl Ballot {
    pub fn new(question_id: impl Into<String>, option_index: u64, name: impl Into<String>) -> Self {
        Self {
            question_id: Some(question_id.into()),
            option_index: Some(option_index),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VotePayload {
    #[serde(default)]
    question_id: Option<String>,
    #[serde(default)]
    option_index: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

/// Decoded inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(JoinRequest),
    SetQuestion(Option<QuestionDraft>),
    Vote(Ballot),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl Command {
    /// Parse one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        let payload = match envelope.payload {
            Some(Value::Object(map)) => Value::Object(map),
            Some(_) => {
                return Err(RelayError::MalformedMessage(
                    "payload must be an object".into(),
                ))
            }
            None => return Err(RelayError::MalformedMessage("missing payload".into())),
        };

        match envelope.kind.as_str() {
            JOIN => Ok(Command::Join(from_payload(payload)?)),
            HOST_SET_QUESTION => {
                let p: SetQuestionPayload = from_payload(payload)?;
                Ok(Command::SetQuestion(p.question))
            }
            VOTE => {
                let p: VotePayload = from_payload(payload)?;
                Ok(Command::Vote(Ballot {
                    question_id: p.question_id,
                    option_index: p.option_index.as_ref().and_then(Value::as_u64),
                    name: p.name,
                }))
            }
            _ => Err(RelayError::UnsupportedType(envelope.kind)),
        }
    }

    /// Command type tag as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Join(_) => JOIN,
            Command::SetQuestion(_) => HOST_SET_QUESTION,
            Command::Vote(_) => VOTE,
        }
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, RelayError> {
    serde_json::from_value(payload).map_err(|e| RelayError::MalformedMessage(e.to_string()))
}

/// Outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    State(Snapshot),
    Error(ErrorNotice),
}

/// `ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
    pub code: String,
}

impl Event {
    pub fn error(err: &RelayError) -> Self {
        Event::Error(ErrorNotice {
            message: err.to_string(),
            code: err.code().to_string(),
        })
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Encode(e.to_string()))
    }

    /// Parse an outbound frame (client side).
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }
}

/// Every failure the relay reports to a client.
///
/// All variants are connection-local: the originating connection gets an
/// `ERROR` event and nothing else changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("invalid join: {0}")]
    InvalidJoin(String),
    #[error("join a room first")]
    NotJoined,
    #[error("only the host can do that")]
    Forbidden,
    #[error("invalid question: {0}")]
    InvalidQuestion(String),
    #[error("no active question")]
    NoActiveQuestion,
    #[error("question mismatch")]
    QuestionMismatch,
    #[error("invalid option")]
    InvalidOption,
    #[error("name required")]
    NameRequired,
    #[error("already voted on this question")]
    DuplicateVote,
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),
    /// Outbound serialization failed; never sent to a client.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl RelayError {
    /// Stable machine-readable code carried in `ERROR` payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::InvalidJoin(_) => "INVALID_JOIN",
            Self::NotJoined => "NOT_JOINED",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidQuestion(_) => "INVALID_QUESTION",
            Self::NoActiveQuestion => "NO_ACTIVE_QUESTION",
            Self::QuestionMismatch => "QUESTION_MISMATCH",
            Self::InvalidOption => "INVALID_OPTION",
            Self::NameRequired => "NAME_REQUIRED",
            Self::DuplicateVote => "DUPLICATE_VOTE",
            Self::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            Self::Encode(_) => "INTERNAL",
        }
    }
}
