//! Room state machine: question lifecycle, tallies, ballot dedup, membership.
//!
//! ```text
//!            set_question (host)                vote (any joined member)
//!   ┌──────────┐ ─────────────────► ┌──────────────────┐ ◄───────────┐
//!   │ no       │                    │ question active  │             │
//!   │ question │                    │ counts / ballots │ ────────────┘
//!   └──────────┘                    └──────────────────┘
//!                                      │   ▲
//!                                      └───┘ set_question resets tallies
//! ```
//!
//! Every operation is synchronous and either fully applies or leaves the
//! room untouched. `total == counts.iter().sum()` holds after every call.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::protocol::{Ballot, Question, QuestionDraft, RelayError, Snapshot};
use crate::session::{ConnectionId, Role};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 4;

/// One-vote-per-person-per-question identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BallotKey {
    pub room_id: String,
    pub question_id: String,
    pub voter: String,
}

impl BallotKey {
    pub fn new(room_id: &str, question_id: &str, name: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            question_id: question_id.to_owned(),
            voter: normalize_name(name),
        }
    }
}

/// Case- and surrounding-whitespace-insensitive voter name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub struct Room {
    id: String,
    question: Option<Question>,
    counts: Vec<u64>,
    total: u64,
    voted_by: HashSet<BallotKey>,
    members: HashSet<ConnectionId>,
    last_activity: Instant,
    retired: bool,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: None,
            counts: Vec::new(),
            total: 0,
            voted_by: HashSet::new(),
            members: HashSet::new(),
            last_activity: Instant::now(),
            retired: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn ballot_count(&self) -> usize {
        self.voted_by.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            room_id: self.id.clone(),
            question: self.question.clone(),
            counts: self.counts.clone(),
            total: self.total,
        }
    }

    // ─── Membership ──────────────────────────────────────────────

    /// Add a connection to the room. Returns the state the joiner should see.
    pub fn join(&mut self, conn: ConnectionId) -> Snapshot {
        self.members.insert(conn);
        self.touch();
        self.snapshot()
    }

    /// Remove a connection. Idempotent; returns whether it was a member.
    pub fn leave(&mut self, conn: &ConnectionId) -> bool {
        let removed = self.members.remove(conn);
        if removed {
            self.touch();
        }
        removed
    }

    pub fn is_member(&self, conn: &ConnectionId) -> bool {
        self.members.contains(conn)
    }

    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Empty and untouched for at least `max_idle`.
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        self.members.is_empty() && self.last_activity.elapsed() >= max_idle
    }

    /// Mark the room as removed from its registry.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    // ─── Question lifecycle ──────────────────────────────────────

    /// Replace the active question and reset all tallies and ballots.
    pub fn set_question(&mut self, role: Role, draft: Option<QuestionDraft>) -> Result<Snapshot, RelayError> {
        if role != Role::Host {
            return Err(RelayError::Forbidden);
        }
        let question = validate_question(draft)?;

        self.counts = vec![0; question.options.len()];
        self.total = 0;
        self.voted_by.clear();
        self.question = Some(question);
        self.touch();
        Ok(self.snapshot())
    }

    /// Record one ballot.
    pub fn vote(&mut self, ballot: &Ballot) -> Result<Snapshot, RelayError> {
        let question = self.question.as_ref().ok_or(RelayError::NoActiveQuestion)?;
        if ballot.question_id.as_deref() != Some(question.id.as_str()) {
            return Err(RelayError::QuestionMismatch);
        }
        let index = ballot
            .option_index
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.counts.len())
            .ok_or(RelayError::InvalidOption)?;
        let name = ballot
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or(RelayError::NameRequired)?;

        let key = BallotKey::new(&self.id, &question.id, name);
        if !self.voted_by.insert(key) {
            return Err(RelayError::DuplicateVote);
        }
        self.counts[index] += 1;
        self.total += 1;
        self.touch();
        Ok(self.snapshot())
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

fn validate_question(draft: Option<QuestionDraft>) -> Result<Question, RelayError> {
    let draft = draft.ok_or_else(|| RelayError::InvalidQuestion("question is required".into()))?;
    let id = non_empty(draft.id, "id")?;
    let text = non_empty(draft.text, "text")?;
    let options = draft
        .options
        .ok_or_else(|| RelayError::InvalidQuestion("options are required".into()))?;
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return Err(RelayError::InvalidQuestion(format!(
            "expected {MIN_OPTIONS} to {MAX_OPTIONS} options, got {}",
            options.len()
        )));
    }
    Ok(Question { id, text, options })
}

fn non_empty(field: Option<String>, label: &str) -> Result<String, RelayError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RelayError::InvalidQuestion(format!("{label} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_question() -> Option<QuestionDraft> {
        Some(Question::new("q1", "Color?", ["Red", "Blue"]).into())
    }

    fn valid_draft() -> QuestionDraft {
        QuestionDraft::from(Question::new("q", "t", ["a", "b"]))
    }

    fn abc_question() -> Option<QuestionDraft> {
        Some(Question::new("q2", "Letter?", ["A", "B", "C"]).into())
    }

    fn assert_consistent(room: &Room) {
        assert_eq!(room.total(), room.counts().iter().sum::<u64>());
        if let Some(q) = room.question() {
            assert_eq!(room.counts().len(), q.options.len());
        }
    }

    #[test]
    fn test_new_room_is_empty() {
        let room = Room::new("R1");
        let snap = room.snapshot();
        assert_eq!(snap.room_id, "R1");
        assert!(snap.question.is_none());
        assert!(snap.counts.is_empty());
        assert_eq!(snap.total, 0);
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_host_sets_question() {
        let mut room = Room::new("R1");
        let snap = room.set_question(Role::Host, color_question()).unwrap();
        assert_eq!(snap.question.unwrap().id, "q1");
        assert_eq!(snap.counts, vec![0, 0]);
        assert_eq!(snap.total, 0);
        assert_consistent(&room);
    }

    #[test]
    fn test_player_cannot_set_question() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();
        room.vote(&Ballot::new("q1", 0, "Ana")).unwrap();

        let err = room.set_question(Role::Player, abc_question()).unwrap_err();
        assert_eq!(err, RelayError::Forbidden);
        assert_eq!(room.question().unwrap().id, "q1");
        assert_eq!(room.counts(), &[1, 0]);
    }

    #[test]
    fn test_forbidden_checked_before_validation() {
        let mut room = Room::new("R1");
        assert_eq!(room.set_question(Role::Player, None).unwrap_err(), RelayError::Forbidden);
    }

    #[test]
    fn test_invalid_questions_rejected() {
        let mut room = Room::new("R1");
        let drafts = [
            None,
            Some(QuestionDraft { id: None, ..valid_draft() }),
            Some(QuestionDraft { id: Some(String::new()), ..valid_draft() }),
            Some(QuestionDraft { text: Some(String::new()), ..valid_draft() }),
            Some(QuestionDraft { options: None, ..valid_draft() }),
            Some(Question::new("q", "t", ["only"]).into()),
            Some(Question::new("q", "t", ["a", "b", "c", "d", "e"]).into()),
        ];
        for draft in drafts {
            let err = room.set_question(Role::Host, draft.clone()).unwrap_err();
            assert!(matches!(err, RelayError::InvalidQuestion(_)), "{draft:?} -> {err:?}");
        }
        assert!(room.question().is_none());
    }

    #[test]
    fn test_four_options_accepted() {
        let mut room = Room::new("R1");
        let snap = room
            .set_question(Role::Host, Some(Question::new("q", "t", ["a", "b", "c", "d"]).into()))
            .unwrap();
        assert_eq!(snap.counts, vec![0; 4]);
    }

    #[test]
    fn test_vote_counts_and_duplicate() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();

        let snap = room.vote(&Ballot::new("q1", 1, "Ana")).unwrap();
        assert_eq!(snap.counts, vec![0, 1]);
        assert_eq!(snap.total, 1);

        // Case and whitespace differences are the same voter, whatever the option.
        for (index, name) in [(1, "ana"), (0, "  ANA "), (1, "Ana")] {
            let err = room.vote(&Ballot::new("q1", index, name)).unwrap_err();
            assert_eq!(err, RelayError::DuplicateVote);
        }
        assert_eq!(room.counts(), &[0, 1]);
        assert_eq!(room.ballot_count(), 1);
        assert_consistent(&room);
    }

    #[test]
    fn test_new_question_resets_ballots() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();
        room.vote(&Ballot::new("q1", 1, "Ana")).unwrap();

        let snap = room.set_question(Role::Host, abc_question()).unwrap();
        assert_eq!(snap.counts, vec![0, 0, 0]);
        assert_eq!(snap.total, 0);
        assert_eq!(room.ballot_count(), 0);

        let snap = room.vote(&Ballot::new("q2", 2, "Ana")).unwrap();
        assert_eq!(snap.counts, vec![0, 0, 1]);
        assert_consistent(&room);
    }

    #[test]
    fn test_replacing_with_same_id_still_resets() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();
        room.vote(&Ballot::new("q1", 0, "Ana")).unwrap();
        room.set_question(Role::Host, color_question()).unwrap();
        assert!(room.vote(&Ballot::new("q1", 0, "Ana")).is_ok());
    }

    #[test]
    fn test_vote_without_question() {
        let mut room = Room::new("R1");
        let err = room.vote(&Ballot::new("q1", 0, "Ana")).unwrap_err();
        assert_eq!(err, RelayError::NoActiveQuestion);
    }

    #[test]
    fn test_vote_question_mismatch() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, abc_question()).unwrap();
        let err = room.vote(&Ballot::new("q1", 0, "Ana")).unwrap_err();
        assert_eq!(err, RelayError::QuestionMismatch);

        let missing = Ballot { question_id: None, ..Ballot::new("q2", 0, "Ana") };
        assert_eq!(room.vote(&missing).unwrap_err(), RelayError::QuestionMismatch);
        assert_eq!(room.counts(), &[0, 0, 0]);
    }

    #[test]
    fn test_vote_invalid_option() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();
        assert_eq!(room.vote(&Ballot::new("q1", 5, "Ana")).unwrap_err(), RelayError::InvalidOption);
        assert_eq!(room.vote(&Ballot::new("q1", 2, "Ana")).unwrap_err(), RelayError::InvalidOption);

        let missing = Ballot { option_index: None, ..Ballot::new("q1", 0, "Ana") };
        assert_eq!(room.vote(&missing).unwrap_err(), RelayError::InvalidOption);
        assert_eq!(room.total(), 0);
    }

    #[test]
    fn test_vote_name_required() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, color_question()).unwrap();
        assert_eq!(room.vote(&Ballot::new("q1", 0, "")).unwrap_err(), RelayError::NameRequired);
        assert_eq!(room.vote(&Ballot::new("q1", 0, "  ")).unwrap_err(), RelayError::NameRequired);
        let missing = Ballot { name: None, ..Ballot::new("q1", 0, "x") };
        assert_eq!(room.vote(&missing).unwrap_err(), RelayError::NameRequired);
    }

    #[test]
    fn test_many_voters_keep_total_consistent() {
        let mut room = Room::new("R1");
        room.set_question(Role::Host, abc_question()).unwrap();
        for i in 0..30u64 {
            let name = format!("voter-{}", i % 20);
            let _ = room.vote(&Ballot::new("q2", i % 3, name));
            assert_consistent(&room);
        }
        assert_eq!(room.total(), 20);
    }

    #[test]
    fn test_membership() {
        let mut room = Room::new("R1");
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        room.join(a);
        room.join(b);
        room.join(a);
        assert_eq!(room.member_count(), 2);
        assert!(room.is_member(&a));

        assert!(room.leave(&a));
        assert!(!room.leave(&a));
        assert!(!room.is_member(&a));
        assert_eq!(room.members().collect::<Vec<_>>(), vec![&b]);
    }

    #[test]
    fn test_idle_requires_no_members() {
        let mut room = Room::new("R1");
        let conn = ConnectionId::new();
        room.join(conn);
        assert!(!room.is_idle(Duration::ZERO));
        room.leave(&conn);
        assert!(room.is_idle(Duration::ZERO));
        assert!(!room.is_idle(Duration::from_secs(3600)));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Ana "), "ana");
        assert_eq!(
            BallotKey::new("R1", "q1", "ANA"),
            BallotKey::new("R1", "q1", " ana")
        );
        assert_ne!(
            BallotKey::new("R1", "q1", "ana"),
            BallotKey::new("R1", "q2", "ana")
        );
    }
}
