//! Participant directory - connection identity to game identity

use super::session::{ConnectionId, SessionId};
use std::collections::HashMap;

/// A registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    /// Session this participant currently belongs to
    pub current_session: Option<SessionId>,
}

/// Known participants keyed by connection id
#[derive(Default)]
pub struct ParticipantDirectory {
    participants: HashMap<ConnectionId, Participant>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `name`.
    ///
    /// Re-registering renames the participant and keeps its session.
    pub fn register(&mut self, id: ConnectionId, name: String) -> &Participant {
        let participant = self.participants.entry(id).or_insert_with(|| Participant {
            id,
            name: String::new(),
            current_session: None,
        });
        participant.name = name;
        participant
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Session the participant is in, if any
    pub fn current_session(&self, id: ConnectionId) -> Option<&str> {
        self.participants
            .get(&id)
            .and_then(|p| p.current_session.as_deref())
    }

    /// Record which session the participant belongs to. Returns false for
    /// unknown connections.
    pub fn set_session(&mut self, id: ConnectionId, session: Option<SessionId>) -> bool {
        match self.participants.get_mut(&id) {
            Some(participant) => {
                participant.current_session = session;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
