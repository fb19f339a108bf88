//! Message types for the guessr protocol

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commands sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake with protocol version
    Hello { protocol_version: u32 },

    /// Attach a display name to this connection
    Register { name: String },

    /// Open a new session with the sender as game master
    CreateSession { name: String },

    /// Join a waiting session by code
    JoinSession { session_id: String, name: String },

    /// Leave the current session
    LeaveSession,

    /// Game master sets the next question
    SetQuestion { question: String, answer: String },

    /// Game master opens the round
    StartRound,

    /// Guess the answer of the running round
    SubmitGuess { guess: String },

    /// Game master resets an ended round
    AdvanceRound,

    /// Ask for the current roster
    RequestRoster,
}

impl ClientMessage {
    /// Short command name used in acknowledgments and logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "Hello",
            ClientMessage::Register { .. } => "Register",
            ClientMessage::CreateSession { .. } => "CreateSession",
            ClientMessage::JoinSession { .. } => "JoinSession",
            ClientMessage::LeaveSession => "LeaveSession",
            ClientMessage::SetQuestion { .. } => "SetQuestion",
            ClientMessage::StartRound => "StartRound",
            ClientMessage::SubmitGuess { .. } => "SubmitGuess",
            ClientMessage::AdvanceRound => "AdvanceRound",
            ClientMessage::RequestRoster => "RequestRoster",
        }
    }
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once when the connection is accepted
    Welcome {
        connection_id: Uuid,
        protocol_version: u32,
    },

    /// Acknowledgment (for commands that need confirmation)
    Ack { for_command: String },

    /// Protocol-level error response
    Error { message: String },

    Registered { id: Uuid, name: String },
    RegistrationError { reason: String },

    SessionCreated {
        session_id: String,
        is_master: bool,
        roster: Vec<RosterEntry>,
    },
    SessionJoined {
        session_id: String,
        is_master: bool,
        roster: Vec<RosterEntry>,
    },
    SessionError { reason: String },
    JoinError { reason: String },
    SessionLeft,

    PlayerJoined {
        player_id: Uuid,
        name: String,
        roster: Vec<RosterEntry>,
    },
    PlayerLeft {
        player_id: Uuid,
        name: String,
        roster: Vec<RosterEntry>,
    },
    RoleChanged { new_master: Uuid },

    /// Question text only; the answer never goes out before the round ends
    QuestionSet { question: String },
    QuestionError { reason: String },

    RoundStarted {
        question: String,
        time_limit_seconds: u64,
    },
    RoundError { reason: String },

    /// Result of a guess, to the guesser only
    GuessResult {
        correct: bool,
        attempts: u32,
        exhausted: bool,
    },
    /// Someone else guessed
    GuessMade {
        player_id: Uuid,
        name: String,
        attempts: u32,
        exhausted: bool,
    },
    GuessError { reason: String },

    RoundEnded {
        has_winner: bool,
        winner_id: Option<Uuid>,
        winner_name: Option<String>,
        answer: String,
        new_master: Uuid,
        roster: Vec<RosterEntry>,
    },

    /// The master reset the session for another round
    NextRound {
        game_master: Uuid,
        roster: Vec<RosterEntry>,
    },

    RosterUpdate { roster: Vec<RosterEntry> },
}

/// One member as shown to everyone in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub score: u32,
    pub attempts: u32,
    pub is_game_master: bool,
}
