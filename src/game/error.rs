//! Game errors surfaced to the requesting connection

use thiserror::Error;

/// Failures of a game operation.
///
/// None of these mutate state; the dispatcher reports the display string to
/// the requester only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Malformed or oversized input, rejected before touching state
    #[error("{0}")]
    Validation(String),

    /// Action requires the game-master role
    #[error("{0}")]
    NotAuthorized(String),

    /// Action not permitted in the current round state
    #[error("{0}")]
    InvalidRound(String),

    /// Unknown session or participant
    #[error("{0}")]
    NotFound(String),

    #[error("Already a member of this session")]
    AlreadyMember,

    #[error("Not a member of this session")]
    NotAMember,
}

impl GameError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn not_authorized(reason: impl Into<String>) -> Self {
        Self::NotAuthorized(reason.into())
    }

    pub fn invalid_round(reason: impl Into<String>) -> Self {
        Self::InvalidRound(reason.into())
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound(reason.into())
    }
}

pub type GameResult<T> = std::result::Result<T, GameError>;
