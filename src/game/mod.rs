//! Game core - sessions, rounds, roles and the registries that hold them

mod directory;
mod error;
mod registry;
mod session;
pub mod validation;

pub use directory::{Participant, ParticipantDirectory};
pub use error::{GameError, GameResult};
pub use registry::SessionRegistry;
pub use session::{
    ConnectionId, GuessOutcome, Player, Removal, RoundEnd, RoundStarted, RoundState, Session,
    SessionId,
};
