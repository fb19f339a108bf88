//! Session state machine - roster, game master, round lifecycle

use super::error::{GameError, GameResult};
use super::validation::{normalize_answer, validate_guess, validate_question};
use crate::config::GameConfig;
use crate::protocol::RosterEntry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Transport-assigned identity of a participant
pub type ConnectionId = Uuid;

/// Upper-case session code
pub type SessionId = String;

/// Round lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    /// Lobby, or between rounds after the master advanced
    Waiting,
    /// Guesses are being accepted
    Playing,
    /// Round over; waiting for the new master to advance
    Ended,
}

/// A session member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: ConnectionId,
    pub name: String,
    pub score: u32,
    pub attempts: u32,
}

impl Player {
    fn new(id: ConnectionId, name: String) -> Self {
        Self {
            id,
            name,
            score: 0,
            attempts: 0,
        }
    }
}

/// Outcome of removing a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Member removed; `new_master` is set when the master role moved
    Removed {
        player: Player,
        new_master: Option<ConnectionId>,
    },
    /// The last member left; the session must be destroyed
    Emptied { player: Player },
}

/// Returned by [`Session::start_round`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStarted {
    pub round: u64,
    pub question: String,
    pub time_limit: Duration,
}

/// Returned by [`Session::end_round`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEnd {
    pub has_winner: bool,
    pub winner: Option<ConnectionId>,
    pub winner_name: Option<String>,
    /// Display form of the answer, revealed to everyone
    pub answer: String,
    pub new_master: ConnectionId,
}

/// Returned by [`Session::submit_guess`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessOutcome {
    pub correct: bool,
    pub attempts: u32,
    pub exhausted: bool,
    /// Set when this guess closed the round
    pub round_end: Option<RoundEnd>,
}

/// One game: roster, roles, question and the current round
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    rules: GameConfig,

    /// Members in join order
    players: Vec<Player>,
    game_master: ConnectionId,

    state: RoundState,
    question: String,
    answer: String,
    normalized_answer: String,
    started_at: Option<DateTime<Utc>>,
    winner: Option<ConnectionId>,

    /// Incremented on every start; lets a stale expiry be recognized
    round: u64,
    timer: Option<AbortHandle>,
}

impl Session {
    /// Create a session whose creator is the only member and the game master
    pub fn new(
        id: SessionId,
        master_id: ConnectionId,
        master_name: String,
        rules: GameConfig,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            rules,
            players: vec![Player::new(master_id, master_name)],
            game_master: master_id,
            state: RoundState::Waiting,
            question: String::new(),
            answer: String::new(),
            normalized_answer: String::new(),
            started_at: None,
            winner: None,
            round: 0,
            timer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn game_master(&self) -> ConnectionId {
        self.game_master
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// The answer, visible to the current game master only
    pub fn answer_for(&self, requester: ConnectionId) -> Option<&str> {
        if requester == self.game_master && !self.answer.is_empty() {
            Some(&self.answer)
        } else {
            None
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn time_limit(&self) -> Duration {
        self.rules.round_time_limit()
    }

    /// Time since the current round started; `None` between rounds
    pub fn elapsed(&self) -> Option<ChronoDuration> {
        self.started_at.map(|started| Utc::now() - started)
    }

    pub fn members(&self) -> &[Player] {
        &self.players
    }

    pub fn member(&self, id: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.member(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Broadcast view of the members in join order
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.players
            .iter()
            .map(|p| RosterEntry {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                attempts: p.attempts,
                is_game_master: p.id == self.game_master,
            })
            .collect()
    }

    /// Append a member; only allowed between rounds
    pub fn add_member(&mut self, id: ConnectionId, name: String) -> GameResult<()> {
        if self.state != RoundState::Waiting {
            return Err(GameError::invalid_round("Cannot join game in progress"));
        }
        if self.is_member(id) {
            return Err(GameError::AlreadyMember);
        }

        self.players.push(Player::new(id, name));
        Ok(())
    }

    /// Remove a member. A departing master hands the role to the earliest
    /// remaining member, so the next rotation continues from the start of
    /// the join order.
    ///
    /// A running round keeps running, even with nobody left to guess; only a
    /// correct guess or the timer closes it.
    pub fn remove_member(&mut self, id: ConnectionId) -> GameResult<Removal> {
        let index = self
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or(GameError::NotAMember)?;
        let player = self.players.remove(index);

        if self.players.is_empty() {
            self.cancel_timer();
            return Ok(Removal::Emptied { player });
        }

        let new_master = if player.id == self.game_master {
            let next = self.players[0].id;
            self.game_master = next;
            Some(next)
        } else {
            None
        };

        Ok(Removal::Removed { player, new_master })
    }

    /// Store the question and answer for the next round
    pub fn set_question(
        &mut self,
        requester: ConnectionId,
        question: &str,
        answer: &str,
    ) -> GameResult<&str> {
        if requester != self.game_master {
            return Err(GameError::not_authorized(
                "Only game master can create questions",
            ));
        }
        if self.state != RoundState::Waiting {
            return Err(GameError::invalid_round(
                "Questions can only be set between rounds",
            ));
        }
        let (question, answer) = validate_question(question, answer, &self.rules)?;

        self.normalized_answer = normalize_answer(&answer);
        self.answer = answer;
        self.question = question;
        Ok(&self.question)
    }

    pub fn can_start(&self) -> bool {
        self.start_blocker().is_none()
    }

    /// First unmet precondition for starting a round
    fn start_blocker(&self) -> Option<GameError> {
        if self.state != RoundState::Waiting {
            return Some(GameError::invalid_round("Round is not waiting to start"));
        }
        if self.question.is_empty() || self.answer.is_empty() {
            return Some(GameError::invalid_round("Please create a question first"));
        }
        if self.players.len() < self.rules.min_players {
            return Some(GameError::invalid_round(format!(
                "Need at least {} players to start",
                self.rules.min_players
            )));
        }
        None
    }

    /// Open the round. The caller arms the expiry with [`Session::arm_timer`].
    pub fn start_round(&mut self, requester: ConnectionId) -> GameResult<RoundStarted> {
        if requester != self.game_master {
            return Err(GameError::not_authorized(
                "Only game master can start the game",
            ));
        }
        if let Some(blocker) = self.start_blocker() {
            return Err(blocker);
        }

        self.state = RoundState::Playing;
        self.started_at = Some(Utc::now());
        self.winner = None;
        self.round += 1;

        let master = self.game_master;
        for player in self.players.iter_mut().filter(|p| p.id != master) {
            player.attempts = 0;
        }

        Ok(RoundStarted {
            round: self.round,
            question: self.question.clone(),
            time_limit: self.time_limit(),
        })
    }

    /// Attach the expiry task of the running round
    pub fn arm_timer(&mut self, handle: AbortHandle) {
        if self.state != RoundState::Playing {
            handle.abort();
            return;
        }
        if let Some(previous) = self.timer.replace(handle) {
            previous.abort();
        }
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Evaluate a guess against the answer
    pub fn submit_guess(&mut self, id: ConnectionId, guess: &str) -> GameResult<GuessOutcome> {
        let guess = validate_guess(guess, &self.rules)?;

        if self.state != RoundState::Playing {
            return Err(GameError::invalid_round("Game is not in progress"));
        }
        if id == self.game_master {
            return Err(GameError::invalid_round("Game master cannot guess"));
        }

        let max_attempts = self.rules.max_attempts;
        let player = self
            .players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GameError::NotAMember)?;
        if player.attempts >= max_attempts {
            return Err(GameError::invalid_round("No attempts left this round"));
        }

        player.attempts += 1;
        let attempts = player.attempts;

        if normalize_answer(&guess) == self.normalized_answer {
            let round_end = self.end_round(Some(id));
            return Ok(GuessOutcome {
                correct: true,
                attempts,
                exhausted: false,
                round_end,
            });
        }

        Ok(GuessOutcome {
            correct: false,
            attempts,
            exhausted: attempts >= max_attempts,
            round_end: None,
        })
    }

    /// Close the round, credit the winner and rotate the master role.
    ///
    /// Returns `None` unless a round is running, so the timer and a winning
    /// guess can both call this and only the first takes effect.
    pub fn end_round(&mut self, winner: Option<ConnectionId>) -> Option<RoundEnd> {
        if self.state != RoundState::Playing {
            return None;
        }
        self.cancel_timer();

        let points = self.rules.points_per_win;
        let winner = winner.and_then(|id| self.players.iter_mut().find(|p| p.id == id));
        let (winner, winner_name) = match winner {
            Some(player) => {
                player.score += points;
                (Some(player.id), Some(player.name.clone()))
            }
            None => (None, None),
        };

        self.winner = winner;
        self.game_master = self.next_after(self.game_master);
        self.state = RoundState::Ended;

        Some(RoundEnd {
            has_winner: winner.is_some(),
            winner,
            winner_name,
            answer: self.answer.clone(),
            new_master: self.game_master,
        })
    }

    /// Timer path: end round `round` without a winner if it is still running
    pub fn expire_round(&mut self, round: u64) -> Option<RoundEnd> {
        if round != self.round {
            return None;
        }
        self.end_round(None)
    }

    /// Reset for the next round; only the (rotated) master may do this
    pub fn advance_round(&mut self, requester: ConnectionId) -> GameResult<()> {
        if requester != self.game_master {
            return Err(GameError::not_authorized(
                "Only game master can start next round",
            ));
        }
        if self.state != RoundState::Ended {
            return Err(GameError::invalid_round("Current game has not ended"));
        }

        self.state = RoundState::Waiting;
        self.question.clear();
        self.answer.clear();
        self.normalized_answer.clear();
        self.started_at = None;
        self.winner = None;
        for player in &mut self.players {
            player.attempts = 0;
        }

        Ok(())
    }

    /// Member after `id` in join order, wrapping
    fn next_after(&self, id: ConnectionId) -> ConnectionId {
        if self.players.is_empty() {
            return id;
        }
        let next = self
            .players
            .iter()
            .position(|p| p.id == id)
            .map(|index| (index + 1) % self.players.len())
            .unwrap_or(0);
        self.players[next].id
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
