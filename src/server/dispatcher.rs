//! Dispatcher - the serialized command path into the game core
//!
//! Every inbound command, connection change and timer firing goes through
//! one queue and is applied to completion before the next is read. Results
//! become outbound events: shared state changes go to the whole session,
//! failures go back to the requester only.

use super::connection::{create_error_message, create_welcome_message, ClientConnection};
use crate::game::validation::{normalize_session_code, validate_name};
use crate::game::{
    ConnectionId, GameError, ParticipantDirectory, Removal, RoundEnd, RoundState, SessionId,
    SessionRegistry,
};
use crate::protocol::{
    check_version_compatibility, ClientMessage, RosterEntry, ServerMessage, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Items consumed by the dispatcher loop
#[derive(Debug)]
pub enum Inbound {
    /// A transport accepted a connection
    Connected { connection: ClientConnection },
    /// A decoded command from a connection
    Command {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    /// The transport lost a connection
    Disconnected { connection_id: ConnectionId },
    /// A round timer ran out
    RoundExpired { session_id: SessionId, round: u64 },
}

/// Routes commands to sessions and fans results out to connections
pub struct Dispatcher {
    registry: SessionRegistry,
    directory: ParticipantDirectory,
    clients: HashMap<ConnectionId, ClientConnection>,

    /// Feeds timer firings back into the queue without keeping it open
    loopback: mpsc::WeakSender<Inbound>,
}

impl Dispatcher {
    /// Build a dispatcher over injected stores. `inbound` is the sender side
    /// of the queue [`Dispatcher::run`] will consume.
    pub fn new(
        registry: SessionRegistry,
        directory: ParticipantDirectory,
        inbound: &mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            registry,
            directory,
            clients: HashMap::new(),
            loopback: inbound.downgrade(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &ParticipantDirectory {
        &self.directory
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Consume the queue until every sender is gone
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(item) = inbound.recv().await {
            self.handle(item);
        }
        tracing::info!("Dispatcher loop finished");
    }

    /// Apply one inbound item
    pub fn handle(&mut self, item: Inbound) {
        match item {
            Inbound::Connected { connection } => {
                let connection_id = connection.id();
                tracing::info!("Client connected: {}", connection_id);
                self.clients.insert(connection_id, connection);
                self.send_to(connection_id, create_welcome_message(connection_id));
            }
            Inbound::Command {
                connection_id,
                message,
            } => {
                tracing::debug!("{} from {}", message.name(), connection_id);
                self.process_command(connection_id, message);
            }
            Inbound::Disconnected { connection_id } => {
                tracing::info!("Client disconnected: {}", connection_id);
                self.leave_current_session(connection_id);
                self.directory.remove(connection_id);
                self.clients.remove(&connection_id);
            }
            Inbound::RoundExpired { session_id, round } => self.expire_round(&session_id, round),
        }
    }

    fn process_command(&mut self, connection_id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Hello { protocol_version } => {
                let reply = match check_version_compatibility(protocol_version, PROTOCOL_VERSION) {
                    Ok(()) => ServerMessage::Ack {
                        for_command: "Hello".to_string(),
                    },
                    Err(e) => create_error_message(e.to_string()),
                };
                self.send_to(connection_id, reply);
            }
            ClientMessage::Register { name } => self.register(connection_id, &name),
            ClientMessage::CreateSession { name } => self.create_session(connection_id, &name),
            ClientMessage::JoinSession { session_id, name } => {
                self.join_session(connection_id, &session_id, &name)
            }
            ClientMessage::LeaveSession => {
                if self.leave_current_session(connection_id) {
                    self.send_to(connection_id, ServerMessage::SessionLeft);
                } else {
                    self.send_to(
                        connection_id,
                        ServerMessage::SessionError {
                            reason: "Not in a session".to_string(),
                        },
                    );
                }
            }
            ClientMessage::SetQuestion { question, answer } => {
                self.set_question(connection_id, &question, &answer)
            }
            ClientMessage::StartRound => self.start_round(connection_id),
            ClientMessage::SubmitGuess { guess } => self.submit_guess(connection_id, &guess),
            ClientMessage::AdvanceRound => self.advance_round(connection_id),
            ClientMessage::RequestRoster => match self.current_session_id(connection_id) {
                Some(session_id) => {
                    let roster = self.roster(&session_id);
                    self.send_to(connection_id, ServerMessage::RosterUpdate { roster });
                }
                None => self.send_to(
                    connection_id,
                    ServerMessage::SessionError {
                        reason: "Not in a session".to_string(),
                    },
                ),
            },
        }
    }

    fn register(&mut self, connection_id: ConnectionId, name: &str) {
        let name = match validate_name(name, self.registry.rules()) {
            Ok(name) => name,
            Err(e) => {
                return self.send_to(
                    connection_id,
                    ServerMessage::RegistrationError {
                        reason: e.to_string(),
                    },
                )
            }
        };

        let participant = self.directory.register(connection_id, name);
        tracing::info!("Player registered: {} ({})", participant.name, connection_id);
        let reply = ServerMessage::Registered {
            id: connection_id,
            name: participant.name.clone(),
        };
        self.send_to(connection_id, reply);
    }

    fn create_session(&mut self, connection_id: ConnectionId, name: &str) {
        let name = match validate_name(name, self.registry.rules()) {
            Ok(name) => name,
            Err(e) => {
                return self.send_to(
                    connection_id,
                    ServerMessage::SessionError {
                        reason: e.to_string(),
                    },
                )
            }
        };

        self.leave_current_session(connection_id);
        self.directory.register(connection_id, name.clone());

        let session = self.registry.create(connection_id, name);
        let session_id = session.id().to_string();
        let roster = session.roster();
        self.directory
            .set_session(connection_id, Some(session_id.clone()));

        self.send_to(
            connection_id,
            ServerMessage::SessionCreated {
                session_id,
                is_master: true,
                roster,
            },
        );
    }

    fn join_session(&mut self, connection_id: ConnectionId, code: &str, name: &str) {
        let joined = normalize_session_code(code).and_then(|session_id| {
            let name = validate_name(name, self.registry.rules())?;
            let session = self
                .registry
                .get(&session_id)
                .ok_or_else(|| GameError::not_found("Session not found"))?;
            if session.is_member(connection_id) {
                return Err(GameError::AlreadyMember);
            }
            if session.state() != RoundState::Waiting {
                return Err(GameError::invalid_round("Cannot join game in progress"));
            }
            Ok((session_id, name))
        });
        let (session_id, name) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                return self.send_to(
                    connection_id,
                    ServerMessage::JoinError {
                        reason: e.to_string(),
                    },
                )
            }
        };

        // Leaving the old session cannot touch the target: it is a different one
        self.leave_current_session(connection_id);
        self.directory.register(connection_id, name.clone());

        let added = match self.registry.get_mut(&session_id) {
            Some(session) => session.add_member(connection_id, name.clone()),
            None => Err(GameError::not_found("Session not found")),
        };
        if let Err(e) = added {
            return self.send_to(
                connection_id,
                ServerMessage::JoinError {
                    reason: e.to_string(),
                },
            );
        }

        self.directory
            .set_session(connection_id, Some(session_id.clone()));
        tracing::info!("{} joined session {}", name, session_id);

        let roster = self.roster(&session_id);
        self.send_to(
            connection_id,
            ServerMessage::SessionJoined {
                session_id: session_id.clone(),
                is_master: false,
                roster: roster.clone(),
            },
        );
        self.broadcast(
            &session_id,
            ServerMessage::PlayerJoined {
                player_id: connection_id,
                name,
                roster,
            },
        );
    }

    /// Remove the participant from its session and tell the others.
    ///
    /// Shared by explicit leave, session switching and disconnect. Returns
    /// false if the participant was not in a session.
    fn leave_current_session(&mut self, connection_id: ConnectionId) -> bool {
        let Some(session_id) = self.current_session_id(connection_id) else {
            return false;
        };
        self.directory.set_session(connection_id, None);

        let removal = match self.registry.get_mut(&session_id) {
            Some(session) => session.remove_member(connection_id),
            None => return true,
        };

        match removal {
            Ok(Removal::Emptied { player }) => {
                tracing::info!("{} left session {}, now empty", player.name, session_id);
                self.registry.remove(&session_id);
            }
            Ok(Removal::Removed { player, new_master }) => {
                tracing::info!("{} left session {}", player.name, session_id);
                if let Some(new_master) = new_master {
                    self.broadcast(&session_id, ServerMessage::RoleChanged { new_master });
                }
                let roster = self.roster(&session_id);
                self.broadcast(
                    &session_id,
                    ServerMessage::PlayerLeft {
                        player_id: player.id,
                        name: player.name,
                        roster,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Participant {} was not in session {}: {}",
                    connection_id,
                    session_id,
                    e
                );
            }
        }
        true
    }

    fn set_question(&mut self, connection_id: ConnectionId, question: &str, answer: &str) {
        let result = self.with_session(connection_id, |session| {
            session
                .set_question(connection_id, question, answer)
                .map(str::to_string)
        });
        match result {
            Ok((session_id, question)) => {
                self.broadcast(&session_id, ServerMessage::QuestionSet { question })
            }
            Err(e) => self.send_to(
                connection_id,
                ServerMessage::QuestionError {
                    reason: e.to_string(),
                },
            ),
        }
    }

    fn start_round(&mut self, connection_id: ConnectionId) {
        let loopback = self.loopback.clone();
        let result = self.with_session(connection_id, |session| {
            let started = session.start_round(connection_id)?;
            let timer = spawn_round_timer(
                loopback,
                session.id().to_string(),
                started.round,
                started.time_limit,
            );
            session.arm_timer(timer);
            Ok(started)
        });

        match result {
            Ok((session_id, started)) => {
                tracing::info!(
                    "Round {} started in session {} ({}s)",
                    started.round,
                    session_id,
                    started.time_limit.as_secs()
                );
                self.broadcast(
                    &session_id,
                    ServerMessage::RoundStarted {
                        question: started.question,
                        time_limit_seconds: started.time_limit.as_secs(),
                    },
                );
            }
            Err(e) => self.send_to(
                connection_id,
                ServerMessage::RoundError {
                    reason: e.to_string(),
                },
            ),
        }
    }

    fn submit_guess(&mut self, connection_id: ConnectionId, guess: &str) {
        let result = self.with_session(connection_id, |session| {
            let outcome = session.submit_guess(connection_id, guess)?;
            if let (true, Some(elapsed)) = (outcome.correct, session.elapsed()) {
                tracing::debug!(
                    "Answer found in session {} after {}ms",
                    session.id(),
                    elapsed.num_milliseconds()
                );
            }
            let name = session
                .member(connection_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            Ok((outcome, name))
        });

        let (session_id, (outcome, name)) = match result {
            Ok(result) => result,
            Err(e) => {
                return self.send_to(
                    connection_id,
                    ServerMessage::GuessError {
                        reason: e.to_string(),
                    },
                )
            }
        };

        self.send_to(
            connection_id,
            ServerMessage::GuessResult {
                correct: outcome.correct,
                attempts: outcome.attempts,
                exhausted: outcome.exhausted,
            },
        );
        self.broadcast_except(
            &session_id,
            connection_id,
            ServerMessage::GuessMade {
                player_id: connection_id,
                name,
                attempts: outcome.attempts,
                exhausted: outcome.exhausted,
            },
        );

        if let Some(end) = outcome.round_end {
            self.announce_round_end(&session_id, end);
        }
    }

    fn advance_round(&mut self, connection_id: ConnectionId) {
        let result = self.with_session(connection_id, |session| {
            session.advance_round(connection_id)?;
            Ok((session.game_master(), session.roster()))
        });
        match result {
            Ok((session_id, (game_master, roster))) => self.broadcast(
                &session_id,
                ServerMessage::NextRound {
                    game_master,
                    roster,
                },
            ),
            Err(e) => self.send_to(
                connection_id,
                ServerMessage::RoundError {
                    reason: e.to_string(),
                },
            ),
        }
    }

    fn expire_round(&mut self, session_id: &str, round: u64) {
        let end = self
            .registry
            .get_mut(session_id)
            .and_then(|session| session.expire_round(round));
        match end {
            Some(end) => {
                tracing::info!("Round {} in session {} timed out", round, session_id);
                self.announce_round_end(session_id, end);
            }
            None => tracing::debug!(
                "Stale timer for round {} in session {} ignored",
                round,
                session_id
            ),
        }
    }

    fn announce_round_end(&self, session_id: &str, end: RoundEnd) {
        if let Some(winner) = &end.winner_name {
            tracing::info!("{} won the round in session {}", winner, session_id);
        }
        let roster = self.roster(session_id);
        self.broadcast(
            session_id,
            ServerMessage::RoundEnded {
                has_winner: end.has_winner,
                winner_id: end.winner,
                winner_name: end.winner_name,
                answer: end.answer,
                new_master: end.new_master,
                roster,
            },
        );
    }

    /// Run `op` against the requester's session
    fn with_session<T, F>(
        &mut self,
        connection_id: ConnectionId,
        op: F,
    ) -> Result<(SessionId, T), GameError>
    where
        F: FnOnce(&mut crate::game::Session) -> Result<T, GameError>,
    {
        let session_id = self
            .current_session_id(connection_id)
            .ok_or_else(|| GameError::not_found("Not in a session"))?;
        let session = self
            .registry
            .get_mut(&session_id)
            .ok_or_else(|| GameError::not_found("Session not found"))?;
        let value = op(session)?;
        Ok((session_id, value))
    }

    fn current_session_id(&self, connection_id: ConnectionId) -> Option<SessionId> {
        self.directory
            .current_session(connection_id)
            .map(str::to_string)
    }

    fn roster(&self, session_id: &str) -> Vec<RosterEntry> {
        self.registry
            .get(session_id)
            .map(|session| session.roster())
            .unwrap_or_default()
    }

    fn send_to(&self, connection_id: ConnectionId, msg: ServerMessage) {
        match self.clients.get(&connection_id) {
            Some(client) => {
                if let Err(e) = client.try_send(msg) {
                    tracing::warn!("Dropped message: {}", e);
                }
            }
            None => tracing::debug!("No outbox for connection {}", connection_id),
        }
    }

    /// Send to every member of the session
    fn broadcast(&self, session_id: &str, msg: ServerMessage) {
        self.broadcast_filtered(session_id, None, msg);
    }

    /// Send to every member of the session except `except`
    fn broadcast_except(&self, session_id: &str, except: ConnectionId, msg: ServerMessage) {
        self.broadcast_filtered(session_id, Some(except), msg);
    }

    fn broadcast_filtered(
        &self,
        session_id: &str,
        except: Option<ConnectionId>,
        msg: ServerMessage,
    ) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        for member in session.members().iter().filter(|p| Some(p.id) != except) {
            self.send_to(member.id, msg.clone());
        }
    }
}

/// Spawn the countdown of one round. Firing only enqueues
/// [`Inbound::RoundExpired`]; the dispatcher decides whether it still applies.
fn spawn_round_timer(
    loopback: mpsc::WeakSender<Inbound>,
    session_id: SessionId,
    round: u64,
    limit: Duration,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        let Some(inbound) = loopback.upgrade() else {
            return;
        };
        if inbound
            .send(Inbound::RoundExpired { session_id, round })
            .await
            .is_err()
        {
            tracing::debug!("Dispatcher gone before round timer fired");
        }
    });
    task.abort_handle()
}
