//! Integration tests for command dispatch and event fan-out

use guessr::config::GameConfig;
use guessr::game::{ParticipantDirectory, RoundState, SessionRegistry};
use guessr::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use guessr::server::{ClientConnection, Dispatcher, Inbound};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Harness {
    dispatcher: Dispatcher,
    // Held so the dispatcher's timer loopback stays open
    _inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

struct Client {
    id: Uuid,
    rx: mpsc::Receiver<ServerMessage>,
}

impl Client {
    fn next(&mut self) -> ServerMessage {
        self.rx.try_recv().expect("Expected a queued message")
    }

    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn assert_idle(&mut self) {
        let pending = self.drain();
        assert!(pending.is_empty(), "Unexpected messages: {:?}", pending);
    }
}

impl Harness {
    fn new() -> Self {
        Self::with_rules(GameConfig::default())
    }

    fn with_rules(rules: GameConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(
            SessionRegistry::new(rules),
            ParticipantDirectory::new(),
            &inbound_tx,
        );
        Self {
            dispatcher,
            _inbound_tx: inbound_tx,
            inbound_rx,
        }
    }

    fn connect(&mut self) -> Client {
        let (tx, rx) = mpsc::channel(64);
        let connection = ClientConnection::new(tx);
        let id = connection.id();
        self.dispatcher.handle(Inbound::Connected { connection });

        let mut client = Client { id, rx };
        match client.next() {
            ServerMessage::Welcome {
                connection_id,
                protocol_version,
            } => {
                assert_eq!(connection_id, id);
                assert_eq!(protocol_version, PROTOCOL_VERSION);
            }
            other => panic!("Expected Welcome, got {:?}", other),
        }
        client
    }

    fn send(&mut self, client: &Client, message: ClientMessage) {
        self.dispatcher.handle(Inbound::Command {
            connection_id: client.id,
            message,
        });
    }

    fn disconnect(&mut self, client: &Client) {
        self.dispatcher.handle(Inbound::Disconnected {
            connection_id: client.id,
        });
    }

    /// Alice creates a session, returns (alice, session id)
    fn host(&mut self) -> (Client, String) {
        let mut alice = self.connect();
        self.send(
            &alice,
            ClientMessage::CreateSession {
                name: "Alice".to_string(),
            },
        );
        let session_id = match alice.next() {
            ServerMessage::SessionCreated {
                session_id,
                is_master,
                roster,
            } => {
                assert!(is_master);
                assert_eq!(roster.len(), 1);
                assert!(roster[0].is_game_master);
                session_id
            }
            other => panic!("Expected SessionCreated, got {:?}", other),
        };
        (alice, session_id)
    }

    fn join(&mut self, session_id: &str, name: &str) -> Client {
        let mut client = self.connect();
        self.send(
            &client,
            ClientMessage::JoinSession {
                session_id: session_id.to_string(),
                name: name.to_string(),
            },
        );
        assert!(matches!(client.next(), ServerMessage::SessionJoined { .. }));
        client
    }

    /// Alice hosts, Bob joins, Alice sets "2+2?"/"4" and starts the round
    fn running_round(&mut self) -> (Client, Client, String) {
        let (mut alice, session_id) = self.host();
        let mut bob = self.join(&session_id, "Bob");
        self.send(
            &alice,
            ClientMessage::SetQuestion {
                question: "2+2?".to_string(),
                answer: "4".to_string(),
            },
        );
        self.send(&alice, ClientMessage::StartRound);
        alice.drain();
        bob.drain();
        (alice, bob, session_id)
    }
}

#[tokio::test]
async fn test_register_and_reject_bad_name() {
    let mut harness = Harness::new();
    let mut client = harness.connect();

    harness.send(
        &client,
        ClientMessage::Register {
            name: "  Alice  ".to_string(),
        },
    );
    assert_eq!(
        client.next(),
        ServerMessage::Registered {
            id: client.id,
            name: "Alice".to_string()
        }
    );

    harness.send(
        &client,
        ClientMessage::Register {
            name: "x".repeat(21),
        },
    );
    match client.next() {
        ServerMessage::RegistrationError { reason } => {
            assert!(reason.contains("20 characters"));
        }
        other => panic!("Expected RegistrationError, got {:?}", other),
    }
    assert_eq!(harness.dispatcher.directory().get(client.id).unwrap().name, "Alice");
}

#[tokio::test]
async fn test_hello_checks_protocol_version() {
    let mut harness = Harness::new();
    let mut client = harness.connect();

    harness.send(
        &client,
        ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
        },
    );
    assert_eq!(
        client.next(),
        ServerMessage::Ack {
            for_command: "Hello".to_string()
        }
    );

    harness.send(&client, ClientMessage::Hello { protocol_version: 999 });
    match client.next() {
        ServerMessage::Error { message } => assert!(message.contains("Protocol version mismatch")),
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_join_broadcasts_roster_to_room() {
    let mut harness = Harness::new();
    let (mut alice, session_id) = harness.host();

    let mut bob = harness.connect();
    harness.send(
        &bob,
        ClientMessage::JoinSession {
            session_id: session_id.to_lowercase(),
            name: "Bob".to_string(),
        },
    );

    match bob.next() {
        ServerMessage::SessionJoined {
            session_id: joined,
            is_master,
            roster,
        } => {
            assert_eq!(joined, session_id);
            assert!(!is_master);
            assert_eq!(roster.len(), 2);
        }
        other => panic!("Expected SessionJoined, got {:?}", other),
    }

    for client in [&mut alice, &mut bob] {
        match client.next() {
            ServerMessage::PlayerJoined {
                name, roster, ..
            } => {
                assert_eq!(name, "Bob");
                let names: Vec<_> = roster.iter().map(|entry| entry.name.as_str()).collect();
                assert_eq!(names, vec!["Alice", "Bob"]);
            }
            other => panic!("Expected PlayerJoined, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_join_errors_go_to_requester_only() {
    let mut harness = Harness::new();
    let (mut alice, _session_id) = harness.host();
    let mut bob = harness.connect();

    harness.send(
        &bob,
        ClientMessage::JoinSession {
            session_id: "ZZZZ9999".to_string(),
            name: "Bob".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::JoinError {
            reason: "Session not found".to_string()
        }
    );

    harness.send(
        &bob,
        ClientMessage::JoinSession {
            session_id: "bad!".to_string(),
            name: "Bob".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::JoinError {
            reason: "Invalid session code".to_string()
        }
    );

    alice.assert_idle();
}

#[tokio::test]
async fn test_cannot_join_round_in_progress() {
    let mut harness = Harness::new();
    let (_alice, _bob, session_id) = harness.running_round();

    let mut carol = harness.connect();
    harness.send(
        &carol,
        ClientMessage::JoinSession {
            session_id: session_id.clone(),
            name: "Carol".to_string(),
        },
    );
    assert_eq!(
        carol.next(),
        ServerMessage::JoinError {
            reason: "Cannot join game in progress".to_string()
        }
    );
    assert_eq!(harness.dispatcher.registry().get(&session_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_full_round_scenario() {
    let mut harness = Harness::new();
    let (mut alice, session_id) = harness.host();
    let mut bob = harness.join(&session_id, "Bob");
    alice.drain();
    bob.drain();

    harness.send(
        &alice,
        ClientMessage::SetQuestion {
            question: "2+2?".to_string(),
            answer: "4".to_string(),
        },
    );
    for client in [&mut alice, &mut bob] {
        assert_eq!(
            client.next(),
            ServerMessage::QuestionSet {
                question: "2+2?".to_string()
            }
        );
    }

    harness.send(&alice, ClientMessage::StartRound);
    for client in [&mut alice, &mut bob] {
        assert_eq!(
            client.next(),
            ServerMessage::RoundStarted {
                question: "2+2?".to_string(),
                time_limit_seconds: 60
            }
        );
    }

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "5".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::GuessResult {
            correct: false,
            attempts: 1,
            exhausted: false
        }
    );
    assert_eq!(
        alice.next(),
        ServerMessage::GuessMade {
            player_id: bob.id,
            name: "Bob".to_string(),
            attempts: 1,
            exhausted: false
        }
    );
    bob.assert_idle();

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "4".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::GuessResult {
            correct: true,
            attempts: 2,
            exhausted: false
        }
    );
    assert!(matches!(alice.next(), ServerMessage::GuessMade { attempts: 2, .. }));

    let bob_id = bob.id;
    for client in [&mut alice, &mut bob] {
        match client.next() {
            ServerMessage::RoundEnded {
                has_winner,
                winner_id,
                winner_name,
                answer,
                new_master,
                roster,
            } => {
                assert!(has_winner);
                assert_eq!(winner_id, Some(bob_id));
                assert_eq!(winner_name.as_deref(), Some("Bob"));
                assert_eq!(answer, "4");
                assert_eq!(new_master, bob_id);
                let bob_entry = roster.iter().find(|entry| entry.id == bob_id).unwrap();
                assert_eq!(bob_entry.score, 10);
                assert!(bob_entry.is_game_master);
            }
            other => panic!("Expected RoundEnded, got {:?}", other),
        }
    }

    let session = harness.dispatcher.registry().get(&session_id).unwrap();
    assert_eq!(session.state(), RoundState::Ended);
    assert!(!session.has_timer());
}

#[tokio::test]
async fn test_master_only_commands_fail_privately() {
    let mut harness = Harness::new();
    let (mut alice, session_id) = harness.host();
    let mut bob = harness.join(&session_id, "Bob");
    alice.drain();
    bob.drain();

    harness.send(
        &bob,
        ClientMessage::SetQuestion {
            question: "Hijack?".to_string(),
            answer: "yes".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::QuestionError {
            reason: "Only game master can create questions".to_string()
        }
    );

    harness.send(&bob, ClientMessage::StartRound);
    assert!(matches!(bob.next(), ServerMessage::RoundError { .. }));

    harness.send(&alice, ClientMessage::StartRound);
    assert_eq!(
        alice.next(),
        ServerMessage::RoundError {
            reason: "Please create a question first".to_string()
        }
    );

    alice.assert_idle();
    bob.assert_idle();
    let session = harness.dispatcher.registry().get(&session_id).unwrap();
    assert_eq!(session.state(), RoundState::Waiting);
    assert_eq!(session.question(), "");
}

#[tokio::test]
async fn test_start_needs_two_players() {
    let mut harness = Harness::new();
    let (mut alice, _session_id) = harness.host();

    harness.send(
        &alice,
        ClientMessage::SetQuestion {
            question: "2+2?".to_string(),
            answer: "4".to_string(),
        },
    );
    alice.drain();

    harness.send(&alice, ClientMessage::StartRound);
    assert_eq!(
        alice.next(),
        ServerMessage::RoundError {
            reason: "Need at least 2 players to start".to_string()
        }
    );
}

#[tokio::test]
async fn test_oversized_guess_is_rejected() {
    let mut harness = Harness::new();
    let (mut alice, mut bob, _session_id) = harness.running_round();

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "x".repeat(101),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::GuessError {
            reason: "Guess is too long (max 100 characters)".to_string()
        }
    );
    alice.assert_idle();

    harness.send(&bob, ClientMessage::RequestRoster);
    match bob.next() {
        ServerMessage::RosterUpdate { roster } => {
            let entry = roster.iter().find(|entry| entry.id == bob.id).unwrap();
            assert_eq!(entry.attempts, 0);
        }
        other => panic!("Expected RosterUpdate, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_expires_without_winner() {
    let mut harness = Harness::new();
    let (mut alice, mut bob, session_id) = harness.running_round();
    let bob_id = bob.id;

    // Let the timer task register its deadline before moving the clock
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(harness.inbound_rx.try_recv().is_err());

    let expired = tokio::time::timeout(Duration::from_secs(5), harness.inbound_rx.recv())
        .await
        .expect("Timer should fire")
        .expect("Queue should be open");
    match &expired {
        Inbound::RoundExpired { session_id: expired_id, round } => {
            assert_eq!(expired_id, &session_id);
            assert_eq!(*round, 1);
        }
        other => panic!("Expected RoundExpired, got {:?}", other),
    }
    harness.dispatcher.handle(expired);

    for client in [&mut alice, &mut bob] {
        match client.next() {
            ServerMessage::RoundEnded {
                has_winner,
                winner_id,
                answer,
                new_master,
                ..
            } => {
                assert!(!has_winner);
                assert_eq!(winner_id, None);
                assert_eq!(answer, "4");
                assert_eq!(new_master, bob_id);
            }
            other => panic!("Expected RoundEnded, got {:?}", other),
        }
    }

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "4".to_string(),
        },
    );
    assert_eq!(
        bob.next(),
        ServerMessage::GuessError {
            reason: "Game is not in progress".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_winning_guess_cancels_timer() {
    let mut harness = Harness::new();
    let (mut alice, mut bob, session_id) = harness.running_round();

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "4".to_string(),
        },
    );
    alice.drain();
    bob.drain();

    tokio::time::advance(Duration::from_secs(120)).await;
    assert!(harness.inbound_rx.try_recv().is_err());

    // A firing that slipped past cancellation is still a no-op
    harness.dispatcher.handle(Inbound::RoundExpired {
        session_id: session_id.clone(),
        round: 1,
    });
    alice.assert_idle();
    bob.assert_idle();

    let session = harness.dispatcher.registry().get(&session_id).unwrap();
    assert_eq!(session.member(bob.id).unwrap().score, 10);
}

#[tokio::test]
async fn test_advance_round_broadcasts_and_is_not_repeatable() {
    let mut harness = Harness::new();
    let (mut alice, mut bob, _session_id) = harness.running_round();

    harness.send(
        &bob,
        ClientMessage::SubmitGuess {
            guess: "4".to_string(),
        },
    );
    alice.drain();
    bob.drain();

    harness.send(&alice, ClientMessage::AdvanceRound);
    assert_eq!(
        alice.next(),
        ServerMessage::RoundError {
            reason: "Only game master can start next round".to_string()
        }
    );

    let bob_id = bob.id;
    harness.send(&bob, ClientMessage::AdvanceRound);
    for client in [&mut alice, &mut bob] {
        match client.next() {
            ServerMessage::NextRound {
                game_master,
                roster,
            } => {
                assert_eq!(game_master, bob_id);
                assert!(roster.iter().all(|entry| entry.attempts == 0));
            }
            other => panic!("Expected NextRound, got {:?}", other),
        }
    }

    harness.send(&bob, ClientMessage::AdvanceRound);
    assert_eq!(
        bob.next(),
        ServerMessage::RoundError {
            reason: "Current game has not ended".to_string()
        }
    );
    alice.assert_idle();
}

#[tokio::test]
async fn test_master_disconnect_hands_over_role() {
    let mut harness = Harness::new();
    let (alice, session_id) = harness.host();
    let mut bob = harness.join(&session_id, "Bob");
    let mut carol = harness.join(&session_id, "Carol");
    bob.drain();
    carol.drain();

    harness.disconnect(&alice);

    let bob_id = bob.id;
    for client in [&mut bob, &mut carol] {
        assert_eq!(
            client.next(),
            ServerMessage::RoleChanged { new_master: bob_id }
        );
        match client.next() {
            ServerMessage::PlayerLeft {
                player_id,
                name,
                roster,
            } => {
                assert_eq!(player_id, alice.id);
                assert_eq!(name, "Alice");
                assert_eq!(roster.len(), 2);
                assert!(roster[0].is_game_master);
            }
            other => panic!("Expected PlayerLeft, got {:?}", other),
        }
    }

    assert!(harness.dispatcher.directory().get(alice.id).is_none());
    assert_eq!(harness.dispatcher.client_count(), 2);
}

#[tokio::test]
async fn test_last_member_leaving_destroys_session() {
    let mut harness = Harness::new();
    let (mut alice, session_id) = harness.host();
    let mut bob = harness.join(&session_id, "Bob");
    alice.drain();
    bob.drain();

    harness.send(&bob, ClientMessage::LeaveSession);
    assert_eq!(bob.next(), ServerMessage::SessionLeft);
    assert!(matches!(alice.next(), ServerMessage::PlayerLeft { .. }));

    harness.send(&bob, ClientMessage::LeaveSession);
    assert_eq!(
        bob.next(),
        ServerMessage::SessionError {
            reason: "Not in a session".to_string()
        }
    );

    harness.disconnect(&alice);
    assert!(!harness.dispatcher.registry().contains(&session_id));
    assert!(harness.dispatcher.registry().is_empty());
}

#[tokio::test]
async fn test_sole_guesser_leaving_keeps_round_open() {
    let mut harness = Harness::new();
    let (mut alice, bob, session_id) = harness.running_round();

    harness.disconnect(&bob);
    assert!(matches!(alice.next(), ServerMessage::PlayerLeft { .. }));

    let session = harness.dispatcher.registry().get(&session_id).unwrap();
    assert_eq!(session.state(), RoundState::Playing);
    assert!(session.has_timer());
}

#[tokio::test]
async fn test_creating_a_session_leaves_the_old_one() {
    let mut harness = Harness::new();
    let (mut alice, session_id) = harness.host();
    let mut bob = harness.join(&session_id, "Bob");
    alice.drain();
    bob.drain();

    harness.send(
        &bob,
        ClientMessage::CreateSession {
            name: "Bob".to_string(),
        },
    );
    let new_session = match bob.next() {
        ServerMessage::SessionCreated { session_id, .. } => session_id,
        other => panic!("Expected SessionCreated, got {:?}", other),
    };
    assert_ne!(new_session, session_id);

    match alice.next() {
        ServerMessage::PlayerLeft { player_id, roster, .. } => {
            assert_eq!(player_id, bob.id);
            assert_eq!(roster.len(), 1);
        }
        other => panic!("Expected PlayerLeft, got {:?}", other),
    }
    assert_eq!(
        harness.dispatcher.directory().current_session(bob.id),
        Some(new_session.as_str())
    );
    assert_eq!(harness.dispatcher.registry().len(), 2);
}

#[tokio::test]
async fn test_commands_outside_a_session() {
    let mut harness = Harness::new();
    let mut client = harness.connect();

    harness.send(
        &client,
        ClientMessage::SubmitGuess {
            guess: "4".to_string(),
        },
    );
    assert_eq!(
        client.next(),
        ServerMessage::GuessError {
            reason: "Not in a session".to_string()
        }
    );

    harness.send(&client, ClientMessage::RequestRoster);
    assert!(matches!(client.next(), ServerMessage::SessionError { .. }));
}

#[tokio::test]
async fn test_configured_time_limit_is_announced() {
    let rules = GameConfig {
        round_time_limit_secs: 15,
        ..GameConfig::default()
    };
    let mut harness = Harness::with_rules(rules);
    let (mut alice, session_id) = harness.host();
    let _bob = harness.join(&session_id, "Bob");
    harness.send(
        &alice,
        ClientMessage::SetQuestion {
            question: "2+2?".to_string(),
            answer: "4".to_string(),
        },
    );
    harness.send(&alice, ClientMessage::StartRound);

    let started = alice
        .drain()
        .into_iter()
        .find(|msg| matches!(msg, ServerMessage::RoundStarted { .. }));
    assert_eq!(
        started,
        Some(ServerMessage::RoundStarted {
            question: "2+2?".to_string(),
            time_limit_seconds: 15
        })
    );
}
