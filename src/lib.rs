//! guessr - a session-based multiplayer question and answer game server
//!
//! This crate provides:
//! - The game core: sessions, rounds, roles and scores
//! - The dispatcher that serializes every command and timer firing
//! - A length-prefixed MessagePack protocol over TCP
//! - Configuration management
//!
//! # Architecture
//!
//! One participant per session is the game master: they set a question and
//! a hidden answer, start the round, and everyone else guesses against a
//! timer. A single dispatcher task owns every session, so the timer and a
//! winning guess can never interleave.

pub mod config;
pub mod game;
pub mod protocol;
pub mod server;
