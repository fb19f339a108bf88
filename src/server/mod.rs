//! Server module - TCP transport and the dispatcher that drives the game

mod connection;
mod dispatcher;
mod listener;

pub use connection::ClientConnection;
pub use dispatcher::{Dispatcher, Inbound};
pub use listener::ServerListener;
