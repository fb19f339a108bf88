//! Session registry - live sessions keyed by session code

use super::session::{ConnectionId, Session, SessionId};
use super::validation::SESSION_CODE_LEN;
use crate::config::GameConfig;
use std::collections::HashMap;
use uuid::Uuid;

/// All live sessions
///
/// Owned by the dispatcher loop, so every operation is applied atomically
/// with respect to every other.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    rules: GameConfig,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions follow `rules`
    pub fn new(rules: GameConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            rules,
        }
    }

    pub fn rules(&self) -> &GameConfig {
        &self.rules
    }

    /// Create a session with `master_id` as its only member and game master
    pub fn create(&mut self, master_id: ConnectionId, master_name: String) -> &mut Session {
        self.create_with(master_id, master_name, random_code)
    }

    /// Like [`SessionRegistry::create`], drawing candidate codes from `generate`
    pub fn create_with<F>(
        &mut self,
        master_id: ConnectionId,
        master_name: String,
        generate: F,
    ) -> &mut Session
    where
        F: FnMut() -> String,
    {
        let id = self.allocate_id(generate);
        let session = Session::new(id.clone(), master_id, master_name, self.rules.clone());
        tracing::info!("Session {} created by {}", id, master_id);
        self.sessions.entry(id).or_insert(session)
    }

    /// Draw codes until one is not in use
    fn allocate_id<F>(&self, mut generate: F) -> SessionId
    where
        F: FnMut() -> String,
    {
        loop {
            let code = generate().to_ascii_uppercase();
            if !self.sessions.contains_key(&code) {
                return code;
            }
            tracing::debug!("Session code collision on {}, regenerating", code);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(&id.to_ascii_uppercase())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(&id.to_ascii_uppercase())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(&id.to_ascii_uppercase())
    }

    /// Delete a session; dropping it cancels any armed timer
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(&id.to_ascii_uppercase());
        if let Some(session) = &removed {
            let age = chrono::Utc::now() - session.created_at();
            tracing::info!("Session {} deleted after {}s", session.id(), age.num_seconds());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Eight upper-case hex characters from a v4 UUID
fn random_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(SESSION_CODE_LEN);
    code.to_ascii_uppercase()
}
