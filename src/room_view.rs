//! Client-side state for one joined room, built from the session's events.
//!
//! The relay can deliver the same message twice (live and in history), so
//! messages are deduplicated by id here rather than in the session.

use std::collections::HashSet;

use crate::models::{Message, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    Lost,
    Restored,
}

#[derive(Debug, Default)]
pub struct RoomView {
    messages: Vec<Message>,
    seen: HashSet<String>,
    users: Vec<User>,
    connected: bool,
}

impl RoomView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a message with the same id was already recorded.
    pub fn add_message(&mut self, message: &Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message.clone());
        true
    }

    pub fn set_users(&mut self, users: &[User]) {
        self.users = users.to_vec();
    }

    /// Members are matched by [`User::identity_key`], so a rejoin after a
    /// reconnect replaces the stale entry instead of duplicating it.
    pub fn user_joined(&mut self, user: &User) {
        self.users.retain(|u| u.identity_key() != user.identity_key());
        self.users.push(user.clone());
    }

    pub fn user_left(&mut self, user: &User) {
        self.users.retain(|u| u.identity_key() != user.identity_key());
    }

    /// Records the latest connection state. Returns the transition, if any.
    pub fn set_connected(&mut self, connected: bool) -> Option<ConnectionChange> {
        if std::mem::replace(&mut self.connected, connected) == connected {
            return None;
        }
        Some(if connected {
            ConnectionChange::Restored
        } else {
            ConnectionChange::Lost
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
