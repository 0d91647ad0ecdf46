//! Ordered observer registries and the inbound event fan-out.
//!
//! Callbacks run in registration order. A callback is invoked outside the
//! registry lock, so it may subscribe or unsubscribe while being notified;
//! such changes apply from the next notification on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;

use crate::messages::ServerMessage;
use crate::models::{Message, User};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Listeners<T: ?Sized> {
    entries: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + 'static> Listeners<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Listeners {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);
        self.entries.lock().push((id, callback));
        let registry: Weak<dyn Registry> = Arc::downgrade(self) as Weak<dyn Registry>;
        Subscription { registry, id }
    }

    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

trait Registry: Send + Sync {
    fn remove(&self, id: u64) -> bool;
}

impl<T: ?Sized + 'static> Registry for Listeners<T> {
    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Disposer for one registration. Dropping it keeps the callback registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<dyn Registry>,
    id: u64,
}

impl Subscription {
    /// Removes exactly this registration. Returns `false` when it was already
    /// gone (unsubscribed before, or cleared by a disconnect).
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct Observers {
    pub message: Arc<Listeners<Message>>,
    pub user_joined: Arc<Listeners<User>>,
    pub user_left: Arc<Listeners<User>>,
    pub room_users: Arc<Listeners<[User]>>,
    pub connection: Arc<Listeners<bool>>,
}

impl Observers {
    pub fn new() -> Self {
        Observers {
            message: Listeners::new(),
            user_joined: Listeners::new(),
            user_left: Listeners::new(),
            room_users: Listeners::new(),
            connection: Listeners::new(),
        }
    }

    pub fn dispatch(&self, message: &ServerMessage) {
        match message {
            ServerMessage::Message(message) => {
                debug!("Message received from {} in {}", message.username, message.room);
                self.message.notify(message);
            }
            ServerMessage::UserJoined(user) => {
                debug!("User joined: {} in {}", user.username, user.room);
                self.user_joined.notify(user);
            }
            ServerMessage::UserLeft(user) => {
                debug!("User left: {} from {}", user.username, user.room);
                self.user_left.notify(user);
            }
            ServerMessage::RoomUsers(users) => {
                debug!("Room users updated: {} present", users.len());
                self.room_users.notify(users.as_slice());
            }
            ServerMessage::RoomMessages(messages) => {
                debug!("Room history received: {} messages", messages.len());
                for message in messages {
                    self.message.notify(message);
                }
            }
        }
    }

    pub fn notify_connection(&self, connected: bool) {
        self.connection.notify(&connected);
    }

    pub fn len(&self) -> usize {
        self.message.len()
            + self.user_joined.len()
            + self.user_left.len()
            + self.room_users.len()
            + self.connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.message.clear();
        self.user_joined.clear();
        self.user_left.clear();
        self.room_users.clear();
        self.connection.clear();
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}
