//! Session and connection management for one logged-in chat participant.
//!
//! [`SessionManager`] owns the transport link, the session identity and the
//! observer registries. UI code drives it through `initialize`, `join_room`,
//! `send_message`, `leave_room` and `disconnect`, and listens through the
//! `on_*` registrations.
//!
//! None of the operations report failure to the caller. A rejected
//! operation is logged and the caller is expected to watch
//! [`SessionManager::is_connected`]. Connection notifications are
//! level-triggered: observers get `true` repeatedly (optimistic signal,
//! handshake completion, liveness monitor) and must treat repeats as no-ops.
//! A transport drop does not notify `false`.
//!
//! Nothing here waits for the handshake. Callers that need a live connection
//! before joining poll `is_connected()` themselves (the bundled terminal client
//! polls every 100 ms for up to 10 s).

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::driver::Link;
use crate::listeners::{Observers, Subscription};
use crate::messages::ClientMessage;
use crate::models::{Message, User};
use crate::storage::{KeyValueStore, USERNAME_KEY, USER_ID_KEY};
use crate::transport::{Connector, SocketIoConnector};

#[derive(Debug, Default, Clone)]
struct Session {
    user_id: Option<String>,
    username: Option<String>,
    current_room: Option<String>,
}

pub struct SessionManager {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn KeyValueStore>,
    observers: Arc<Observers>,
    // Lock order: `link` before `session`.
    link: Mutex<Option<Link>>,
    session: Mutex<Session>,
}

impl SessionManager {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        SessionManager {
            config,
            connector,
            store,
            observers: Arc::new(Observers::new()),
            link: Mutex::new(None),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn with_socket_io(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let connector = Arc::new(SocketIoConnector::new(config.clone()));
        Self::new(config, connector, store)
    }

    pub async fn initialize(&self, user_id: &str, username: &str) {
        let stale = {
            let mut link = self.link.lock();
            if link.as_ref().is_some_and(Link::is_connected) {
                debug!("Already connected, skipping initialization");
                return;
            }
            link.take()
        };
        if let Some(stale) = stale {
            debug!("Replacing a connection that never came up");
            stale.shutdown(self.config.shutdown_timeout()).await;
        }

        {
            let mut session = self.session.lock();
            session.user_id = Some(user_id.to_string());
            session.username = Some(username.to_string());
        }
        self.persist_identity(user_id, username).await;

        info!(
            "Initializing connection for {username} to {}",
            self.config.server_url
        );
        if self.config.optimistic_connect_signal {
            self.observers.notify_connection(true);
        }

        let link = Link::spawn(
            Arc::clone(&self.connector),
            &self.config,
            Arc::clone(&self.observers),
        );
        *self.link.lock() = Some(link);
    }

    async fn persist_identity(&self, user_id: &str, username: &str) {
        for (key, value) in [(USER_ID_KEY, user_id), (USERNAME_KEY, username)] {
            if let Err(e) = self.store.set(key, value).await {
                warn!("Failed to persist {key}: {e}");
            }
        }
    }

    /// `username` and `uid` override the session defaults for this join only.
    pub fn join_room(&self, room: &str, username: Option<&str>, uid: Option<&str>) {
        let link = self.link.lock();
        let Some(link) = link.as_ref().filter(|link| link.is_connected()) else {
            error!("Cannot join room {room} - not connected");
            return;
        };

        let message = {
            let mut session = self.session.lock();
            session.current_room = Some(room.to_string());
            ClientMessage::JoinRoom {
                username: non_empty(username)
                    .or(session.username.as_deref())
                    .unwrap_or_default()
                    .to_string(),
                room: room.to_string(),
                uid: non_empty(uid)
                    .or_else(|| non_empty(session.user_id.as_deref()))
                    .map(str::to_string),
            }
        };

        debug!("Joining room {room}");
        if !link.send(message) {
            error!("Cannot join room {room} - connection driver is gone");
        }
    }

    pub fn leave_room(&self) {
        let link = self.link.lock();
        let Some(link) = link.as_ref().filter(|link| link.is_connected()) else {
            return;
        };

        let Some(room) = self.session.lock().current_room.take() else {
            return;
        };
        debug!("Leaving room {room}");
        if !link.send(ClientMessage::LeaveRoom {}) {
            error!("Cannot leave room {room} - connection driver is gone");
        }
    }

    /// Content is sent as-is; length and blank checks belong to the caller.
    pub fn send_message(&self, text: &str, room: &str, uid: Option<&str>) {
        let link = self.link.lock();
        let session = self.session.lock();
        let (Some(link), Some(username)) = (
            link.as_ref().filter(|link| link.is_connected()),
            non_empty(session.username.as_deref()),
        ) else {
            error!("Cannot send message - not connected or no username");
            return;
        };

        let message = ClientMessage::SendMessage {
            text: text.to_string(),
            username: username.to_string(),
            room: room.to_string(),
            uid: non_empty(uid)
                .or_else(|| non_empty(session.user_id.as_deref()))
                .map(str::to_string),
        };

        debug!("Sending message to {room} ({} chars)", text.chars().count());
        if !link.send(message) {
            error!("Cannot send message - connection driver is gone");
        }
    }

    /// Tears down the link, forgets the session and drops every observer.
    /// Once this returns no observer is called again.
    pub async fn disconnect(&self) {
        info!("Disconnecting session");
        let link = self.link.lock().take();
        if let Some(link) = link {
            link.shutdown(self.config.shutdown_timeout()).await;
        }
        *self.session.lock() = Session::default();
        self.observers.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().as_ref().is_some_and(Link::is_connected)
    }

    pub fn current_room(&self) -> Option<String> {
        self.session.lock().current_room.clone()
    }

    pub fn current_username(&self) -> Option<String> {
        self.session.lock().username.clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.session.lock().user_id.clone()
    }

    /// Total registrations across the five observer lists.
    pub fn listener_count(&self) -> usize {
        self.observers.len()
    }

    /// Live messages and room history backfill both arrive here; a message
    /// can be delivered twice, so consumers de-duplicate by `id`.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.observers.message.subscribe(callback)
    }

    pub fn on_user_joined<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&User) + Send + Sync + 'static,
    {
        self.observers.user_joined.subscribe(callback)
    }

    pub fn on_user_left<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&User) + Send + Sync + 'static,
    {
        self.observers.user_left.subscribe(callback)
    }

    /// Full roster snapshots; each one replaces the previous.
    pub fn on_room_users<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[User]) + Send + Sync + 'static,
    {
        self.observers.room_users.subscribe(callback)
    }

    pub fn on_connection<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.observers
            .connection
            .subscribe(move |connected: &bool| callback(*connected))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Dropping the link aborts its driver.
        self.link.get_mut().take();
        self.observers.clear();
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
