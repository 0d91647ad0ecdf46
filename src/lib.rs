//! Client for a room-based chat relay speaking Socket.IO over Engine.IO v4.

pub mod backoff;
pub mod config;
mod driver;
pub mod error;
pub mod listeners;
pub mod login;
pub mod messages;
pub mod models;
pub mod packet;
pub mod room_view;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::{ClientConfig, ReconnectConfig, TransportKind};
pub use error::{ConfigError, ProtocolError, StoreError, TransportError, ValidationError};
pub use listeners::Subscription;
pub use models::{Message, User};
pub use room_view::{ConnectionChange, RoomView};
pub use session::SessionManager;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{Connection, Connector, Inbound, SocketIoConnector};
