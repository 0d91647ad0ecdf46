//! Checks a front end runs before it hands anything to the session manager.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::Instant;

use crate::error::ValidationError;
use crate::session::SessionManager;

pub const USERNAME_MIN: usize = 2;
pub const USERNAME_MAX: usize = 20;
pub const ROOM_MIN: usize = 1;
pub const ROOM_MAX: usize = 30;
pub const MESSAGE_MAX: usize = 1000;

pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const CONNECT_WAIT: Duration = Duration::from_secs(10);

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `user-<epoch millis>-<9 base36 chars>`, generated once per login.
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect();
    format!("user-{}-{suffix}", Utc::now().timestamp_millis())
}

/// Returns the trimmed username.
pub fn validate_username(username: &str) -> Result<&str, ValidationError> {
    let username = username.trim();
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ValidationError::UsernameLength {
            min: USERNAME_MIN,
            max: USERNAME_MAX,
        });
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::UsernameCharacters);
    }
    Ok(username)
}

/// Returns the room name trimmed and lowercased.
pub fn normalize_room(room: &str) -> Result<String, ValidationError> {
    let room = room.trim();
    let len = room.chars().count();
    if !(ROOM_MIN..=ROOM_MAX).contains(&len) {
        return Err(ValidationError::RoomLength {
            min: ROOM_MIN,
            max: ROOM_MAX,
        });
    }
    if !room
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c.is_whitespace())
    {
        return Err(ValidationError::RoomCharacters);
    }
    Ok(room.to_lowercase())
}

pub fn validate_message(text: &str) -> Result<&str, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::MessageEmpty);
    }
    if text.chars().count() > MESSAGE_MAX {
        return Err(ValidationError::MessageTooLong { max: MESSAGE_MAX });
    }
    Ok(text)
}

/// Polls `is_connected` until it turns true or `wait` runs out.
pub async fn wait_for_connection(manager: &SessionManager, wait: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if manager.is_connected() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
