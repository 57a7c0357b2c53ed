//! Per-connection websocket state.
//!
//! A [`SessionState`] lives exactly as long as one websocket connection. Its
//! [`Memo`] collects the text generated during the current turn and is
//! drained when the turn ends. [`ConnectionManager`] is the process-wide
//! registry of live connections.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TransportError;

/// Ordered text fragments generated during one turn.
///
/// Cloning shares the underlying buffer, so the generation stream can
/// append while the session owns the turn boundary.
#[derive(Debug, Clone, Default)]
pub struct Memo(Arc<Mutex<Vec<String>>>);

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fragment: impl Into<String>) {
        self.fragments().push(fragment.into());
    }

    /// Removes and returns every fragment, leaving the memo empty.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.fragments())
    }

    /// All fragments concatenated without a separator.
    pub fn concat(&self) -> String {
        self.fragments().concat()
    }

    pub fn len(&self) -> usize {
        self.fragments().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments().is_empty()
    }

    fn fragments(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // A panic while pushing a string cannot leave the Vec inconsistent.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub connection_id: Uuid,
    pub memo: Memo,
}

impl SessionState {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            memo: Memo::new(),
        }
    }

    /// Drains the memo and returns its concatenated text.
    pub fn finish_turn(&self) -> String {
        self.memo.take().concat()
    }
}

/// Extracts the user message from a `"<prefix>:<content><terminator>"`
/// frame: everything after the first `:`, minus the final character.
///
/// A frame without `:` is rejected.
pub fn parse_frame(frame: &str) -> Result<String, TransportError> {
    let (_, rest) = frame.split_once(':').ok_or_else(|| {
        TransportError::MalformedFrame(format!("missing ':' separator in {:?}", truncate(frame)))
    })?;
    let mut chars = rest.chars();
    chars.next_back();
    Ok(chars.as_str().to_string())
}

fn truncate(frame: &str) -> &str {
    match frame.char_indices().nth(64) {
        Some((i, _)) => &frame[..i],
        None => frame,
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connected_at: DateTime<Utc>,
}

/// Registry of live websocket connections.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<Uuid, ConnectionInfo>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection whose handshake has completed.
    pub fn connect(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionInfo {
                connected_at: Utc::now(),
            },
        );
        info!(connection_id = %id, active = self.connections.len(), "websocket connected");
        id
    }

    /// Deregisters a connection. Returns `false` (and logs) if the handle
    /// was not registered.
    pub fn disconnect(&self, id: &Uuid) -> bool {
        match self.connections.remove(id) {
            Some((_, info)) => {
                let duration = Utc::now() - info.connected_at;
                info!(
                    connection_id = %id,
                    seconds = duration.num_seconds(),
                    active = self.connections.len(),
                    "websocket disconnected"
                );
                true
            }
            None => {
                warn!(connection_id = %id, "disconnect for unknown connection");
                false
            }
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&self) {
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_drops_prefix_and_terminator() {
        assert_eq!(parse_frame("user:Hello world!").unwrap(), "Hello world");
        assert_eq!(parse_frame("a:b:c.").unwrap(), "b:c");
        assert_eq!(parse_frame("user:").unwrap(), "");
        assert_eq!(parse_frame("user:¿Qué?").unwrap(), "¿Qué");
    }

    #[test]
    fn frame_without_separator_is_rejected() {
        let err = parse_frame("Hello world!").unwrap_err();
        assert!(matches!(err, TransportError::MalformedFrame(_)));
    }

    #[test]
    fn memo_take_resets() {
        let session = SessionState::new(Uuid::new_v4());
        session.memo.push("Hello");
        session.memo.push(", ");
        session.memo.push("world");
        assert_eq!(session.memo.len(), 3);
        assert_eq!(session.finish_turn(), "Hello, world");
        assert!(session.memo.is_empty());

        session.memo.push("next");
        assert_eq!(session.finish_turn(), "next");
    }

    #[test]
    fn memo_clones_share_fragments() {
        let memo = Memo::new();
        let writer = memo.clone();
        writer.push("shared");
        assert_eq!(memo.concat(), "shared");
    }

    #[test]
    fn connect_and_disconnect() {
        let manager = ConnectionManager::new();
        let a = manager.connect();
        let b = manager.connect();
        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);

        assert!(manager.disconnect(&a));
        assert!(!manager.contains(&a));
        assert!(manager.contains(&b));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn unknown_disconnect_is_harmless() {
        let manager = ConnectionManager::new();
        let a = manager.connect();
        assert!(!manager.disconnect(&Uuid::new_v4()));
        assert!(manager.disconnect(&a));
        assert!(!manager.disconnect(&a));
        assert!(manager.is_empty());
    }
}
