use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

struct Entry {
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

type Slots = Arc<Mutex<HashMap<String, Entry>>>;

/// Tracks the active generation session per thread and exposes cancellation.
///
/// The checkpoint chain has no merge semantics, so at most one session may
/// run per thread: a second concurrent `register` is rejected rather than
/// queued or interleaved.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    slots: Slots,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the thread for one session.
    ///
    /// The returned guard deregisters on drop, so the slot is released on
    /// every exit path of the session task.
    pub fn register(&self, thread_id: &str) -> Result<ActiveSession, SessionError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.contains_key(thread_id) {
            return Err(SessionError::ThreadBusy(thread_id.to_string()));
        }

        let cancel = CancellationToken::new();
        slots.insert(
            thread_id.to_string(),
            Entry {
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        tracing::debug!(thread_id, "registered generation session");

        Ok(ActiveSession {
            slots: Arc::clone(&self.slots),
            thread_id: thread_id.to_string(),
            cancel,
        })
    }

    /// Request cancellation of the thread's active session.
    ///
    /// Returns false when no session is running.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(thread_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(thread_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(thread_id)
    }

    /// Start time of the thread's active session, if any.
    pub fn started_at(&self, thread_id: &str) -> Option<DateTime<Utc>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(thread_id).map(|entry| entry.started_at)
    }
}

/// RAII claim on a thread's single session slot.
pub struct ActiveSession {
    slots: Slots,
    thread_id: String,
    cancel: CancellationToken,
}

impl ActiveSession {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&self.thread_id);
        tracing::debug!(thread_id = %self.thread_id, "deregistered generation session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_register_is_rejected() {
        let registry = SessionRegistry::new();
        let guard = registry.register("t1").unwrap();

        match registry.register("t1") {
            Err(SessionError::ThreadBusy(id)) => assert_eq!(id, "t1"),
            Err(other) => panic!("expected ThreadBusy, got {other}"),
            Ok(_) => panic!("expected ThreadBusy, got a second registration"),
        }

        // A different thread is unaffected.
        let other = registry.register("t2").unwrap();
        drop(other);

        drop(guard);
        assert!(registry.register("t1").is_ok());
    }

    #[test]
    fn cancel_reaches_the_guard_token() {
        let registry = SessionRegistry::new();
        let guard = registry.register("t1").unwrap();
        let token = guard.cancel_token();

        assert!(!token.is_cancelled());
        assert!(registry.cancel("t1"));
        assert!(token.is_cancelled());
        assert!(registry.is_active("t1"));

        drop(guard);
        assert!(!registry.is_active("t1"));
        assert!(!registry.cancel("t1"), "no active session left");
    }
}
