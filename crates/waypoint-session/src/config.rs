use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for generation sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Watchdog window: if the producer stays silent this long, the turn is
    /// treated exactly like a cancellation (partial commit, `stopped` frame).
    pub idle_timeout: Duration,
    /// Capacity of the outbound frame channel; a full buffer applies
    /// backpressure to the generation loop.
    pub channel_capacity: usize,
    /// Maximum length of a thread title derived from the first message.
    pub title_max_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            channel_capacity: 256,
            title_max_chars: 50,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars.max(1);
        self
    }
}
