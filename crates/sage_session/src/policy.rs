//! Session lifetime policy.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Absolute TTL from creation.
    pub max_age: Duration,
    /// Longest tolerated gap since last use.
    pub idle_timeout: Duration,
    /// Message cap per direction.
    pub max_messages: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3_600),
            idle_timeout: Duration::from_secs(300),
            max_messages: 10_000,
        }
    }
}
