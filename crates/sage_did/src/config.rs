//! Registry parameters (delays, caps, stake).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryParams {
    /// Seconds between commit and the earliest acceptable reveal.
    pub commit_min_delay: u64,
    /// Seconds after which an unrevealed commitment expires.
    pub commit_max_delay: u64,
    /// Commits per owner per UTC day (day = block_time / 86400).
    pub max_daily_registrations: u32,
    /// Keys per agent record.
    pub max_keys_per_agent: usize,
    /// Seconds between reveal and the record becoming activatable.
    pub activation_delay: u64,
    /// Minimum stake (wei) posted with a commitment.
    pub registration_stake: u128,
    /// Seconds after deactivation before the stake is returnable.
    pub stake_cooloff: u64,
}

impl Default for RegistryParams {
    fn default() -> Self {
        Self {
            commit_min_delay: 60,
            commit_max_delay: 3_600,
            max_daily_registrations: 24,
            max_keys_per_agent: 10,
            activation_delay: 3_600,
            registration_stake: 10_000_000_000_000_000, // 0.01 ether
            stake_cooloff: 30 * 86_400,
        }
    }
}
