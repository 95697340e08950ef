//! Replay guard: bounded (key id, nonce) → first-seen window.
//!
//! `seen_once` atomically marks-and-tests. The window length matches
//! the signature verifier's max skew — anything older could not pass
//! the skew check anyway, so entries beyond it are evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct State {
    seen: HashMap<(String, String), Instant>,
    last_sweep: Instant,
}

pub struct ReplayCache {
    window: Duration,
    state: Mutex<State>,
}

impl ReplayCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(State {
                seen: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Returns true when (key_id, nonce) was already observed inside
    /// the window; otherwise records it and returns false.
    pub fn seen_once(&self, key_id: &str, nonce: &str) -> bool {
        let mut state = self.state.lock();

        if state.last_sweep.elapsed() >= self.window {
            let window = self.window;
            state.seen.retain(|_, t| t.elapsed() < window);
            state.last_sweep = Instant::now();
        }

        let key = (key_id.to_owned(), nonce.to_owned());
        match state.seen.get(&key) {
            Some(t) if t.elapsed() < self.window => true,
            _ => {
                state.seen.insert(key, Instant::now());
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_observation_is_replay() {
        let cache = ReplayCache::new(Duration::from_secs(300));
        assert!(!cache.seen_once("kid-1", "abc"));
        assert!(cache.seen_once("kid-1", "abc"));
        // Distinct nonce or key id is fresh.
        assert!(!cache.seen_once("kid-1", "abd"));
        assert!(!cache.seen_once("kid-2", "abc"));
    }

    #[test]
    fn entries_expire_with_the_window() {
        let cache = ReplayCache::new(Duration::from_millis(20));
        assert!(!cache.seen_once("kid", "n"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.seen_once("kid", "n"), "window passed, nonce fresh again");
    }

    #[test]
    fn sweep_bounds_storage() {
        let cache = ReplayCache::new(Duration::from_millis(10));
        for i in 0..100 {
            cache.seen_once("kid", &i.to_string());
        }
        std::thread::sleep(Duration::from_millis(15));
        // The next call sweeps everything stale.
        cache.seen_once("kid", "fresh");
        assert!(cache.len() <= 2);
    }
}
