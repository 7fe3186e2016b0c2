//! A fixed-window counter shared by the ingress HTTP surface (keyed by
//! principal or IP) and the webhook ingestor (keyed by repo), per §5 and
//! §4.7. In-process only — the teacher's control-plane crates don't reach
//! for an external store (Redis) for this kind of small-scale limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the call under `key` is allowed, incrementing its
    /// counter. A new window starts once the previous one has elapsed.
    pub fn allow(&self, key: &str) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();

        let entry = windows.entry(key.to_string()).or_insert_with(|| Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return false;
        }

        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow("repo-a"));
        assert!(limiter.allow("repo-a"));
        assert!(!limiter.allow("repo-a"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("repo-a"));
        assert!(limiter.allow("repo-b"));
    }
}
