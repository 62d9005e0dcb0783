use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;

/// Fixed-window admission control. Counters live in the bucket that contains
/// `now`; a new bucket resets the count, so the staleness of a denial is
/// bounded by the window itself.
pub struct RateLimiter {
    max_requests: u32,
    window_ms: i64,
    windows: DashMap<String, Window>,
}

#[derive(Clone, Copy)]
struct Window {
    bucket_start_ms: i64,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: i64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> RateLimiter {
        RateLimiter {
            max_requests,
            window_ms: window.as_millis() as i64,
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Utc::now().timestamp_millis())
    }

    fn check_at(&self, identity: &str, now_ms: i64) -> RateLimitDecision {
        let bucket_start_ms = now_ms - now_ms.rem_euclid(self.window_ms);
        let mut entry = self
            .windows
            .entry(identity.to_owned())
            .or_insert(Window {
                bucket_start_ms,
                count: 0,
            });
        let window = entry.value_mut();
        if window.bucket_start_ms != bucket_start_ms {
            window.bucket_start_ms = bucket_start_ms;
            window.count = 0;
        }
        let reset_at_ms = bucket_start_ms + self.window_ms;
        if window.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms,
            };
        }
        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - window.count,
            reset_at_ms,
        }
    }

    /// Drop counters from buckets that have already ended.
    pub fn sweep(&self) {
        let now_ms = Utc::now().timestamp_millis();
        self.windows
            .retain(|_, window| window.bucket_start_ms + self.window_ms > now_ms);
    }
}
