// Sliding-window throttle for outbound DMs.
//
// The messaging endpoint caps how many DMs a business account may send per
// hour. The delivery worker awaits `acquire()` once per job, before the
// retry sequence starts, racing it against shutdown. `acquire` is cancel
// safe: a dropped wait records nothing.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::info;

/// A sliding-window rate limiter for API calls.
///
/// Tracks request timestamps in a sliding window and waits when the window
/// is full. Safe to share across tasks behind an `Arc`.
pub struct RateLimiter {
    /// Timestamps of recent requests within the current window.
    requests: Mutex<VecDeque<Instant>>,
    /// Maximum number of requests allowed per window.
    max_requests: u32,
    /// Duration of the sliding window.
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests: max_requests_per_window,
            window,
        }
    }

    /// `max_requests` per hour.
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }

    /// Wait until the window has room, then record the request.
    pub async fn acquire(&self) {
        loop {
            // Compute what to do while holding the lock, then drop it
            // before sleeping.
            let wait = {
                let now = Instant::now();
                let mut requests = self.requests.lock().await;

                // Evict requests that have fallen outside the window
                while let Some(&oldest) = requests.front() {
                    if now.duration_since(oldest) >= self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }

                match requests.front() {
                    Some(&oldest) if requests.len() as u32 >= self.max_requests => {
                        (oldest + self.window).duration_since(now)
                    }
                    _ => {
                        requests.push_back(now);
                        return;
                    }
                }
            };

            info!(
                delay_ms = wait.as_millis() as u64,
                "Outbound rate limit reached, waiting {}ms",
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted against the window.
    pub async fn in_window(&self) -> usize {
        self.requests.lock().await.len()
    }
}
