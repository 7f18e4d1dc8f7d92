//! Sliding-window request throttle shared by every provider call in the
//! process. `acquire` waits for a free slot instead of failing; the overall
//! pipeline deadline bounds how long a caller can end up waiting.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute.max(1) as usize, Duration::from_secs(60))
    }

    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            issued: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks until a slot is available within the window, then claims it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut issued = self.issued.lock().await;
                let now = Instant::now();
                while let Some(oldest) = issued.front() {
                    if now.duration_since(*oldest) >= self.window {
                        issued.pop_front();
                    } else {
                        break;
                    }
                }

                if issued.len() < self.capacity {
                    issued.push_back(now);
                    return;
                }

                // Lock is released before sleeping so other tasks can race
                // for the slot that frees first.
                issued
                    .front()
                    .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                    .unwrap_or(self.window)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}
