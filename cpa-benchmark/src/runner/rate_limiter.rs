//! Sliding-window request and token limiter for provider clients

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Weighted events within the last minute
#[derive(Debug, Default)]
struct SlidingWindow {
    events: VecDeque<(Instant, u32)>,
}

impl SlidingWindow {
    fn evict(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.events.front() {
            if now.duration_since(at) > WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn total(&self) -> u32 {
        self.events.iter().fold(0u32, |acc, (_, w)| acc.saturating_add(*w))
    }

    /// Time until the oldest event leaves the window
    fn wait_for_oldest(&self, now: Instant) -> Duration {
        self.events
            .front()
            .map(|&(at, _)| WINDOW.saturating_sub(now.duration_since(at)) + Duration::from_millis(10))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-client limiter for requests per minute and tokens per minute.
/// A limit of 0 disables that dimension.
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    requests: Mutex<SlidingWindow>,
    tokens: Mutex<SlidingWindow>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            requests: Mutex::new(SlidingWindow::default()),
            tokens: Mutex::new(SlidingWindow::default()),
        }
    }

    /// Wait until both a request slot and token budget are free, then take the slot
    pub async fn acquire(&self) {
        loop {
            if let Some(wait) = self.token_wait().await {
                tokio::time::sleep(wait).await;
                continue;
            }

            let mut requests = self.requests.lock().await;
            let now = Instant::now();
            requests.evict(now);
            if self.requests_per_minute > 0
                && requests.events.len() >= self.requests_per_minute as usize
            {
                let wait = requests.wait_for_oldest(now);
                drop(requests);
                tracing::debug!("Request limit reached, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }
            requests.events.push_back((now, 1));
            return;
        }
    }

    async fn token_wait(&self) -> Option<Duration> {
        if self.tokens_per_minute == 0 {
            return None;
        }
        let mut tokens = self.tokens.lock().await;
        let now = Instant::now();
        tokens.evict(now);
        (tokens.total() >= self.tokens_per_minute).then(|| tokens.wait_for_oldest(now))
    }

    /// Record tokens consumed by a finished request
    pub async fn record_tokens(&self, tokens: u32) {
        let mut window = self.tokens.lock().await;
        let now = Instant::now();
        window.evict(now);
        window.events.push_back((now, tokens));
    }

    /// Tokens used in the last minute
    pub async fn current_token_usage(&self) -> u32 {
        let mut window = self.tokens.lock().await;
        window.evict(Instant::now());
        window.total()
    }

    pub fn limits(&self) -> (u32, u32) {
        (self.requests_per_minute, self.tokens_per_minute)
    }
}
