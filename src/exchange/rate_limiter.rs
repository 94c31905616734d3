//! Sliding-window request limiter shared by every symbol

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout, Instant};

use super::VenueError;

/// At most `max_requests` calls sent in any `window`, at most
/// `max_concurrent` calls in flight. Waiters are served in arrival order:
/// both the tokio mutex and the semaphore queue fairly.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    max_concurrent: usize,
    acquire_timeout: Duration,
    admitted: Mutex<VecDeque<Instant>>,
    in_flight: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, max_concurrent: usize, acquire_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_requests: max_requests.max(1),
            window,
            max_concurrent,
            acquire_timeout,
            admitted: Mutex::new(VecDeque::new()),
            in_flight: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Wait for a slot. The returned permit must be held for the duration
    /// of the venue call; dropping it frees the concurrency slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, VenueError> {
        match timeout(self.acquire_timeout, self.acquire_slot()).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::RateLimited(format!(
                "no request slot within {:?}",
                self.acquire_timeout
            ))),
        }
    }

    /// Concurrency permit first, window slot second: the recorded instant is
    /// the moment the call goes out, and a caller that times out while
    /// queued for a permit leaves the window untouched.
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, VenueError> {
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| VenueError::RateLimited("rate limiter closed".to_string()))?;

        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while let Some(oldest) = admitted.front() {
                if now.duration_since(*oldest) >= self.window {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            if admitted.len() < self.max_requests {
                admitted.push_back(now);
                return Ok(permit);
            }

            // Full window: sleep until the oldest admission ages out
            if let Some(oldest) = admitted.front() {
                let wait = self.window.saturating_sub(now.duration_since(*oldest));
                sleep(wait).await;
            }
        }
    }

    /// Calls currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.in_flight.available_permits()
    }

    /// Admissions still inside the current window
    pub async fn window_usage(&self) -> usize {
        let now = Instant::now();
        let admitted = self.admitted.lock().await;
        admitted
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(50, Duration::from_secs(60), 3, Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_blocks_until_oldest_expires() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1), 10, Duration::from_secs(10));
        let start = Instant::now();

        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        assert_eq!(limiter.window_usage().await, 2);

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap() {
        let limiter = RateLimiter::new(100, Duration::from_secs(1), 1, Duration::from_millis(200));
        let held = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);

        // Second caller cannot get a permit while the first is held
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, VenueError::RateLimited(_)));

        drop(held);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_respect_window_under_queueing() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1), 1, Duration::from_secs(30)));
        let start = Instant::now();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));

        let callers: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let sent = Arc::clone(&sent);
                tokio::spawn(async move {
                    let _permit = limiter.acquire().await.unwrap();
                    sent.lock().unwrap().push(start.elapsed());
                    // The call itself takes a while
                    sleep(Duration::from_millis(900)).await;
                })
            })
            .collect();
        for caller in callers {
            caller.await.unwrap();
        }

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 6);
        for (i, at) in sent.iter().enumerate() {
            let in_window = sent[i..]
                .iter()
                .filter(|later| **later - *at < Duration::from_secs(1))
                .count();
            assert!(in_window <= 2, "{} sends within 1s of {:?}: {:?}", in_window, at, sent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_waiting_for_permit_leaves_window_untouched() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60), 1, Duration::from_secs(1));
        let held = limiter.acquire().await.unwrap();
        assert!(matches!(limiter.acquire().await, Err(VenueError::RateLimited(_))));
        assert_eq!(limiter.window_usage().await, 1);
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_maps_to_rate_limited() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), 10, Duration::from_secs(1));
        drop(limiter.acquire().await.unwrap());
        assert!(matches!(
            limiter.acquire().await,
            Err(VenueError::RateLimited(_))
        ));
    }
}
