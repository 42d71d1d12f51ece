//! Mirror pool selection.
//!
//! Mirrors are community-run and unreliable. The pool hands out a random
//! usable endpoint, parks rate-limited endpoints until their penalty ends,
//! and drops failing endpoints for the rest of the fetch cycle. When nothing
//! is usable the pool either waits for the soonest penalty to end or, if
//! that wait is too long, starts over from the full mirror list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::time::{Instant, sleep};

use crate::error::{AppError, Result};

/// Outcome of inspecting the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolState {
    /// An endpoint is usable now
    Available(String),
    /// Every remaining endpoint is rate limited for at least this long
    Wait(Duration),
    /// Nothing usable within the maximum wait; the pool must reset
    Exhausted,
}

/// Rotating set of interchangeable upstream endpoints.
#[derive(Debug, Clone)]
pub struct MirrorPool {
    mirrors: Vec<String>,
    rotation: Vec<String>,
    removed: HashSet<String>,
    rate_limited_until: HashMap<String, Instant>,
    max_wait: Duration,
}

impl MirrorPool {
    /// Create a pool over `mirrors`. Trailing slashes and duplicates are dropped.
    pub fn new(mirrors: &[String], max_wait: Duration) -> Self {
        let mut unique = Vec::new();
        for mirror in mirrors {
            let mirror = mirror.trim().trim_end_matches('/').to_string();
            if !mirror.is_empty() && !unique.contains(&mirror) {
                unique.push(mirror);
            }
        }

        Self {
            rotation: unique.clone(),
            mirrors: unique,
            removed: HashSet::new(),
            rate_limited_until: HashMap::new(),
            max_wait,
        }
    }

    /// Endpoints currently eligible for selection.
    pub fn available(&self) -> &[String] {
        &self.rotation
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Return an endpoint that is not rate limited.
    ///
    /// Sleeps until the soonest penalty ends when everything is rate limited,
    /// unless that wait exceeds the pool's maximum wait, in which case the
    /// pool resets and returns a random mirror immediately.
    pub async fn select(&mut self) -> Result<String> {
        if self.mirrors.is_empty() {
            return Err(AppError::NoMirrors);
        }

        loop {
            match self.state(Instant::now()) {
                PoolState::Available(mirror) => return Ok(mirror),
                PoolState::Wait(wait) => {
                    log::info!(
                        "All mirrors are rate limited, waiting {:.1}s",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                PoolState::Exhausted => {
                    log::warn!(
                        "Mirror pool exhausted, resetting to all {} mirrors",
                        self.mirrors.len()
                    );
                    self.reset();
                    return self.random_mirror().ok_or(AppError::NoMirrors);
                }
            }
        }
    }

    /// Inspect the pool at `now`, restoring endpoints whose penalty ended.
    pub fn state(&mut self, now: Instant) -> PoolState {
        self.restore_expired(now);

        if let Some(mirror) = self.random_available() {
            return PoolState::Available(mirror);
        }

        match self.rate_limited_until.values().min() {
            Some(soonest) => {
                let wait = soonest.saturating_duration_since(now);
                if wait > self.max_wait {
                    PoolState::Exhausted
                } else {
                    PoolState::Wait(wait)
                }
            }
            None => PoolState::Exhausted,
        }
    }

    /// Park `endpoint` for `retry_after_secs` seconds.
    pub fn mark_rate_limited(&mut self, endpoint: &str, retry_after_secs: u64) {
        let until = Instant::now() + Duration::from_secs(retry_after_secs);
        self.rate_limited_until.insert(endpoint.to_string(), until);
        self.rotation.retain(|m| m != endpoint);
        log::warn!(
            "Mirror {} rate limited for {}s ({} left in rotation)",
            endpoint,
            retry_after_secs,
            self.rotation.len()
        );
    }

    /// Drop `endpoint` from rotation until the next reset.
    pub fn remove(&mut self, endpoint: &str) {
        self.removed.insert(endpoint.to_string());
        self.rate_limited_until.remove(endpoint);
        self.rotation.retain(|m| m != endpoint);
        log::debug!(
            "Removed mirror {} ({} left in rotation)",
            endpoint,
            self.rotation.len()
        );
    }

    /// Restore every mirror and clear all penalties.
    pub fn reset(&mut self) {
        self.rotation = self.mirrors.clone();
        self.removed.clear();
        self.rate_limited_until.clear();
    }

    fn restore_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .rate_limited_until
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(mirror, _)| mirror.clone())
            .collect();

        for mirror in expired {
            self.rate_limited_until.remove(&mirror);
            if !self.removed.contains(&mirror) && !self.rotation.contains(&mirror) {
                log::debug!("Mirror {} is available again", mirror);
                self.rotation.push(mirror);
            }
        }
    }

    fn random_available(&self) -> Option<String> {
        self.rotation.choose(&mut rand::rng()).cloned()
    }

    fn random_mirror(&self) -> Option<String> {
        self.mirrors.choose(&mut rand::rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(mirrors: &[&str]) -> MirrorPool {
        let mirrors: Vec<String> = mirrors.iter().map(|m| m.to_string()).collect();
        MirrorPool::new(&mirrors, Duration::from_secs(60))
    }

    #[test]
    fn test_new_normalizes_mirrors() {
        let pool = pool(&["https://a.net/", "https://a.net", " ", "https://b.net"]);
        assert_eq!(pool.available(), ["https://a.net", "https://b.net"]);
    }

    #[tokio::test]
    async fn test_select_empty_pool_fails() {
        let mut pool = pool(&[]);
        assert!(matches!(pool.select().await, Err(AppError::NoMirrors)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_mirror_is_skipped_until_expiry() {
        let mut pool = pool(&["A", "B"]);
        pool.mark_rate_limited("A", 5);

        for _ in 0..50 {
            assert_eq!(pool.select().await.unwrap(), "B");
        }

        tokio::time::advance(Duration::from_secs(5)).await;

        let mut saw_a = false;
        for _ in 0..200 {
            if pool.select().await.unwrap() == "A" {
                saw_a = true;
                break;
            }
        }
        assert!(saw_a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_waits_for_soonest_penalty() {
        let mut pool = pool(&["A", "B"]);
        pool.mark_rate_limited("A", 5);
        pool.mark_rate_limited("B", 30);

        let start = Instant::now();
        let mirror = pool.select().await.unwrap();

        assert_eq!(mirror, "A");
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_resets_when_wait_too_long() {
        let mut pool = pool(&["A", "B"]);
        pool.mark_rate_limited("A", 120);
        pool.mark_rate_limited("B", 300);

        let start = Instant::now();
        let mirror = pool.select().await.unwrap();

        assert!(mirror == "A" || mirror == "B");
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(pool.available().len(), 2);
    }

    #[tokio::test]
    async fn test_select_resets_when_all_removed() {
        let mut pool = pool(&["A", "B"]);
        pool.remove("A");
        pool.remove("B");
        assert!(pool.available().is_empty());

        let mirror = pool.select().await.unwrap();
        assert!(mirror == "A" || mirror == "B");
        assert_eq!(pool.available().len(), 2);
    }

    #[test]
    fn test_removed_mirror_not_restored_on_expiry() {
        let mut pool = pool(&["A", "B"]);
        let now = Instant::now();
        pool.mark_rate_limited("A", 1);
        pool.remove("A");

        let later = now + Duration::from_secs(2);
        assert_eq!(pool.state(later), PoolState::Available("B".into()));
        assert_eq!(pool.available(), ["B"]);
    }

    #[test]
    fn test_state_reports_wait() {
        let mut pool = pool(&["A"]);
        let now = Instant::now();
        pool.mark_rate_limited("A", 10);

        match pool.state(now) {
            PoolState::Wait(wait) => {
                assert!(wait >= Duration::from_secs(10));
                assert!(wait < Duration::from_secs(11));
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }
}
