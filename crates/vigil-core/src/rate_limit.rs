//! Per-source-IP request rate tracking.
//!
//! Fixed-window counters keyed by source IP, classified into severity tiers
//! against a configured per-minute threshold. The map is bounded: entries
//! idle past their TTL are evicted, and a hard cap on tracked IPs evicts the
//! idlest entry when reached.

use crate::config::RateLimitConfig;
use crate::types::Severity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one rate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    pub is_exceeded: bool,
    /// Tier when exceeded: Medium above 1x, High above 2x, Critical above 3x.
    pub severity: Option<Severity>,
    pub request_count: u32,
    pub window: Duration,
}

struct WindowState {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Tracks request volume per source IP over a fixed window.
pub struct RateTracker {
    config: RateLimitConfig,
    windows: RwLock<HashMap<String, WindowState>>,
    exceeded_total: AtomicU64,
    evictions: AtomicU64,
}

impl RateTracker {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            exceeded_total: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Count one request from `source_ip` and classify the current window.
    pub fn check(&self, source_ip: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.write();

        if windows.len() >= self.config.max_tracked_ips && !windows.contains_key(source_ip) {
            self.evict_locked(&mut windows, now);
        }

        let state = windows
            .entry(source_ip.to_string())
            .or_insert_with(|| WindowState {
                count: 0,
                window_start: now,
                last_seen: now,
            });

        if now.duration_since(state.window_start) > self.config.window {
            state.count = 1;
            state.window_start = now;
        } else {
            state.count += 1;
        }
        state.last_seen = now;
        let count = state.count;
        drop(windows);

        let threshold = self.config.requests_per_minute;
        let severity = if count > threshold.saturating_mul(3) {
            Some(Severity::Critical)
        } else if count > threshold.saturating_mul(2) {
            Some(Severity::High)
        } else if count > threshold {
            Some(Severity::Medium)
        } else {
            None
        };

        if let Some(severity) = severity {
            self.exceeded_total.fetch_add(1, Ordering::Relaxed);
            warn!(
                source_ip,
                count, threshold, severity = severity.as_str(), "request rate exceeded"
            );
        }

        RateDecision {
            is_exceeded: severity.is_some(),
            severity,
            request_count: count,
            window: self.config.window,
        }
    }

    /// Evict entries idle past the TTL. Called by the maintenance loop;
    /// also runs inline when the map hits its cap.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.idle_ttl;
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, state| now.duration_since(state.last_seen) <= ttl);
        let evicted = before - windows.len();
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, remaining = windows.len(), "evicted idle rate windows");
        }
        evicted
    }

    /// TTL sweep under the write lock; falls back to dropping the idlest
    /// entry when everything is still fresh, so the cap always holds.
    fn evict_locked(&self, windows: &mut HashMap<String, WindowState>, now: Instant) {
        let ttl = self.config.idle_ttl;
        let before = windows.len();
        windows.retain(|_, state| now.duration_since(state.last_seen) <= ttl);

        if windows.len() >= self.config.max_tracked_ips {
            if let Some(idlest) = windows
                .iter()
                .min_by_key(|(_, state)| state.last_seen)
                .map(|(ip, _)| ip.clone())
            {
                windows.remove(&idlest);
            }
        }

        let evicted = before.saturating_sub(windows.len());
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    pub fn tracked_ips(&self) -> usize {
        self.windows.read().len()
    }

    pub fn stats(&self) -> RateTrackerStats {
        RateTrackerStats {
            tracked_ips: self.tracked_ips(),
            exceeded_total: self.exceeded_total.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTrackerStats {
    pub tracked_ips: usize,
    pub exceeded_total: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(threshold: u32) -> RateTracker {
        RateTracker::new(RateLimitConfig {
            requests_per_minute: threshold,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn under_threshold_is_not_exceeded() {
        let tracker = tracker_with(60);
        for _ in 0..60 {
            let decision = tracker.check("198.51.100.1");
            assert!(!decision.is_exceeded);
        }
    }

    #[test]
    fn severity_tiers_follow_multiples() {
        let tracker = tracker_with(60);
        let mut last = None;
        for _ in 0..61 {
            last = Some(tracker.check("198.51.100.2"));
        }
        assert_eq!(last.clone().unwrap().severity, Some(Severity::Medium));

        for _ in 61..121 {
            last = Some(tracker.check("198.51.100.2"));
        }
        assert_eq!(last.clone().unwrap().severity, Some(Severity::High));

        for _ in 121..181 {
            last = Some(tracker.check("198.51.100.2"));
        }
        let decision = last.unwrap();
        assert!(decision.is_exceeded);
        assert_eq!(decision.severity, Some(Severity::Critical));
        assert_eq!(decision.request_count, 181);
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let tracker = RateTracker::new(RateLimitConfig {
            requests_per_minute: 2,
            window: Duration::from_millis(40),
            ..RateLimitConfig::default()
        });
        for _ in 0..3 {
            tracker.check("203.0.113.5");
        }
        assert!(tracker.check("203.0.113.5").is_exceeded);

        std::thread::sleep(Duration::from_millis(60));
        let decision = tracker.check("203.0.113.5");
        assert_eq!(decision.request_count, 1);
        assert!(!decision.is_exceeded);
    }

    #[test]
    fn map_never_grows_past_the_cap() {
        let tracker = RateTracker::new(RateLimitConfig {
            max_tracked_ips: 3,
            ..RateLimitConfig::default()
        });
        for i in 0..10 {
            tracker.check(&format!("10.0.0.{}", i));
        }
        assert!(tracker.tracked_ips() <= 3);
        assert!(tracker.stats().evictions > 0);
    }

    #[test]
    fn idle_entries_are_evicted() {
        let tracker = RateTracker::new(RateLimitConfig {
            idle_ttl: Duration::from_millis(20),
            ..RateLimitConfig::default()
        });
        tracker.check("10.1.0.1");
        tracker.check("10.1.0.2");
        std::thread::sleep(Duration::from_millis(40));
        let evicted = tracker.evict_idle();
        assert_eq!(evicted, 2);
        assert_eq!(tracker.tracked_ips(), 0);
    }

    #[test]
    fn distinct_ips_are_tracked_separately() {
        let tracker = tracker_with(2);
        for _ in 0..3 {
            tracker.check("10.2.0.1");
        }
        assert!(tracker.check("10.2.0.1").is_exceeded);
        assert!(!tracker.check("10.2.0.2").is_exceeded);
    }
}
