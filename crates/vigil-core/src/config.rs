//! Configuration for the threat-scoring pipeline.
//!
//! Every scoring constant and threshold lives here rather than inline in the
//! detectors, so operators can tune the heuristics without touching control
//! flow. Defaults preserve the values the platform has run with in
//! production.

use crate::types::ThreatLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Risk points and level thresholds used by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Points per pattern-matched threat, by severity tier.
    pub pattern_medium: u8,
    pub pattern_high: u8,
    pub pattern_critical: u8,
    /// Points added when the rate tracker reports an exceeded window.
    pub rate_exceeded: u8,
    /// Points per threat-intelligence match, by entry severity.
    pub intel_medium: u8,
    pub intel_high: u8,
    pub intel_critical: u8,
    /// Points per behavioral anomaly flagged for an authenticated actor.
    pub behavior_anomaly: u8,
    /// Points for Tor-exit / VPN source detection.
    pub tor_exit: u8,
    pub vpn_source: u8,
    /// Risk-score lower bounds for each threat level.
    pub level_low: u8,
    pub level_medium: u8,
    pub level_high: u8,
    pub level_critical: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pattern_medium: 15,
            pattern_high: 25,
            pattern_critical: 40,
            rate_exceeded: 25,
            intel_medium: 30,
            intel_high: 40,
            intel_critical: 50,
            behavior_anomaly: 20,
            tor_exit: 20,
            vpn_source: 20,
            level_low: 20,
            level_medium: 40,
            level_high: 70,
            level_critical: 85,
        }
    }
}

impl ScoringConfig {
    /// Map an aggregate risk score to its discrete level.
    pub fn level_for(&self, score: u8) -> ThreatLevel {
        if score >= self.level_critical {
            ThreatLevel::Critical
        } else if score >= self.level_high {
            ThreatLevel::High
        } else if score >= self.level_medium {
            ThreatLevel::Medium
        } else if score >= self.level_low {
            ThreatLevel::Low
        } else {
            ThreatLevel::None
        }
    }
}

/// Per-IP fixed-window rate tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window before the medium tier triggers.
    pub requests_per_minute: u32,
    /// Window length; counters reset when it elapses.
    pub window: Duration,
    /// Hard cap on tracked IPs. Exceeding it evicts the idlest entries.
    pub max_tracked_ips: usize,
    /// Entries idle longer than this are evicted.
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            window: Duration::from_secs(60),
            max_tracked_ips: 100_000,
            idle_ttl: Duration::from_secs(600),
        }
    }
}

/// Behavioral anomaly heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Minimum historical events before any signal is produced.
    pub min_history_events: usize,
    /// Trailing history window.
    pub lookback: Duration,
    /// An hour bucket below this fraction of the uniform share is unusual.
    pub rare_hour_fraction: f64,
    /// Unusual-hour flag additionally requires this much total history.
    pub rare_hour_min_events: usize,
    /// Last-hour volume above this multiple of the hourly average is unusual.
    pub volume_multiplier: f64,
    /// Bounded baseline cache: max actors and entry TTL.
    pub baseline_cache_max: usize,
    pub baseline_ttl: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            min_history_events: 10,
            lookback: Duration::from_secs(7 * 24 * 3600),
            rare_hour_fraction: 0.10,
            rare_hour_min_events: 50,
            volume_multiplier: 5.0,
            baseline_cache_max: 10_000,
            baseline_ttl: Duration::from_secs(300),
        }
    }
}

/// Pattern-matcher size heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// URLs longer than this are flagged as anomalously large.
    pub max_url_length: usize,
    /// Request bodies larger than this are flagged as anomalously large.
    pub max_body_bytes: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_url_length: 2000,
            max_body_bytes: 100_000,
        }
    }
}

/// Alert lifecycle and escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Unacknowledged critical alerts escalate after this window.
    pub escalation_window: Duration,
    /// Minimum threat level at which the monitor raises an alert.
    pub alert_level: ThreatLevel,
    /// Retained alert history cap.
    pub max_history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            escalation_window: Duration::from_secs(3600),
            alert_level: ThreatLevel::High,
            max_history: 10_000,
        }
    }
}

/// Audit recorder storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// In-memory event buffer size.
    pub buffer_size: usize,
    /// Optional JSONL sink path; `None` keeps events in memory only.
    pub log_path: Option<std::path::PathBuf>,
    /// Sink rotation threshold in bytes.
    pub rotation_bytes: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100_000,
            log_path: None,
            rotation_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Top-level configuration composed by the monitor facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub scoring: ScoringConfig,
    pub rate_limit: RateLimitConfig,
    pub behavior: BehaviorConfig,
    pub patterns: PatternConfig,
    pub alerts: AlertConfig,
    pub audit: AuditConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_boundaries() {
        let config = ScoringConfig::default();
        assert_eq!(config.level_for(85), ThreatLevel::Critical);
        assert_eq!(config.level_for(84), ThreatLevel::High);
        assert_eq!(config.level_for(70), ThreatLevel::High);
        assert_eq!(config.level_for(69), ThreatLevel::Medium);
        assert_eq!(config.level_for(40), ThreatLevel::Medium);
        assert_eq!(config.level_for(39), ThreatLevel::Low);
        assert_eq!(config.level_for(20), ThreatLevel::Low);
        assert_eq!(config.level_for(19), ThreatLevel::None);
        assert_eq!(config.level_for(0), ThreatLevel::None);
    }

    #[test]
    fn defaults_preserve_production_constants() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.pattern_critical, 40);
        assert_eq!(scoring.rate_exceeded, 25);
        assert_eq!(scoring.behavior_anomaly, 20);

        let rate = RateLimitConfig::default();
        assert_eq!(rate.requests_per_minute, 60);
        assert_eq!(rate.window, Duration::from_secs(60));
    }
}
