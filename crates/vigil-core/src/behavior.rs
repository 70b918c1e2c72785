//! Behavioral anomaly detection for authenticated actors.
//!
//! Compares an actor's current access time and volume against their
//! trailing seven-day history in the audit trail. Below the minimum
//! history size no signal is produced. Baselines are cached per actor in
//! a bounded, TTL-evicted map so the seven-day scan does not run on every
//! request.

use crate::audit::{AuditRecorder, EventFilter};
use crate::config::BehaviorConfig;
use crate::types::{DetectedThreat, SecurityEventKind, Severity, ThreatType};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Confidence for the unusual-access-time heuristic.
const ACCESS_TIME_CONFIDENCE: u8 = 70;
/// Confidence for the unusual-volume heuristic.
const VOLUME_CONFIDENCE: u8 = 80;

const HOURS_PER_WEEK: f64 = 7.0 * 24.0;

struct CachedBaseline {
    computed_at: Instant,
    hour_buckets: [u64; 24],
    total: u64,
}

/// Flags statistical anomalies in an authenticated actor's access pattern.
pub struct BehaviorAnalyzer {
    config: BehaviorConfig,
    audit: Arc<AuditRecorder>,
    baselines: RwLock<HashMap<String, CachedBaseline>>,
}

impl BehaviorAnalyzer {
    pub fn new(config: BehaviorConfig, audit: Arc<AuditRecorder>) -> Self {
        Self {
            config,
            audit,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Analyze one request from `actor_id` arriving at `now`.
    pub fn analyze(&self, actor_id: &str, now: DateTime<Utc>) -> Vec<DetectedThreat> {
        let baseline = self.baseline_for(actor_id, now);
        if baseline.total < self.config.min_history_events as u64 {
            debug!(actor_id, total = baseline.total, "not enough history for behavioral analysis");
            return Vec::new();
        }

        let mut threats = Vec::new();

        // Unusual access time: the current hour's share of historical
        // activity is far below a uniform distribution.
        let current_hour = now.hour() as usize;
        let bucket = baseline.hour_buckets[current_hour];
        let uniform_share = baseline.total as f64 / 24.0;
        if baseline.total > self.config.rare_hour_min_events as u64
            && (bucket as f64) < self.config.rare_hour_fraction * uniform_share
        {
            threats.push(
                DetectedThreat::new(
                    ThreatType::UnusualAccessTime,
                    Severity::Medium,
                    "access at an hour rarely used by this account",
                    ACCESS_TIME_CONFIDENCE,
                )
                .with_evidence("hour", current_hour.to_string())
                .with_evidence("hour_events", bucket.to_string())
                .with_evidence("total_events", baseline.total.to_string()),
            );
        }

        // Unusual volume: last hour far above the weekly hourly average.
        let hourly_average = baseline.total as f64 / HOURS_PER_WEEK;
        let last_hour = self.recent_event_count(actor_id, now);
        if last_hour as f64 > self.config.volume_multiplier * hourly_average {
            threats.push(
                DetectedThreat::new(
                    ThreatType::UnusualAccessVolume,
                    Severity::High,
                    "request volume far above this account's hourly average",
                    VOLUME_CONFIDENCE,
                )
                .with_evidence("last_hour", last_hour.to_string())
                .with_evidence("hourly_average", format!("{:.2}", hourly_average)),
            );
        }

        threats
    }

    fn baseline_for(&self, actor_id: &str, now: DateTime<Utc>) -> CachedBaselineView {
        {
            let baselines = self.baselines.read();
            if let Some(cached) = baselines.get(actor_id) {
                if cached.computed_at.elapsed() <= self.config.baseline_ttl {
                    return CachedBaselineView {
                        hour_buckets: cached.hour_buckets,
                        total: cached.total,
                    };
                }
            }
        }

        let lookback = ChronoDuration::from_std(self.config.lookback)
            .unwrap_or_else(|_| ChronoDuration::days(7));
        let history = self.audit.query(&EventFilter {
            actor_id: Some(actor_id.to_string()),
            kinds: Some(vec![SecurityEventKind::RequestActivity]),
            start: Some(now - lookback),
            end: Some(now),
            ..EventFilter::default()
        });

        let mut hour_buckets = [0u64; 24];
        for event in &history {
            hour_buckets[event.timestamp.hour() as usize] += 1;
        }
        let total = history.len() as u64;

        let mut baselines = self.baselines.write();
        if baselines.len() >= self.config.baseline_cache_max
            && !baselines.contains_key(actor_id)
        {
            // TTL sweep first, oldest entry as a fallback, so the cache
            // stays bounded even under constant churn.
            let ttl = self.config.baseline_ttl;
            baselines.retain(|_, b| b.computed_at.elapsed() <= ttl);
            if baselines.len() >= self.config.baseline_cache_max {
                if let Some(oldest) = baselines
                    .iter()
                    .min_by_key(|(_, b)| b.computed_at)
                    .map(|(actor, _)| actor.clone())
                {
                    baselines.remove(&oldest);
                }
            }
        }
        baselines.insert(
            actor_id.to_string(),
            CachedBaseline {
                computed_at: Instant::now(),
                hour_buckets,
                total,
            },
        );

        CachedBaselineView { hour_buckets, total }
    }

    fn recent_event_count(&self, actor_id: &str, now: DateTime<Utc>) -> usize {
        self.audit
            .query(&EventFilter {
                actor_id: Some(actor_id.to_string()),
                kinds: Some(vec![SecurityEventKind::RequestActivity]),
                start: Some(now - ChronoDuration::hours(1)),
                end: Some(now),
                ..EventFilter::default()
            })
            .len()
    }

    pub fn cached_actors(&self) -> usize {
        self.baselines.read().len()
    }
}

struct CachedBaselineView {
    hour_buckets: [u64; 24],
    total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::types::SecurityEvent;

    fn setup() -> (Arc<AuditRecorder>, BehaviorAnalyzer) {
        let audit = Arc::new(AuditRecorder::with_sink(&AuditConfig::default(), None));
        let analyzer = BehaviorAnalyzer::new(BehaviorConfig::default(), audit.clone());
        (audit, analyzer)
    }

    fn seed(audit: &AuditRecorder, actor: &str, at: DateTime<Utc>) {
        audit.record(
            SecurityEvent::new(SecurityEventKind::RequestActivity, Severity::Info, "request")
                .actor(actor)
                .at(at),
        );
    }

    #[test]
    fn too_little_history_produces_no_signal() {
        let (audit, analyzer) = setup();
        let now = Utc::now();
        for i in 0..9 {
            seed(&audit, "sparse", now - ChronoDuration::hours(i));
        }
        assert!(analyzer.analyze("sparse", now).is_empty());
    }

    #[test]
    fn access_at_a_rare_hour_is_flagged() {
        let (audit, analyzer) = setup();
        let now = Utc::now();
        // 60 events, every one of them 12 hours offset from the current
        // hour, spread across the week.
        let usual = now - ChronoDuration::hours(12);
        for day in 0..6 {
            for _ in 0..10 {
                seed(&audit, "clerk", usual - ChronoDuration::days(day));
            }
        }

        let threats = analyzer.analyze("clerk", now);
        let time_flags: Vec<_> = threats
            .iter()
            .filter(|t| t.threat_type == ThreatType::UnusualAccessTime)
            .collect();
        assert_eq!(time_flags.len(), 1);
        assert_eq!(time_flags[0].severity, Severity::Medium);
        assert_eq!(time_flags[0].confidence, 70);
    }

    #[test]
    fn rare_hour_needs_a_deep_history() {
        let (audit, analyzer) = setup();
        let now = Utc::now();
        // Only 20 historical events: below the 50-event gate, so the
        // rare-hour flag stays quiet even though the bucket is empty.
        let usual = now - ChronoDuration::hours(12);
        for i in 0..20 {
            seed(&audit, "casual", usual - ChronoDuration::hours(24 * (i % 6)));
        }

        let threats = analyzer.analyze("casual", now);
        assert!(threats
            .iter()
            .all(|t| t.threat_type != ThreatType::UnusualAccessTime));
    }

    #[test]
    fn volume_burst_is_flagged_high() {
        let (audit, analyzer) = setup();
        let now = Utc::now();
        // Sparse week: 20 events, none in the last hour.
        for i in 0..20 {
            seed(&audit, "burster", now - ChronoDuration::hours(3 + i * 8));
        }
        // Then a burst of 5 in the last hour: far above 5x the weekly
        // hourly average of ~0.15.
        for i in 0..5 {
            seed(&audit, "burster", now - ChronoDuration::minutes(i * 5));
        }

        let threats = analyzer.analyze("burster", now);
        let volume_flags: Vec<_> = threats
            .iter()
            .filter(|t| t.threat_type == ThreatType::UnusualAccessVolume)
            .collect();
        assert_eq!(volume_flags.len(), 1);
        assert_eq!(volume_flags[0].severity, Severity::High);
        assert_eq!(volume_flags[0].confidence, 80);
    }

    #[test]
    fn baseline_cache_stays_bounded() {
        let audit = Arc::new(AuditRecorder::with_sink(&AuditConfig::default(), None));
        let analyzer = BehaviorAnalyzer::new(
            BehaviorConfig {
                baseline_cache_max: 5,
                ..BehaviorConfig::default()
            },
            audit.clone(),
        );
        let now = Utc::now();
        for i in 0..20 {
            analyzer.analyze(&format!("actor-{}", i), now);
        }
        assert!(analyzer.cached_actors() <= 5);
    }
}
