//! Risk aggregation over the independent threat signals.
//!
//! Sequentially consults threat intelligence, the rate tracker, the
//! pattern matcher, the behavioral analyzer (authenticated actors only),
//! and the geo/temporal heuristic, summing risk points per
//! `ScoringConfig`. Accumulation across pattern matches is deliberately
//! unbounded before the final cap: simultaneous attack signatures
//! compound.

use crate::audit::AuditRecorder;
use crate::behavior::BehaviorAnalyzer;
use crate::config::ScoringConfig;
use crate::errors::Result;
use crate::patterns::PatternMatcher;
use crate::rate_limit::RateTracker;
use crate::request::RequestDescriptor;
use crate::threat_intel::ThreatIntelStore;
use crate::types::{
    DetectedThreat, RecommendedAction, SecurityEvent, SecurityEventKind, Severity,
    ThreatDetectionResult, ThreatLevel, ThreatType,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

const INTEL_CONFIDENCE: u8 = 90;
const RATE_CONFIDENCE: u8 = 75;
const GEO_CONFIDENCE: u8 = 65;

/// Geographic/temporal source heuristics.
///
/// Tor-exit and VPN detection are wired into scoring but currently always
/// answer `false` pending an external reputation feed.
pub struct GeoIntelligence;

impl GeoIntelligence {
    pub fn new() -> Self {
        Self
    }

    pub fn is_tor_exit(&self, _ip: &str) -> bool {
        false
    }

    pub fn is_vpn(&self, _ip: &str) -> bool {
        false
    }
}

impl Default for GeoIntelligence {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines detector outputs into a single per-request verdict.
pub struct ThreatAggregator {
    scoring: ScoringConfig,
    patterns: PatternMatcher,
    rate: Arc<RateTracker>,
    behavior: BehaviorAnalyzer,
    intel: Arc<ThreatIntelStore>,
    geo: GeoIntelligence,
    audit: Arc<AuditRecorder>,
}

impl ThreatAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scoring: ScoringConfig,
        patterns: PatternMatcher,
        rate: Arc<RateTracker>,
        behavior: BehaviorAnalyzer,
        intel: Arc<ThreatIntelStore>,
        geo: GeoIntelligence,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            scoring,
            patterns,
            rate,
            behavior,
            intel,
            geo,
            audit,
        }
    }

    /// Analyze one request. The only error is a malformed descriptor;
    /// every downstream failure is contained.
    pub fn analyze_request(&self, request: &RequestDescriptor) -> Result<ThreatDetectionResult> {
        request.validate()?;

        let ip = request.source_ip.as_str();
        let mut threats: Vec<DetectedThreat> = Vec::new();
        let mut score: u32 = 0;

        // Threat intelligence: exact match against the curated list.
        if let Some(entry) = self.intel.observe(ip) {
            score += u32::from(match entry.severity {
                Severity::Critical => self.scoring.intel_critical,
                Severity::High => self.scoring.intel_high,
                _ => self.scoring.intel_medium,
            });
            threats.push(
                DetectedThreat::new(
                    ThreatType::KnownMaliciousIp,
                    entry.severity,
                    "source IP is on the threat-intelligence list",
                    INTEL_CONFIDENCE,
                )
                .with_evidence("source", entry.source.clone())
                .with_evidence("occurrences", entry.occurrences.to_string()),
            );
        }

        // Request volume.
        let rate = self.rate.check(ip);
        if rate.is_exceeded {
            score += u32::from(self.scoring.rate_exceeded);
            threats.push(
                DetectedThreat::new(
                    ThreatType::ExcessiveRequestRate,
                    rate.severity.unwrap_or(Severity::Medium),
                    "request rate exceeded for source IP",
                    RATE_CONFIDENCE,
                )
                .with_evidence("request_count", rate.request_count.to_string())
                .with_evidence("window_secs", rate.window.as_secs().to_string()),
            );
        }

        // Attack signatures; each match compounds the score.
        for threat in self
            .patterns
            .detect(&request.path, &request.body, request.user_agent())
        {
            score += u32::from(match threat.severity {
                Severity::Critical => self.scoring.pattern_critical,
                Severity::High => self.scoring.pattern_high,
                _ => self.scoring.pattern_medium,
            });
            threats.push(threat);
        }

        // Behavioral anomalies, only when the request carries an actor.
        if let Some(ref actor_id) = request.actor_id {
            for threat in self.behavior.analyze(actor_id, Utc::now()) {
                score += u32::from(self.scoring.behavior_anomaly);
                threats.push(threat);
            }
        }

        // Geo/temporal heuristics (stubbed pending an external feed).
        if self.geo.is_tor_exit(ip) {
            score += u32::from(self.scoring.tor_exit);
            threats.push(DetectedThreat::new(
                ThreatType::TorExitNode,
                Severity::High,
                "request originates from a Tor exit node",
                GEO_CONFIDENCE,
            ));
        }
        if self.geo.is_vpn(ip) {
            score += u32::from(self.scoring.vpn_source);
            threats.push(DetectedThreat::new(
                ThreatType::VpnSource,
                Severity::Medium,
                "request originates from a known VPN range",
                GEO_CONFIDENCE,
            ));
        }

        let risk_score = score.min(100) as u8;
        let threat_level = self.scoring.level_for(risk_score);

        // Any individual critical threat forces a block regardless of the
        // aggregate score.
        let has_critical = threats.iter().any(|t| t.severity == Severity::Critical);
        let recommended_action = if has_critical {
            RecommendedAction::Block
        } else {
            match threat_level {
                ThreatLevel::Critical => RecommendedAction::Block,
                ThreatLevel::High => RecommendedAction::Challenge,
                ThreatLevel::Medium => RecommendedAction::Monitor,
                _ => RecommendedAction::Allow,
            }
        };

        // Record maliciousness in the curated list, and transition the IP
        // to blocked on a critical aggregate.
        if !threats.is_empty() && (threat_level >= ThreatLevel::High || has_critical) {
            if let Some(worst) = threats.iter().max_by_key(|t| t.severity) {
                self.intel
                    .record_sighting(ip, worst.threat_type, worst.severity, "aggregator");
            }
        }
        if threat_level == ThreatLevel::Critical && !self.intel.is_blocked(ip) {
            self.intel.block(ip, None);
            self.audit.record(
                SecurityEvent::new(SecurityEventKind::IpBlocked, Severity::Critical, "auto_block")
                    .source_ip(ip)
                    .detail("risk_score", risk_score.to_string()),
            );
            warn!(ip, risk_score, "source IP auto-blocked on critical aggregate threat");
        }

        let is_blocked =
            recommended_action == RecommendedAction::Block || self.intel.is_blocked(ip);

        // Fire-and-forget audit of the detection; recording never affects
        // the returned result.
        if !threats.is_empty() {
            let worst = threats
                .iter()
                .map(|t| t.severity)
                .max()
                .unwrap_or(Severity::Low);
            let mut event = SecurityEvent::new(
                SecurityEventKind::ThreatDetection,
                worst,
                "request_analysis",
            )
            .source_ip(ip)
            .resource(request.path.clone())
            .detail("risk_score", risk_score.to_string())
            .detail("threat_count", threats.len().to_string())
            .detail("action", format!("{:?}", recommended_action));
            if let Some(ref actor) = request.actor_id {
                event = event.actor(actor.clone());
            }
            if let Some(ref session) = request.session_id {
                event = event.session(session.clone());
            }
            if is_blocked {
                event = event.failed();
            }
            self.audit.record(event);
        } else {
            debug!(ip, "request analyzed clean");
        }

        Ok(ThreatDetectionResult {
            is_blocked,
            threat_level,
            detected_threats: threats,
            risk_score,
            recommended_action,
        })
    }

    pub fn rate_tracker(&self) -> &Arc<RateTracker> {
        &self.rate
    }
}
