//! Shared data model for the threat-scoring pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity attached to events, threats, and alerts.
///
/// Ordered so that `Severity::High > Severity::Medium` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Discrete risk bucket derived from the 0-100 aggregate score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// What the caller should do with the analyzed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Allow,
    Monitor,
    Challenge,
    Block,
}

/// Classification of an individual detected threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SqlInjection,
    CrossSiteScripting,
    PathTraversal,
    CommandInjection,
    LdapInjection,
    AnomalousSize,
    ExcessiveRequestRate,
    KnownMaliciousIp,
    UnusualAccessTime,
    UnusualAccessVolume,
    TorExitNode,
    VpnSource,
}

/// A single threat signal produced by one of the detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedThreat {
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub description: String,
    /// Opaque supporting evidence (matched rule, counts, offsets).
    pub evidence: HashMap<String, String>,
    /// Fixed per-detector confidence, 0-100.
    pub confidence: u8,
}

impl DetectedThreat {
    pub fn new(
        threat_type: ThreatType,
        severity: Severity,
        description: impl Into<String>,
        confidence: u8,
    ) -> Self {
        Self {
            threat_type,
            severity,
            description: description.into(),
            evidence: HashMap::new(),
            confidence,
        }
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }
}

/// Per-request verdict computed by the aggregator and consumed immediately
/// by the caller. Not persisted as its own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatDetectionResult {
    pub is_blocked: bool,
    pub threat_level: ThreatLevel,
    pub detected_threats: Vec<DetectedThreat>,
    pub risk_score: u8,
    pub recommended_action: RecommendedAction,
}

/// Kind of security-relevant event recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RequestActivity,
    ThreatDetection,
    AuthFailure,
    AccessDenied,
    AdminAction,
    AlertLifecycle,
    ComplianceRun,
    IpBlocked,
    IpUnblocked,
}

/// Immutable audit record. Created by every component on every analyzed
/// request or administrative action; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub actor_id: Option<String>,
    pub source_ip: Option<String>,
    pub resource: Option<String>,
    pub action: String,
    pub success: bool,
    pub details: HashMap<String, String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, severity: Severity, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            actor_id: None,
            source_ip: None,
            resource: None,
            action: action.into(),
            success: true,
            details: HashMap::new(),
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn event_builder_sets_fields() {
        let event = SecurityEvent::new(
            SecurityEventKind::ThreatDetection,
            Severity::High,
            "request_analysis",
        )
        .actor("user-42")
        .source_ip("203.0.113.9")
        .failed()
        .detail("risk_score", "72");

        assert_eq!(event.actor_id.as_deref(), Some("user-42"));
        assert_eq!(event.source_ip.as_deref(), Some("203.0.113.9"));
        assert!(!event.success);
        assert_eq!(event.details.get("risk_score").map(String::as_str), Some("72"));
    }

    #[test]
    fn threat_serialization_round_trip() {
        let threat = DetectedThreat::new(
            ThreatType::SqlInjection,
            Severity::Critical,
            "SQL injection signature matched",
            85,
        )
        .with_evidence("rule", "sql_injection");

        let json = serde_json::to_string(&threat).unwrap();
        assert!(json.contains("\"sql_injection\""));
        let parsed: DetectedThreat = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.threat_type, ThreatType::SqlInjection);
        assert_eq!(parsed.confidence, 85);
    }
}
