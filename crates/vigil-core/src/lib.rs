//! vigil-core: request threat scoring, audit, and alerting for the Civita
//! civic-engagement platform.
//!
//! Each inbound request is analyzed synchronously by the pattern matcher,
//! rate tracker, and (for authenticated actors) behavioral analyzer; the
//! aggregator combines those signals with threat-intelligence and
//! geo/temporal lookups into a risk score and an
//! allow/monitor/challenge/block decision, records the detection in the
//! append-only audit trail, and raises alerts for high-risk decisions.

pub mod aggregator;
pub mod alerts;
pub mod audit;
pub mod behavior;
pub mod compliance;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod monitor;
pub mod patterns;
pub mod rate_limit;
pub mod request;
pub mod threat_intel;
pub mod types;

pub use aggregator::{GeoIntelligence, ThreatAggregator};
pub use alerts::{
    AlertManager, AlertStatus, AlertType, LogChannel, NewAlert, NotificationChannel, SecurityAlert,
};
pub use audit::{AuditRecorder, AuditReport, EventFilter, EventSink, JsonlSink};
pub use behavior::BehaviorAnalyzer;
pub use compliance::{CheckStatus, ComplianceCheck, ComplianceChecker, ComplianceRule};
pub use config::MonitorConfig;
pub use dashboard::{Dashboard, DashboardOverview};
pub use errors::{Result, VigilError};
pub use monitor::{MaintenanceSummary, SecurityMonitor};
pub use patterns::PatternMatcher;
pub use rate_limit::{RateDecision, RateTracker};
pub use request::RequestDescriptor;
pub use threat_intel::{ThreatIntelStore, ThreatIntelligenceEntry};
pub use types::{
    DetectedThreat, RecommendedAction, SecurityEvent, SecurityEventKind, Severity,
    ThreatDetectionResult, ThreatLevel, ThreatType,
};
