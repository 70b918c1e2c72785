//! Read-only operational projection for the admin dashboard.

use crate::alerts::{AlertManager, AlertStatus, SecurityAlert};
use crate::audit::AuditRecorder;
use crate::compliance::ComplianceChecker;
use crate::rate_limit::RateTracker;
use crate::threat_intel::ThreatIntelStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const RECENT_ALERT_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub generated_at: DateTime<Utc>,
    pub events_last_24h: u64,
    pub events_by_severity: HashMap<String, u64>,
    pub threat_detections_last_24h: u64,
    pub unique_source_ips_24h: usize,
    pub active_alerts: usize,
    pub escalated_alerts: usize,
    pub recent_alerts: Vec<SecurityAlert>,
    pub compliance_score: u8,
    pub blocked_ips: usize,
    pub tracked_ips: usize,
    pub recommendations: Vec<String>,
}

/// Aggregates the engine's read models into one overview. Holds no state
/// of its own.
pub struct Dashboard {
    audit: Arc<AuditRecorder>,
    alerts: Arc<AlertManager>,
    compliance: Arc<ComplianceChecker>,
    intel: Arc<ThreatIntelStore>,
    rate: Arc<RateTracker>,
}

impl Dashboard {
    pub fn new(
        audit: Arc<AuditRecorder>,
        alerts: Arc<AlertManager>,
        compliance: Arc<ComplianceChecker>,
        intel: Arc<ThreatIntelStore>,
        rate: Arc<RateTracker>,
    ) -> Self {
        Self {
            audit,
            alerts,
            compliance,
            intel,
            rate,
        }
    }

    pub fn overview(&self) -> DashboardOverview {
        let now = Utc::now();
        let report = self.audit.report(now - ChronoDuration::hours(24), now);
        let alert_stats = self.alerts.stats();
        let escalated = self.alerts.list(Some(AlertStatus::Escalated)).len();
        let compliance_score = self.compliance.score();
        let blocked_ips = self.intel.blocked_count();

        let mut recent_alerts = self.alerts.list(None);
        recent_alerts.truncate(RECENT_ALERT_LIMIT);

        let threat_detections = report
            .by_kind
            .get("ThreatDetection")
            .copied()
            .unwrap_or(0);

        let mut recommendations = Vec::new();
        if escalated > 0 {
            recommendations.push(format!(
                "{} escalated alert(s) await acknowledgment",
                escalated
            ));
        }
        if compliance_score < 70 {
            recommendations.push("address failing compliance checks".to_string());
        }
        if report.by_severity.get("critical").copied().unwrap_or(0) > 0 {
            recommendations.push("investigate critical threat detections from the last 24h".to_string());
        }
        if blocked_ips > 0 {
            recommendations.push(format!(
                "review {} blocked IP(s) for false positives",
                blocked_ips
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("no outstanding actions".to_string());
        }

        DashboardOverview {
            generated_at: now,
            events_last_24h: report.total_events,
            events_by_severity: report.by_severity,
            threat_detections_last_24h: threat_detections,
            unique_source_ips_24h: report.unique_ips,
            active_alerts: alert_stats.active,
            escalated_alerts: escalated,
            recent_alerts,
            compliance_score,
            blocked_ips,
            tracked_ips: self.rate.stats().tracked_ips,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertType, NewAlert};
    use crate::compliance::ComplianceContext;
    use crate::config::{AlertConfig, AuditConfig, RateLimitConfig};
    use crate::types::{SecurityEvent, SecurityEventKind, Severity};

    fn dashboard() -> (Dashboard, Arc<AuditRecorder>, Arc<AlertManager>) {
        let audit = Arc::new(AuditRecorder::with_sink(&AuditConfig::default(), None));
        let alerts = AlertManager::new(AlertConfig::default(), audit.clone());
        let intel = Arc::new(ThreatIntelStore::new());
        let compliance = Arc::new(ComplianceChecker::new(ComplianceContext {
            audit: audit.clone(),
            alerts: alerts.clone(),
            intel: intel.clone(),
        }));
        let rate = Arc::new(RateTracker::new(RateLimitConfig::default()));
        (
            Dashboard::new(audit.clone(), alerts.clone(), compliance, intel, rate),
            audit,
            alerts,
        )
    }

    #[test]
    fn overview_reflects_recent_events_and_alerts() {
        let (dashboard, audit, alerts) = dashboard();
        audit.record(
            SecurityEvent::new(SecurityEventKind::ThreatDetection, Severity::Critical, "x")
                .source_ip("203.0.113.9"),
        );
        alerts.create_alert(NewAlert {
            alert_type: AlertType::SecurityThreat,
            severity: Severity::High,
            title: "test".to_string(),
            message: "m".to_string(),
            source: "s".to_string(),
            metadata: HashMap::new(),
        });

        let overview = dashboard.overview();
        assert_eq!(overview.events_last_24h, 1);
        assert_eq!(overview.threat_detections_last_24h, 1);
        assert_eq!(overview.unique_source_ips_24h, 1);
        assert_eq!(overview.active_alerts, 1);
        assert_eq!(overview.recent_alerts.len(), 1);
        // Critical events in range drive a recommendation.
        assert!(overview
            .recommendations
            .iter()
            .any(|r| r.contains("critical")));
    }

    #[test]
    fn quiet_system_recommends_nothing() {
        let (dashboard, _, _) = dashboard();
        let overview = dashboard.overview();
        assert_eq!(overview.events_last_24h, 0);
        assert_eq!(overview.recommendations, vec!["no outstanding actions".to_string()]);
    }
}
