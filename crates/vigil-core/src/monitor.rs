//! Security monitor facade.
//!
//! Constructs and wires the detection, aggregation, alerting, audit, and
//! compliance components via explicit dependency composition; there are no
//! module-level globals, so tests build isolated instances freely.

use crate::aggregator::{GeoIntelligence, ThreatAggregator};
use crate::alerts::{AlertManager, AlertType, NewAlert, NotificationChannel, SecurityAlert};
use crate::audit::{AuditRecorder, AuditReport, EventFilter};
use crate::behavior::BehaviorAnalyzer;
use crate::compliance::{ComplianceChecker, ComplianceContext};
use crate::config::MonitorConfig;
use crate::dashboard::{Dashboard, DashboardOverview};
use crate::errors::Result;
use crate::patterns::PatternMatcher;
use crate::rate_limit::{RateTracker, RateTrackerStats};
use crate::request::RequestDescriptor;
use crate::threat_intel::{ThreatIntelStore, ThreatIntelligenceEntry};
use crate::types::{
    SecurityEvent, SecurityEventKind, Severity, ThreatDetectionResult, ThreatLevel, ThreatType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceSummary {
    pub rate_windows_evicted: usize,
    pub ip_blocks_expired: usize,
    pub compliance_checks_run: usize,
}

/// The engine's single entry point.
pub struct SecurityMonitor {
    config: MonitorConfig,
    aggregator: ThreatAggregator,
    alerts: Arc<AlertManager>,
    audit: Arc<AuditRecorder>,
    intel: Arc<ThreatIntelStore>,
    rate: Arc<RateTracker>,
    compliance: Arc<ComplianceChecker>,
    dashboard: Dashboard,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let audit = Arc::new(AuditRecorder::new(&config.audit)?);
        let intel = Arc::new(ThreatIntelStore::new());
        let rate = Arc::new(RateTracker::new(config.rate_limit.clone()));
        let alerts = AlertManager::new(config.alerts.clone(), audit.clone());

        let aggregator = ThreatAggregator::new(
            config.scoring.clone(),
            PatternMatcher::new(config.patterns.clone()),
            rate.clone(),
            BehaviorAnalyzer::new(config.behavior.clone(), audit.clone()),
            intel.clone(),
            GeoIntelligence::new(),
            audit.clone(),
        );

        let compliance = Arc::new(ComplianceChecker::new(ComplianceContext {
            audit: audit.clone(),
            alerts: alerts.clone(),
            intel: intel.clone(),
        }));

        let dashboard = Dashboard::new(
            audit.clone(),
            alerts.clone(),
            compliance.clone(),
            intel.clone(),
            rate.clone(),
        );

        Ok(Self {
            config,
            aggregator,
            alerts,
            audit,
            intel,
            rate,
            compliance,
            dashboard,
        })
    }

    /// Analyze one inbound request, record its activity in the audit
    /// trail, and raise an alert when the decision crosses the alert
    /// level. Runs inside a tokio runtime (alerting spawns tasks).
    pub fn analyze_request(&self, request: &RequestDescriptor) -> Result<ThreatDetectionResult> {
        let result = self.aggregator.analyze_request(request)?;

        // Request activity lands in the trail after analysis, so the
        // behavioral lookback reflects prior history only.
        let mut event = SecurityEvent::new(
            SecurityEventKind::RequestActivity,
            Severity::Info,
            request.method.clone(),
        )
        .source_ip(request.source_ip.clone())
        .resource(request.path.clone());
        if let Some(ref actor) = request.actor_id {
            event = event.actor(actor.clone());
        }
        if let Some(ref session) = request.session_id {
            event = event.session(session.clone());
        }
        if result.is_blocked {
            event = event.failed();
        }
        self.audit.record(event);

        if result.threat_level >= self.config.alerts.alert_level {
            self.raise_alert(request, &result);
        }

        Ok(result)
    }

    fn raise_alert(&self, request: &RequestDescriptor, result: &ThreatDetectionResult) {
        let severity = match result.threat_level {
            ThreatLevel::Critical => Severity::Critical,
            ThreatLevel::High => Severity::High,
            _ => Severity::Medium,
        };
        let behavioral_only = !result.detected_threats.is_empty()
            && result.detected_threats.iter().all(|t| {
                matches!(
                    t.threat_type,
                    ThreatType::UnusualAccessTime | ThreatType::UnusualAccessVolume
                )
            });
        let alert_type = if behavioral_only {
            AlertType::AnomalyDetected
        } else {
            AlertType::SecurityThreat
        };

        let mut alert = NewAlert {
            alert_type,
            severity,
            title: format!(
                "{:?} risk from {}",
                result.threat_level, request.source_ip
            ),
            message: format!(
                "risk score {} from {} threat signal(s); recommended action: {:?}",
                result.risk_score,
                result.detected_threats.len(),
                result.recommended_action
            ),
            source: "threat_aggregator".to_string(),
            metadata: Default::default(),
        };
        alert
            .metadata
            .insert("source_ip".to_string(), request.source_ip.clone());
        alert
            .metadata
            .insert("risk_score".to_string(), result.risk_score.to_string());
        if let Some(ref actor) = request.actor_id {
            alert.metadata.insert("actor_id".to_string(), actor.clone());
        }

        let id = self.alerts.create_alert(alert);
        info!(alert_id = %id, source_ip = %request.source_ip, "alert raised for high-risk request");
    }

    /// Periodic housekeeping: rate-map eviction, block expiry, due
    /// compliance checks. The library stays bounded without this loop;
    /// running it keeps the sweeps off the request path.
    pub fn maintain(&self) -> MaintenanceSummary {
        MaintenanceSummary {
            rate_windows_evicted: self.rate.evict_idle(),
            ip_blocks_expired: self.intel.sweep_expired(),
            compliance_checks_run: self.compliance.run_due(Utc::now()),
        }
    }

    /// Admin action: put an IP on the block list.
    pub fn block_ip(&self, ip: &str, until: Option<DateTime<Utc>>, admin: &str) {
        self.intel.block(ip, until);
        self.audit.record(
            SecurityEvent::new(SecurityEventKind::IpBlocked, Severity::High, "manual_block")
                .actor(admin)
                .source_ip(ip),
        );
    }

    /// Admin action: remove an IP from the block list.
    pub fn unblock_ip(&self, ip: &str, admin: &str) -> bool {
        let unblocked = self.intel.unblock(ip);
        if unblocked {
            self.audit.record(
                SecurityEvent::new(SecurityEventKind::IpUnblocked, Severity::Info, "manual_unblock")
                    .actor(admin)
                    .source_ip(ip),
            );
        }
        unblocked
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> Result<()> {
        self.alerts.acknowledge(id)
    }

    pub fn resolve_alert(&self, id: Uuid) -> Result<()> {
        self.alerts.resolve(id)
    }

    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.alerts.register_channel(channel);
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.list(None)
    }

    pub fn alert_manager(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn audit_events(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        self.audit.query(filter)
    }

    pub fn audit_report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AuditReport {
        self.audit.report(start, end)
    }

    pub fn audit(&self) -> &Arc<AuditRecorder> {
        &self.audit
    }

    pub fn intel_entry(&self, ip: &str) -> Option<ThreatIntelligenceEntry> {
        self.intel.get(ip)
    }

    pub fn intel(&self) -> &Arc<ThreatIntelStore> {
        &self.intel
    }

    pub fn compliance(&self) -> &Arc<ComplianceChecker> {
        &self.compliance
    }

    pub fn rate_stats(&self) -> RateTrackerStats {
        self.rate.stats()
    }

    pub fn dashboard(&self) -> DashboardOverview {
        self.dashboard.overview()
    }
}
