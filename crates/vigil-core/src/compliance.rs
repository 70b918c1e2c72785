//! Scheduled compliance checks.
//!
//! Each check is a named assertion over engine state with a fixed interval
//! class. `run_due` executes whatever is due and upserts the check table;
//! overlapping runs are skipped rather than queued since check work is not
//! idempotent by id.

use crate::alerts::{AlertManager, AlertStatus};
use crate::audit::AuditRecorder;
use crate::threat_intel::ThreatIntelStore;
use crate::types::{SecurityEvent, SecurityEventKind, Severity};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passing,
    Warning,
    Failing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInterval {
    Hourly,
    Daily,
    Weekly,
}

impl CheckInterval {
    fn period(&self) -> ChronoDuration {
        match self {
            CheckInterval::Hourly => ChronoDuration::hours(1),
            CheckInterval::Daily => ChronoDuration::days(1),
            CheckInterval::Weekly => ChronoDuration::weeks(1),
        }
    }
}

/// One row of the compliance check table, upserted per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub check_name: String,
    pub check_type: String,
    pub status: CheckStatus,
    pub findings: Vec<String>,
    pub remediation: String,
    pub priority: Severity,
    pub last_checked: DateTime<Utc>,
    pub next_check: DateTime<Utc>,
}

/// Result of one rule evaluation.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub findings: Vec<String>,
    pub remediation: String,
}

impl CheckOutcome {
    pub fn passing() -> Self {
        Self {
            status: CheckStatus::Passing,
            findings: Vec::new(),
            remediation: String::new(),
        }
    }
}

/// Engine state the rules assert over.
pub struct ComplianceContext {
    pub audit: Arc<AuditRecorder>,
    pub alerts: Arc<AlertManager>,
    pub intel: Arc<ThreatIntelStore>,
}

/// A named, scheduled assertion.
pub trait ComplianceRule: Send + Sync {
    fn name(&self) -> &str;
    fn check_type(&self) -> &str;
    fn interval(&self) -> CheckInterval;
    fn priority(&self) -> Severity;
    fn evaluate(&self, ctx: &ComplianceContext) -> CheckOutcome;
}

/// Audit trail health: recording must not be silently dropping events.
pub struct AuditIntegrityRule;

impl ComplianceRule for AuditIntegrityRule {
    fn name(&self) -> &str {
        "audit_trail_integrity"
    }

    fn check_type(&self) -> &str {
        "audit"
    }

    fn interval(&self) -> CheckInterval {
        CheckInterval::Daily
    }

    fn priority(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, ctx: &ComplianceContext) -> CheckOutcome {
        let stats = ctx.audit.stats();
        if stats.events_failed == 0 {
            return CheckOutcome::passing();
        }
        CheckOutcome {
            status: CheckStatus::Warning,
            findings: vec![format!(
                "{} of {} audit events failed durable write",
                stats.events_failed, stats.events_recorded
            )],
            remediation: "verify the audit sink path and disk capacity".to_string(),
        }
    }
}

/// Alert hygiene: a deep unhandled backlog means nobody is watching.
pub struct AlertBacklogRule {
    pub max_unhandled: usize,
}

impl Default for AlertBacklogRule {
    fn default() -> Self {
        Self { max_unhandled: 25 }
    }
}

impl ComplianceRule for AlertBacklogRule {
    fn name(&self) -> &str {
        "alert_backlog"
    }

    fn check_type(&self) -> &str {
        "alerting"
    }

    fn interval(&self) -> CheckInterval {
        CheckInterval::Hourly
    }

    fn priority(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, ctx: &ComplianceContext) -> CheckOutcome {
        let stats = ctx.alerts.stats();
        if stats.active <= self.max_unhandled {
            return CheckOutcome::passing();
        }
        CheckOutcome {
            status: CheckStatus::Failing,
            findings: vec![format!(
                "{} unhandled alerts (limit {})",
                stats.active, self.max_unhandled
            )],
            remediation: "triage the active alert queue".to_string(),
        }
    }
}

/// Escalation responsiveness: escalated alerts awaiting a human.
pub struct EscalationResponseRule;

impl ComplianceRule for EscalationResponseRule {
    fn name(&self) -> &str {
        "escalation_response"
    }

    fn check_type(&self) -> &str {
        "alerting"
    }

    fn interval(&self) -> CheckInterval {
        CheckInterval::Hourly
    }

    fn priority(&self) -> Severity {
        Severity::Critical
    }

    fn evaluate(&self, ctx: &ComplianceContext) -> CheckOutcome {
        let escalated = ctx.alerts.list(Some(AlertStatus::Escalated));
        if escalated.is_empty() {
            return CheckOutcome::passing();
        }
        CheckOutcome {
            status: CheckStatus::Warning,
            findings: escalated
                .iter()
                .map(|a| format!("escalated and unacknowledged: {}", a.title))
                .collect(),
            remediation: "acknowledge or resolve escalated alerts".to_string(),
        }
    }
}

/// Block-list hygiene: indefinite blocks accumulate stale entries.
pub struct BlockListHygieneRule {
    pub max_blocked: usize,
}

impl Default for BlockListHygieneRule {
    fn default() -> Self {
        Self { max_blocked: 500 }
    }
}

impl ComplianceRule for BlockListHygieneRule {
    fn name(&self) -> &str {
        "block_list_hygiene"
    }

    fn check_type(&self) -> &str {
        "threat_intel"
    }

    fn interval(&self) -> CheckInterval {
        CheckInterval::Weekly
    }

    fn priority(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &ComplianceContext) -> CheckOutcome {
        let blocked = ctx.intel.blocked_count();
        if blocked <= self.max_blocked {
            return CheckOutcome::passing();
        }
        CheckOutcome {
            status: CheckStatus::Warning,
            findings: vec![format!("{} IPs currently blocked", blocked)],
            remediation: "review the block list for stale indefinite entries".to_string(),
        }
    }
}

/// Runs the registered rules on their schedules and keeps the check table.
pub struct ComplianceChecker {
    rules: Vec<Box<dyn ComplianceRule>>,
    context: ComplianceContext,
    results: RwLock<HashMap<String, ComplianceCheck>>,
    running: AtomicBool,
}

impl ComplianceChecker {
    pub fn new(context: ComplianceContext) -> Self {
        Self {
            rules: vec![
                Box::new(AuditIntegrityRule),
                Box::new(AlertBacklogRule::default()),
                Box::new(EscalationResponseRule),
                Box::new(BlockListHygieneRule::default()),
            ],
            context,
            results: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_rules(context: ComplianceContext, rules: Vec<Box<dyn ComplianceRule>>) -> Self {
        Self {
            rules,
            context,
            results: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Execute every rule whose next_check has arrived. Overlapping runs
    /// are skipped: check work is not idempotent by id.
    pub fn run_due(&self, now: DateTime<Utc>) -> usize {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("compliance run already in progress; skipping");
            return 0;
        }

        let mut ran = 0;
        for rule in &self.rules {
            let due = self
                .results
                .read()
                .get(rule.name())
                .map_or(true, |r| r.next_check <= now);
            if !due {
                continue;
            }

            let outcome = rule.evaluate(&self.context);
            let check = ComplianceCheck {
                check_name: rule.name().to_string(),
                check_type: rule.check_type().to_string(),
                status: outcome.status,
                findings: outcome.findings,
                remediation: outcome.remediation,
                priority: rule.priority(),
                last_checked: now,
                next_check: now + rule.interval().period(),
            };
            if check.status != CheckStatus::Passing {
                info!(
                    check = rule.name(),
                    status = ?check.status,
                    "compliance check not passing"
                );
            }
            self.results.write().insert(check.check_name.clone(), check);
            ran += 1;
        }

        if ran > 0 {
            self.context.audit.record(
                SecurityEvent::new(SecurityEventKind::ComplianceRun, Severity::Info, "compliance_run")
                    .detail("checks_run", ran.to_string()),
            );
        }

        self.running.store(false, Ordering::SeqCst);
        ran
    }

    pub fn results(&self) -> Vec<ComplianceCheck> {
        let mut checks: Vec<_> = self.results.read().values().cloned().collect();
        checks.sort_by(|a, b| a.check_name.cmp(&b.check_name));
        checks
    }

    /// Passing fraction as 0-100. An empty table scores 100.
    pub fn score(&self) -> u8 {
        let results = self.results.read();
        if results.is_empty() {
            return 100;
        }
        let passing = results
            .values()
            .filter(|c| c.status == CheckStatus::Passing)
            .count();
        ((passing * 100) / results.len()) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertType, NewAlert};
    use crate::config::{AlertConfig, AuditConfig};

    fn context() -> ComplianceContext {
        let audit = Arc::new(AuditRecorder::with_sink(&AuditConfig::default(), None));
        let alerts = AlertManager::new(AlertConfig::default(), audit.clone());
        ComplianceContext {
            audit,
            alerts,
            intel: Arc::new(ThreatIntelStore::new()),
        }
    }

    fn high_alert(title: &str) -> NewAlert {
        NewAlert {
            alert_type: AlertType::SecurityThreat,
            severity: Severity::High,
            title: title.to_string(),
            message: "test".to_string(),
            source: "test".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn first_run_executes_every_rule() {
        let checker = ComplianceChecker::new(context());
        let now = Utc::now();
        assert_eq!(checker.run_due(now), 4);
        assert_eq!(checker.results().len(), 4);
        assert_eq!(checker.score(), 100);
    }

    #[test]
    fn checks_are_not_rerun_before_their_interval() {
        let checker = ComplianceChecker::new(context());
        let now = Utc::now();
        checker.run_due(now);
        assert_eq!(checker.run_due(now + ChronoDuration::minutes(5)), 0);
        // Past an hour the hourly checks come due again.
        assert_eq!(checker.run_due(now + ChronoDuration::minutes(61)), 2);
    }

    #[test]
    fn deep_alert_backlog_fails_and_lowers_the_score() {
        let ctx = context();
        let alerts = ctx.alerts.clone();
        let checker = ComplianceChecker::with_rules(
            ctx,
            vec![Box::new(AlertBacklogRule { max_unhandled: 2 })],
        );
        for i in 0..3 {
            alerts.create_alert(high_alert(&format!("backlog {}", i)));
        }

        checker.run_due(Utc::now());
        let results = checker.results();
        assert_eq!(results[0].status, CheckStatus::Failing);
        assert!(!results[0].findings.is_empty());
        assert_eq!(checker.score(), 0);
    }

    #[test]
    fn overlapping_runs_are_skipped() {
        struct SlowRule;
        impl ComplianceRule for SlowRule {
            fn name(&self) -> &str {
                "slow"
            }
            fn check_type(&self) -> &str {
                "test"
            }
            fn interval(&self) -> CheckInterval {
                CheckInterval::Hourly
            }
            fn priority(&self) -> Severity {
                Severity::Low
            }
            fn evaluate(&self, _ctx: &ComplianceContext) -> CheckOutcome {
                std::thread::sleep(std::time::Duration::from_millis(120));
                CheckOutcome::passing()
            }
        }

        let checker = Arc::new(ComplianceChecker::with_rules(
            context(),
            vec![Box::new(SlowRule)],
        ));

        let background = {
            let checker = checker.clone();
            std::thread::spawn(move || checker.run_due(Utc::now()))
        };
        // Let the background run take the guard first.
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(checker.run_due(Utc::now()), 0);
        assert_eq!(background.join().unwrap(), 1);
    }

    #[test]
    fn audit_failures_surface_as_a_warning() {
        use crate::audit::EventSink;
        use crate::errors::VigilError;
        use crate::types::SecurityEvent;

        struct FailingSink;
        impl EventSink for FailingSink {
            fn append(&self, _event: &SecurityEvent) -> crate::errors::Result<()> {
                Err(VigilError::Store("disk full".to_string()))
            }
        }

        let audit = Arc::new(AuditRecorder::with_sink(
            &AuditConfig::default(),
            Some(Box::new(FailingSink)),
        ));
        audit.record(SecurityEvent::new(
            SecurityEventKind::RequestActivity,
            Severity::Info,
            "request",
        ));
        let alerts = AlertManager::new(AlertConfig::default(), audit.clone());
        let checker = ComplianceChecker::with_rules(
            ComplianceContext {
                audit,
                alerts,
                intel: Arc::new(ThreatIntelStore::new()),
            },
            vec![Box::new(AuditIntegrityRule)],
        );

        checker.run_due(Utc::now());
        assert_eq!(checker.results()[0].status, CheckStatus::Warning);
    }
}
