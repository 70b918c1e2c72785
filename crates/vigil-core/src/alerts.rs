//! Security alert lifecycle and escalation.
//!
//! Alerts move Active -> Acknowledged -> Resolved, or Active -> Escalated
//! when a critical alert goes unacknowledged past the escalation window.
//! Escalation timers are per-alert cancellable tasks keyed by alert id;
//! any transition away from Active cancels the pending timer. Channel
//! fan-out is best-effort: individual failures are logged and never fail
//! the alert operation.

use crate::audit::AuditRecorder;
use crate::config::AlertConfig;
use crate::errors::{Result, VigilError};
use crate::types::{SecurityEvent, SecurityEventKind, Severity};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SecurityThreat,
    AnomalyDetected,
    ComplianceViolation,
    SystemHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Escalated,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Component or detector that raised the alert.
    pub source: String,
    pub status: AlertStatus,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input for alert creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Opaque outbound notification capability (email, chat webhook, SMS).
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    fn notify(&self, alert: &SecurityAlert) -> Result<()>;
}

/// Default channel: structured log line per notification. Real transports
/// plug in behind the same trait.
pub struct LogChannel;

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, alert: &SecurityAlert) -> Result<()> {
        warn!(
            alert_id = %alert.id,
            severity = alert.severity.as_str(),
            title = %alert.title,
            "security alert notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub created: u64,
    pub escalated: u64,
    pub notifications_failed: u64,
    pub active: usize,
}

/// Manages alert state, escalation timers, and notification fan-out.
pub struct AlertManager {
    config: AlertConfig,
    alerts: RwLock<HashMap<Uuid, SecurityAlert>>,
    order: Mutex<VecDeque<Uuid>>,
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    audit: Arc<AuditRecorder>,
    /// Escalation timers call back through this handle; holding it weak
    /// lets a dropped manager wind down without firing.
    self_ref: Weak<AlertManager>,
    created: AtomicU64,
    escalated: AtomicU64,
    notifications_failed: Arc<AtomicU64>,
}

impl AlertManager {
    pub fn new(config: AlertConfig, audit: Arc<AuditRecorder>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            alerts: RwLock::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            channels: RwLock::new(Vec::new()),
            timers: Mutex::new(HashMap::new()),
            audit,
            self_ref: weak.clone(),
            created: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
            notifications_failed: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.channels.write().push(channel);
    }

    /// Create an alert, fan out notifications, and arm the escalation
    /// timer for critical severities. Must run inside a tokio runtime.
    pub fn create_alert(&self, data: NewAlert) -> Uuid {
        let alert = SecurityAlert {
            id: Uuid::new_v4(),
            alert_type: data.alert_type,
            severity: data.severity,
            title: data.title,
            message: data.message,
            source: data.source,
            status: AlertStatus::Active,
            metadata: data.metadata,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        };
        let id = alert.id;

        {
            let mut alerts = self.alerts.write();
            let mut order = self.order.lock();
            if order.len() >= self.config.max_history {
                if let Some(oldest) = order.pop_front() {
                    if let Some(dropped) = alerts.remove(&oldest) {
                        if dropped.status != AlertStatus::Resolved {
                            warn!(alert_id = %oldest, "alert history cap dropped an unresolved alert");
                        }
                    }
                }
            }
            order.push_back(id);
            alerts.insert(id, alert.clone());
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(alert_id = %id, severity = alert.severity.as_str(), title = %alert.title, "alert created");

        self.audit.record(
            SecurityEvent::new(SecurityEventKind::AlertLifecycle, alert.severity, "alert_created")
                .detail("alert_id", id.to_string())
                .detail("title", alert.title.clone()),
        );

        self.fan_out(alert.clone());

        if alert.severity == Severity::Critical {
            self.arm_escalation_timer(id);
        }

        id
    }

    /// Acknowledge an Active or Escalated alert, cancelling any pending
    /// escalation.
    pub fn acknowledge(&self, id: Uuid) -> Result<()> {
        {
            let mut alerts = self.alerts.write();
            let alert = alerts
                .get_mut(&id)
                .ok_or_else(|| VigilError::NotFound(format!("alert {}", id)))?;
            match alert.status {
                AlertStatus::Active | AlertStatus::Escalated => {
                    alert.status = AlertStatus::Acknowledged;
                    alert.acknowledged_at = Some(Utc::now());
                }
                status => {
                    return Err(VigilError::Validation(format!(
                        "alert {} cannot be acknowledged from {:?}",
                        id, status
                    )))
                }
            }
        }
        self.cancel_timer(id);
        self.audit.record(
            SecurityEvent::new(SecurityEventKind::AlertLifecycle, Severity::Info, "alert_acknowledged")
                .detail("alert_id", id.to_string()),
        );
        Ok(())
    }

    /// Resolve an alert from any non-resolved state.
    pub fn resolve(&self, id: Uuid) -> Result<()> {
        {
            let mut alerts = self.alerts.write();
            let alert = alerts
                .get_mut(&id)
                .ok_or_else(|| VigilError::NotFound(format!("alert {}", id)))?;
            if alert.status == AlertStatus::Resolved {
                return Err(VigilError::Validation(format!("alert {} already resolved", id)));
            }
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
        }
        self.cancel_timer(id);
        self.audit.record(
            SecurityEvent::new(SecurityEventKind::AlertLifecycle, Severity::Info, "alert_resolved")
                .detail("alert_id", id.to_string()),
        );
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<SecurityAlert> {
        self.alerts.read().get(&id).cloned()
    }

    /// Alerts filtered by status, newest first.
    pub fn list(&self, status: Option<AlertStatus>) -> Vec<SecurityAlert> {
        let alerts = self.alerts.read();
        let order = self.order.lock();
        order
            .iter()
            .rev()
            .filter_map(|id| alerts.get(id))
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AlertStats {
        let active = self
            .alerts
            .read()
            .values()
            .filter(|a| a.status == AlertStatus::Active || a.status == AlertStatus::Escalated)
            .count();
        AlertStats {
            created: self.created.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            active,
        }
    }

    fn arm_escalation_timer(&self, id: Uuid) {
        let weak = self.self_ref.clone();
        let window = self.config.escalation_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(manager) = weak.upgrade() {
                manager.escalate_if_active(id);
            }
        });
        self.timers.lock().insert(id, handle);
    }

    /// Timer body: escalation applies only if the alert is still Active at
    /// timeout, so an acknowledgment that raced the timer wins.
    fn escalate_if_active(&self, id: Uuid) {
        let escalated_alert = {
            let mut alerts = self.alerts.write();
            match alerts.get_mut(&id) {
                Some(alert) if alert.status == AlertStatus::Active => {
                    alert.status = AlertStatus::Escalated;
                    Some(alert.clone())
                }
                _ => None,
            }
        };
        self.timers.lock().remove(&id);

        if let Some(alert) = escalated_alert {
            self.escalated.fetch_add(1, Ordering::Relaxed);
            warn!(alert_id = %id, title = %alert.title, "alert escalated: unacknowledged past the window");
            self.audit.record(
                SecurityEvent::new(SecurityEventKind::AlertLifecycle, alert.severity, "alert_escalated")
                    .detail("alert_id", id.to_string()),
            );
            self.fan_out(alert);
        }
    }

    fn cancel_timer(&self, id: Uuid) {
        if let Some(handle) = self.timers.lock().remove(&id) {
            handle.abort();
        }
    }

    /// Best-effort notification fan-out in a background task. Each channel
    /// failure is logged on its own; none affect the caller.
    fn fan_out(&self, alert: SecurityAlert) {
        let channels: Vec<Arc<dyn NotificationChannel>> = self.channels.read().clone();
        if channels.is_empty() {
            return;
        }
        let failed = Arc::clone(&self.notifications_failed);
        tokio::spawn(async move {
            for channel in channels {
                if let Err(e) = channel.notify(&alert) {
                    failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        component = "alerts",
                        operation = "notify",
                        channel = channel.name(),
                        alert_id = %alert.id,
                        error = %e,
                        "notification channel failed"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use std::time::Duration;

    struct RecordingChannel {
        delivered: Arc<AtomicU64>,
    }

    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        fn notify(&self, _alert: &SecurityAlert) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct FailingChannel;

    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        fn notify(&self, _alert: &SecurityAlert) -> Result<()> {
            Err(VigilError::Notification("webhook unreachable".to_string()))
        }
    }

    fn manager_with_window(window: Duration) -> Arc<AlertManager> {
        let audit = Arc::new(AuditRecorder::with_sink(&AuditConfig::default(), None));
        AlertManager::new(
            AlertConfig {
                escalation_window: window,
                ..AlertConfig::default()
            },
            audit,
        )
    }

    fn critical_alert() -> NewAlert {
        NewAlert {
            alert_type: AlertType::SecurityThreat,
            severity: Severity::Critical,
            title: "coordinated injection attempts".to_string(),
            message: "multiple critical signatures from one source".to_string(),
            source: "aggregator".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn lifecycle_active_acknowledged_resolved() {
        let manager = manager_with_window(Duration::from_secs(3600));
        let id = manager.create_alert(critical_alert());

        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Active);

        manager.acknowledge(id).unwrap();
        let alert = manager.get(id).unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert!(alert.acknowledged_at.is_some());

        manager.resolve(id).unwrap();
        let alert = manager.get(id).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.resolved_at.is_some());

        // Terminal: no further transitions.
        assert!(manager.acknowledge(id).is_err());
        assert!(manager.resolve(id).is_err());
    }

    #[tokio::test]
    async fn unacknowledged_critical_alert_escalates_exactly_once() {
        let manager = manager_with_window(Duration::from_millis(40));
        let id = manager.create_alert(critical_alert());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Escalated);
        assert_eq!(manager.stats().escalated, 1);
    }

    #[tokio::test]
    async fn acknowledgment_before_timeout_cancels_escalation() {
        let manager = manager_with_window(Duration::from_millis(60));
        let id = manager.create_alert(critical_alert());

        manager.acknowledge(id).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Acknowledged);
        assert_eq!(manager.stats().escalated, 0);
    }

    #[tokio::test]
    async fn non_critical_alerts_do_not_escalate() {
        let manager = manager_with_window(Duration::from_millis(30));
        let id = manager.create_alert(NewAlert {
            severity: Severity::High,
            ..critical_alert()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn escalated_alert_can_still_be_acknowledged() {
        let manager = manager_with_window(Duration::from_millis(30));
        let id = manager.create_alert(critical_alert());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Escalated);

        manager.acknowledge(id).unwrap();
        assert_eq!(manager.get(id).unwrap().status, AlertStatus::Acknowledged);
    }

    #[tokio::test]
    async fn channel_failure_does_not_fail_creation() {
        let manager = manager_with_window(Duration::from_secs(3600));
        let delivered = Arc::new(AtomicU64::new(0));
        manager.register_channel(Arc::new(FailingChannel));
        manager.register_channel(Arc::new(RecordingChannel {
            delivered: delivered.clone(),
        }));

        let id = manager.create_alert(critical_alert());
        assert!(manager.get(id).is_some());

        // Fan-out runs in the background; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
        assert_eq!(manager.stats().notifications_failed, 1);
    }

    #[tokio::test]
    async fn list_filters_by_status_newest_first() {
        let manager = manager_with_window(Duration::from_secs(3600));
        let first = manager.create_alert(critical_alert());
        let second = manager.create_alert(NewAlert {
            severity: Severity::High,
            title: "rate anomaly".to_string(),
            ..critical_alert()
        });
        manager.resolve(first).unwrap();

        let active = manager.list(Some(AlertStatus::Active));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second);

        let all = manager.list(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second);
    }
}
