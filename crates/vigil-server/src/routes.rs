//! HTTP surface over the security engine.
//!
//! A thin admin and analysis API: request analysis, alert lifecycle,
//! audit queries, threat-intel block/unblock, dashboard, and health
//! probes. Handlers translate engine errors to status codes and never
//! leak internals.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use vigil_core::audit::EventFilter;
use vigil_core::{
    AlertStatus, AuditReport, DashboardOverview, RequestDescriptor, SecurityMonitor, Severity,
    ThreatDetectionResult, ThreatIntelligenceEntry, VigilError,
};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<SecurityMonitor>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(monitor: Arc<SecurityMonitor>) -> Self {
        Self {
            monitor,
            start_time: Instant::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/audit/events", get(audit_events))
        .route("/audit/report", get(audit_report))
        .route("/intel/:ip", get(intel_entry))
        .route("/intel/:ip/block", post(block_ip))
        .route("/intel/:ip/unblock", post(unblock_ip))
        .route("/dashboard", get(dashboard))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
}

fn error_status(err: &VigilError) -> StatusCode {
    match err {
        VigilError::Validation(_) => StatusCode::BAD_REQUEST,
        VigilError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: VigilError) -> (StatusCode, Json<Value>) {
    (error_status(&err), Json(json!({ "error": err.to_string() })))
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<RequestDescriptor>,
) -> Result<Json<ThreatDetectionResult>, (StatusCode, Json<Value>)> {
    debug!(path = %request.path, source_ip = %request.source_ip, "analyze request");
    let result = state
        .monitor
        .analyze_request(&request)
        .map_err(error_body)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    status: Option<String>,
}

fn parse_status(raw: &str) -> Option<AlertStatus> {
    match raw {
        "active" => Some(AlertStatus::Active),
        "acknowledged" => Some(AlertStatus::Acknowledged),
        "escalated" => Some(AlertStatus::Escalated),
        "resolved" => Some(AlertStatus::Resolved),
        _ => None,
    }
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(parse_status(raw).ok_or_else(|| {
            error_body(VigilError::Validation(format!("unknown status: {}", raw)))
        })?),
        None => None,
    };
    let alerts = state.monitor.alert_manager().list(status);
    Ok(Json(json!({ "alerts": alerts })))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.monitor.acknowledge_alert(id).map_err(error_body)?;
    Ok(Json(json!({ "acknowledged": id })))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.monitor.resolve_alert(id).map_err(error_body)?;
    Ok(Json(json!({ "resolved": id })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    actor_id: Option<String>,
    source_ip: Option<String>,
    min_severity: Option<String>,
    hours: Option<i64>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw {
        "info" => Some(Severity::Info),
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

async fn audit_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let min_severity = match query.min_severity.as_deref() {
        Some(raw) => Some(parse_severity(raw).ok_or_else(|| {
            error_body(VigilError::Validation(format!("unknown severity: {}", raw)))
        })?),
        None => None,
    };
    let filter = EventFilter {
        actor_id: query.actor_id,
        source_ip: query.source_ip,
        min_severity,
        start: query.hours.map(|h| Utc::now() - ChronoDuration::hours(h)),
        offset: query.offset,
        limit: Some(query.limit.unwrap_or(100).min(1000)),
        ..EventFilter::default()
    };
    let events = state.monitor.audit_events(&filter);
    Ok(Json(json!({ "events": events })))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    hours: Option<i64>,
}

async fn audit_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Json<AuditReport> {
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 90);
    let end = Utc::now();
    let report = state.monitor.audit_report(end - ChronoDuration::hours(hours), end);
    Json(report)
}

async fn intel_entry(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<ThreatIntelligenceEntry>, (StatusCode, Json<Value>)> {
    match state.monitor.intel_entry(&ip) {
        Some(entry) => Ok(Json(entry)),
        None => Err(error_body(VigilError::NotFound(format!("intel entry for {}", ip)))),
    }
}

#[derive(Debug, Deserialize)]
struct BlockQuery {
    /// Optional auto-expiry for the block.
    ttl_secs: Option<i64>,
    admin: Option<String>,
}

async fn block_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Query(query): Query<BlockQuery>,
) -> Json<Value> {
    let until = query.ttl_secs.map(|secs| Utc::now() + ChronoDuration::seconds(secs));
    let admin = query.admin.as_deref().unwrap_or("api");
    state.monitor.block_ip(&ip, until, admin);
    Json(json!({ "blocked": ip, "expires_at": until }))
}

async fn unblock_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let admin = query.admin.as_deref().unwrap_or("api");
    if state.monitor.unblock_ip(&ip, admin) {
        Ok(Json(json!({ "unblocked": ip })))
    } else {
        Err(error_body(VigilError::NotFound(format!("{} is not blocked", ip))))
    }
}

async fn dashboard(State(state): State<AppState>) -> Json<DashboardOverview> {
    Json(state.monitor.dashboard())
}

async fn liveness(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "alive",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn readiness(State(state): State<AppState>) -> Json<Value> {
    let audit = state.monitor.audit().stats();
    let rate = state.monitor.rate_stats();
    let alerts = state.monitor.alert_manager().stats();
    Json(json!({
        "status": "ready",
        "audit": {
            "events_recorded": audit.events_recorded,
            "events_failed": audit.events_failed,
        },
        "rate_limiting": {
            "tracked_ips": rate.tracked_ips,
            "exceeded_total": rate.exceeded_total,
        },
        "alerts": {
            "active": alerts.active,
            "escalated": alerts.escalated,
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_parse() {
        assert_eq!(parse_status("active"), Some(AlertStatus::Active));
        assert_eq!(parse_status("escalated"), Some(AlertStatus::Escalated));
        assert_eq!(parse_status("nonsense"), None);
    }

    #[test]
    fn severity_strings_parse() {
        assert_eq!(parse_severity("critical"), Some(Severity::Critical));
        assert_eq!(parse_severity("info"), Some(Severity::Info));
        assert_eq!(parse_severity("severe"), None);
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let status = error_status(&VigilError::Validation("x".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let status = error_status(&VigilError::NotFound("x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let status = error_status(&VigilError::Store("x".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
