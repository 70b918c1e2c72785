//! Append-only audit recording.
//!
//! The system of record every other component reads from. Recording never
//! returns an error to the caller: availability of the request path takes
//! precedence over audit completeness, so sink failures are logged and
//! swallowed (a documented trade-off, tracked in `events_failed`).

use crate::config::AuditConfig;
use crate::errors::Result;
use crate::types::{SecurityEvent, SecurityEventKind, Severity};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};
use uuid::Uuid;

/// Destination for the durable copy of every recorded event.
pub trait EventSink: Send + Sync {
    fn append(&self, event: &SecurityEvent) -> Result<()>;
}

/// Line-delimited JSON file sink with size-based rotation.
pub struct JsonlSink {
    inner: Mutex<JsonlSinkInner>,
}

struct JsonlSinkInner {
    writer: BufWriter<File>,
    path: PathBuf,
    current_size: u64,
    rotation_bytes: u64,
    rotation_counter: u32,
}

impl JsonlSink {
    pub fn open(path: PathBuf, rotation_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Mutex::new(JsonlSinkInner {
                writer: BufWriter::new(file),
                path,
                current_size,
                rotation_bytes,
                rotation_counter: 0,
            }),
        })
    }
}

impl EventSink for JsonlSink {
    fn append(&self, event: &SecurityEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut inner = self.inner.lock();

        if inner.current_size + line.len() as u64 + 1 > inner.rotation_bytes {
            inner.rotate()?;
        }

        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.current_size += line.len() as u64 + 1;
        Ok(())
    }
}

impl JsonlSinkInner {
    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.rotation_counter += 1;
        let rotated = format!(
            "{}.{}.{}",
            self.path.display(),
            Utc::now().timestamp(),
            self.rotation_counter
        );
        std::fs::rename(&self.path, &rotated)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        debug!(rotated, "rotated audit log");
        Ok(())
    }
}

/// Query filter over the recorded event history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub actor_id: Option<String>,
    pub source_ip: Option<String>,
    pub kinds: Option<Vec<SecurityEventKind>>,
    pub min_severity: Option<Severity>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(ref actor) = self.actor_id {
            if event.actor_id.as_ref() != Some(actor) {
                return false;
            }
        }
        if let Some(ref ip) = self.source_ip {
            if event.source_ip.as_ref() != Some(ip) {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Aggregated view over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_events: u64,
    pub failed_operations: u64,
    pub by_kind: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub unique_actors: usize,
    pub unique_ips: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub events_recorded: u64,
    pub events_failed: u64,
    pub high_severity_events: u64,
}

/// Bounded in-memory storage: insertion-ordered ring of ids over an
/// id-keyed event map, with an actor index for the behavioral lookback.
struct AuditStorage {
    order: VecDeque<Uuid>,
    events: HashMap<Uuid, SecurityEvent>,
    actor_index: HashMap<String, Vec<Uuid>>,
    max_events: usize,
}

impl AuditStorage {
    fn new(max_events: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(max_events.min(4096)),
            events: HashMap::new(),
            actor_index: HashMap::new(),
            max_events,
        }
    }

    fn add(&mut self, event: SecurityEvent) {
        if self.order.len() >= self.max_events {
            if let Some(old_id) = self.order.pop_front() {
                if let Some(old) = self.events.remove(&old_id) {
                    if let Some(actor) = old.actor_id {
                        if let Some(ids) = self.actor_index.get_mut(&actor) {
                            ids.retain(|id| *id != old_id);
                            if ids.is_empty() {
                                self.actor_index.remove(&actor);
                            }
                        }
                    }
                }
            }
        }

        if let Some(ref actor) = event.actor_id {
            self.actor_index
                .entry(actor.clone())
                .or_default()
                .push(event.id);
        }
        self.order.push_back(event.id);
        self.events.insert(event.id, event);
    }

    fn query(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        let limit = filter.limit.unwrap_or(usize::MAX);

        // Actor-scoped queries walk the index instead of the whole ring.
        let matched: Vec<&SecurityEvent> = if let Some(ref actor) = filter.actor_id {
            let Some(ids) = self.actor_index.get(actor) else {
                return Vec::new();
            };
            ids.iter()
                .rev()
                .filter_map(|id| self.events.get(id))
                .filter(|e| filter.matches(e))
                .collect()
        } else {
            self.order
                .iter()
                .rev()
                .filter_map(|id| self.events.get(id))
                .filter(|e| filter.matches(e))
                .collect()
        };

        matched
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AuditReport {
        let mut by_kind: HashMap<String, u64> = HashMap::new();
        let mut by_severity: HashMap<String, u64> = HashMap::new();
        let mut actors = HashSet::new();
        let mut ips = HashSet::new();
        let mut total = 0u64;
        let mut failed = 0u64;

        for event in self.events.values() {
            if event.timestamp < start || event.timestamp > end {
                continue;
            }
            total += 1;
            if !event.success {
                failed += 1;
            }
            *by_kind.entry(format!("{:?}", event.kind)).or_insert(0) += 1;
            *by_severity
                .entry(event.severity.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(ref actor) = event.actor_id {
                actors.insert(actor.clone());
            }
            if let Some(ref ip) = event.source_ip {
                ips.insert(ip.clone());
            }
        }

        AuditReport {
            start,
            end,
            total_events: total,
            failed_operations: failed,
            by_kind,
            by_severity,
            unique_actors: actors.len(),
            unique_ips: ips.len(),
        }
    }
}

/// Append-only recorder of security-relevant events.
pub struct AuditRecorder {
    storage: RwLock<AuditStorage>,
    sink: Option<Box<dyn EventSink>>,
    events_recorded: AtomicU64,
    events_failed: AtomicU64,
    high_severity_events: AtomicU64,
}

impl AuditRecorder {
    pub fn new(config: &AuditConfig) -> Result<Self> {
        let sink: Option<Box<dyn EventSink>> = match &config.log_path {
            Some(path) => Some(Box::new(JsonlSink::open(
                path.clone(),
                config.rotation_bytes,
            )?)),
            None => None,
        };
        Ok(Self::with_sink(config, sink))
    }

    pub fn with_sink(config: &AuditConfig, sink: Option<Box<dyn EventSink>>) -> Self {
        Self {
            storage: RwLock::new(AuditStorage::new(config.buffer_size)),
            sink,
            events_recorded: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            high_severity_events: AtomicU64::new(0),
        }
    }

    /// Record one event. Never returns an error: a failing sink is logged
    /// and the event is kept in memory regardless.
    pub fn record(&self, event: SecurityEvent) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&event) {
                self.events_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    component = "audit",
                    operation = "append",
                    event_id = %event.id,
                    error = %e,
                    "audit sink write failed; event retained in memory only"
                );
            }
        }

        if event.severity >= Severity::High {
            self.high_severity_events.fetch_add(1, Ordering::Relaxed);
        }

        self.storage.write().add(event);
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Query recorded events, newest first.
    pub fn query(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        self.storage.read().query(filter)
    }

    /// Aggregate counts by kind/severity plus actor/IP cardinality.
    pub fn report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AuditReport {
        self.storage.read().report(start, end)
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            high_severity_events: self.high_severity_events.load(Ordering::Relaxed),
        }
    }
}
