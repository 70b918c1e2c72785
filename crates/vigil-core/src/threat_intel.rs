//! Curated threat-intelligence store and IP block list.
//!
//! Entries are keyed by IP, created on first detection of a malicious
//! source and updated (last_seen, occurrences) on repeat sightings.
//! Blocking is a two-state machine: unblocked -> blocked (critical
//! aggregate threat or admin action, optionally with an expiry deadline)
//! -> unblocked (manual unblock or expiry). Expiry is checked lazily on
//! lookup and swept by the maintenance loop.

use crate::types::{Severity, ThreatType};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntelligenceEntry {
    pub ip_address: String,
    pub threat_type: ThreatType,
    pub severity: Severity,
    /// Provenance: which detector or operator recorded this IP.
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
    pub blocked: bool,
    /// When set, the block lapses at this instant.
    pub block_expires_at: Option<DateTime<Utc>>,
}

/// In-memory curated list of known-malicious IPs.
pub struct ThreatIntelStore {
    entries: RwLock<HashMap<String, ThreatIntelligenceEntry>>,
}

impl ThreatIntelStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Exact-match lookup for the aggregator. A genuine match updates
    /// last_seen and occurrences; an unseen IP creates nothing.
    pub fn observe(&self, ip: &str) -> Option<ThreatIntelligenceEntry> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(ip)?;
        entry.last_seen = Utc::now();
        entry.occurrences += 1;
        Some(entry.clone())
    }

    /// Record a sighting of a malicious IP: create the entry on first
    /// detection, update it on repeats.
    pub fn record_sighting(
        &self,
        ip: &str,
        threat_type: ThreatType,
        severity: Severity,
        source: &str,
    ) -> ThreatIntelligenceEntry {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let entry = entries
            .entry(ip.to_string())
            .and_modify(|e| {
                e.last_seen = now;
                e.occurrences += 1;
                if severity > e.severity {
                    e.severity = severity;
                    e.threat_type = threat_type;
                }
            })
            .or_insert_with(|| {
                info!(ip, severity = severity.as_str(), source, "new threat-intelligence entry");
                ThreatIntelligenceEntry {
                    ip_address: ip.to_string(),
                    threat_type,
                    severity,
                    source: source.to_string(),
                    first_seen: now,
                    last_seen: now,
                    occurrences: 1,
                    blocked: false,
                    block_expires_at: None,
                }
            });
        entry.clone()
    }

    /// Transition an IP to blocked, creating a manual entry if the IP was
    /// not already curated. `until` arms the optional auto-expiry.
    pub fn block(&self, ip: &str, until: Option<DateTime<Utc>>) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let entry = entries
            .entry(ip.to_string())
            .or_insert_with(|| ThreatIntelligenceEntry {
                ip_address: ip.to_string(),
                threat_type: ThreatType::KnownMaliciousIp,
                severity: Severity::High,
                source: "manual".to_string(),
                first_seen: now,
                last_seen: now,
                occurrences: 0,
                blocked: false,
                block_expires_at: None,
            });
        entry.blocked = true;
        entry.block_expires_at = until;
        warn!(ip, expires = ?until, "IP blocked");
    }

    /// Transition an IP back to unblocked. Returns false when the IP was
    /// not blocked.
    pub fn unblock(&self, ip: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(ip) {
            Some(entry) if entry.blocked => {
                entry.blocked = false;
                entry.block_expires_at = None;
                info!(ip, "IP unblocked");
                true
            }
            _ => false,
        }
    }

    /// Whether the IP is currently on the block list. A lapsed expiry is
    /// observed here and the entry unblocked in place.
    pub fn is_blocked(&self, ip: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.write();
        match entries.get_mut(ip) {
            Some(entry) if entry.blocked => {
                if let Some(expiry) = entry.block_expires_at {
                    if now >= expiry {
                        entry.blocked = false;
                        entry.block_expires_at = None;
                        info!(ip, "IP block expired");
                        return false;
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Sweep lapsed blocks; returns how many were unblocked.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let mut swept = 0;
        for entry in entries.values_mut() {
            if entry.blocked {
                if let Some(expiry) = entry.block_expires_at {
                    if now >= expiry {
                        entry.blocked = false;
                        entry.block_expires_at = None;
                        swept += 1;
                    }
                }
            }
        }
        if swept > 0 {
            info!(swept, "expired IP blocks swept");
        }
        swept
    }

    pub fn get(&self, ip: &str) -> Option<ThreatIntelligenceEntry> {
        self.entries.read().get(ip).cloned()
    }

    pub fn blocked_count(&self) -> usize {
        self.entries.read().values().filter(|e| e.blocked).count()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl Default for ThreatIntelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn observing_an_unseen_ip_creates_nothing() {
        let store = ThreatIntelStore::new();
        assert!(store.observe("192.0.2.1").is_none());
        assert!(store.observe("192.0.2.1").is_none());
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn sightings_upsert_and_count_occurrences() {
        let store = ThreatIntelStore::new();
        let first = store.record_sighting("192.0.2.2", ThreatType::SqlInjection, Severity::High, "pattern_matcher");
        assert_eq!(first.occurrences, 1);

        let second = store.record_sighting("192.0.2.2", ThreatType::SqlInjection, Severity::High, "pattern_matcher");
        assert_eq!(second.occurrences, 2);
        assert_eq!(store.entry_count(), 1);

        // A genuine match through observe() also bumps the counter.
        let observed = store.observe("192.0.2.2").unwrap();
        assert_eq!(observed.occurrences, 3);
    }

    #[test]
    fn sighting_at_higher_severity_upgrades_the_entry() {
        let store = ThreatIntelStore::new();
        store.record_sighting("192.0.2.3", ThreatType::ExcessiveRequestRate, Severity::Medium, "rate_tracker");
        let upgraded = store.record_sighting("192.0.2.3", ThreatType::CommandInjection, Severity::Critical, "pattern_matcher");
        assert_eq!(upgraded.severity, Severity::Critical);
        assert_eq!(upgraded.threat_type, ThreatType::CommandInjection);
    }

    #[test]
    fn block_unblock_round_trip() {
        let store = ThreatIntelStore::new();
        assert!(!store.is_blocked("192.0.2.4"));

        store.block("192.0.2.4", None);
        assert!(store.is_blocked("192.0.2.4"));
        assert_eq!(store.blocked_count(), 1);

        assert!(store.unblock("192.0.2.4"));
        assert!(!store.is_blocked("192.0.2.4"));
        assert!(!store.unblock("192.0.2.4"));
    }

    #[test]
    fn lapsed_expiry_unblocks_on_lookup() {
        let store = ThreatIntelStore::new();
        store.block("192.0.2.5", Some(Utc::now() - ChronoDuration::seconds(1)));
        assert!(!store.is_blocked("192.0.2.5"));
        // And stays unblocked.
        assert_eq!(store.blocked_count(), 0);
    }

    #[test]
    fn sweep_unblocks_only_lapsed_entries() {
        let store = ThreatIntelStore::new();
        store.block("192.0.2.6", Some(Utc::now() - ChronoDuration::seconds(5)));
        store.block("192.0.2.7", Some(Utc::now() + ChronoDuration::hours(1)));
        store.block("192.0.2.8", None);

        assert_eq!(store.sweep_expired(), 1);
        assert!(!store.is_blocked("192.0.2.6"));
        assert!(store.is_blocked("192.0.2.7"));
        assert!(store.is_blocked("192.0.2.8"));
    }
}
