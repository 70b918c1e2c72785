//! Attack-signature pattern matching.
//!
//! Evaluates a request's URL, body, and user agent against a fixed, ordered
//! list of signature rules. Detection is pure: no state, and every matching
//! rule is reported rather than short-circuiting on the first hit.

use crate::config::PatternConfig;
use crate::types::{DetectedThreat, Severity, ThreatType};
use regex::Regex;
use tracing::warn;

/// Confidence attached to a regex signature match.
const SIGNATURE_CONFIDENCE: u8 = 85;
/// Confidence attached to the oversized-URL heuristic.
const URL_SIZE_CONFIDENCE: u8 = 70;
/// Confidence attached to the oversized-body heuristic.
const BODY_SIZE_CONFIDENCE: u8 = 75;

struct SignatureRule {
    name: &'static str,
    threat_type: ThreatType,
    severity: Severity,
    pattern: Regex,
}

/// Ordered signature table. Pattern, threat class, and severity are fixed;
/// a rule that fails to compile is dropped with a warning rather than
/// aborting construction.
fn signature_table() -> Vec<SignatureRule> {
    let specs: &[(&'static str, ThreatType, Severity, &'static str)] = &[
        (
            "sql_injection",
            ThreatType::SqlInjection,
            Severity::Critical,
            r"(?i)(\bunion\b\s+(all\s+)?\bselect\b|'\s*(or|and)\s+'?\w*'?\s*=|;\s*(drop|delete|truncate|insert|update)\b|\bor\b\s+1\s*=\s*1|xp_cmdshell|information_schema|'\s*--|\bsleep\s*\(|\bbenchmark\s*\()",
        ),
        (
            "cross_site_scripting",
            ThreatType::CrossSiteScripting,
            Severity::High,
            r"(?i)(<script[^>]*>|javascript\s*:|on(error|load|click|mouseover|focus|blur)\s*=|<iframe\b|document\.cookie|\beval\s*\()",
        ),
        (
            "path_traversal",
            ThreatType::PathTraversal,
            Severity::High,
            r"(?i)(\.\./|\.\.\\|%2e%2e%2f|%2e%2e%5c|/etc/passwd|/etc/shadow|\\windows\\system32|boot\.ini)",
        ),
        (
            "command_injection",
            ThreatType::CommandInjection,
            Severity::Critical,
            r"(?i)([;&|]\s*(cat|ls|rm|wget|curl|bash|sh|nc|ping|powershell)\b|\$\(\s*\w|`[^`]+`|\|\s*nc\b)",
        ),
        (
            "ldap_injection",
            ThreatType::LdapInjection,
            Severity::High,
            r"(?i)(\(\s*[|&]\s*\(|\*\s*\)\s*\(|\(\s*cn\s*=\s*\*|\(\s*uid\s*=\s*\*|\)\s*\(\s*[|&])",
        ),
    ];

    specs
        .iter()
        .filter_map(|&(name, threat_type, severity, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(SignatureRule {
                name,
                threat_type,
                severity,
                pattern: regex,
            }),
            Err(e) => {
                warn!(rule = name, error = %e, "dropping uncompilable signature rule");
                None
            }
        })
        .collect()
}

/// Stateless signature matcher over URL + body + user agent.
pub struct PatternMatcher {
    rules: Vec<SignatureRule>,
    config: PatternConfig,
}

impl PatternMatcher {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            rules: signature_table(),
            config,
        }
    }

    /// Evaluate one request's inputs against every signature rule plus the
    /// size heuristics. Multiple matches from different rules are all
    /// returned.
    pub fn detect(&self, url: &str, body: &str, user_agent: &str) -> Vec<DetectedThreat> {
        let combined = format!("{} {} {}", url, body, user_agent);
        let mut threats = Vec::new();

        for rule in &self.rules {
            if let Some(found) = rule.pattern.find(&combined) {
                threats.push(
                    DetectedThreat::new(
                        rule.threat_type,
                        rule.severity,
                        format!("attack signature matched: {}", rule.name),
                        SIGNATURE_CONFIDENCE,
                    )
                    .with_evidence("rule", rule.name)
                    .with_evidence("matched", truncate(found.as_str(), 120)),
                );
            }
        }

        if url.len() > self.config.max_url_length {
            threats.push(
                DetectedThreat::new(
                    ThreatType::AnomalousSize,
                    Severity::Medium,
                    "unusually large request URL",
                    URL_SIZE_CONFIDENCE,
                )
                .with_evidence("url_length", url.len().to_string()),
            );
        }

        if body.len() > self.config.max_body_bytes {
            threats.push(
                DetectedThreat::new(
                    ThreatType::AnomalousSize,
                    Severity::Medium,
                    "unusually large request body",
                    BODY_SIZE_CONFIDENCE,
                )
                .with_evidence("body_bytes", body.len().to_string()),
            );
        }

        threats
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
