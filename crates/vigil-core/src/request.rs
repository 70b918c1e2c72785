//! Framework-agnostic inbound request descriptor.

use crate::errors::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything the pipeline needs to know about one inbound HTTP request.
///
/// Built by whatever routing layer fronts the engine; the engine itself
/// never touches a framework type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Client address as seen by the edge, already resolved through
    /// X-Forwarded-For where applicable.
    pub source_ip: String,
    /// Present only for authenticated requests.
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>, source_ip: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: String::new(),
            source_ip: source_ip.into(),
            actor_id: None,
            session_id: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// User-Agent header, if the edge forwarded one.
    pub fn user_agent(&self) -> &str {
        self.headers.get("user-agent").map(String::as_str).unwrap_or("")
    }

    /// A malformed descriptor is the one error that propagates to the
    /// analysis caller.
    pub fn validate(&self) -> Result<()> {
        if self.source_ip.trim().is_empty() {
            return Err(VigilError::Validation(
                "request descriptor has no source IP".to_string(),
            ));
        }
        if self.method.trim().is_empty() {
            return Err(VigilError::Validation(
                "request descriptor has no method".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = RequestDescriptor::new("GET", "/bills", "198.51.100.7")
            .header("User-Agent", "curl/8.0");
        assert_eq!(req.user_agent(), "curl/8.0");
    }

    #[test]
    fn missing_source_ip_is_rejected() {
        let req = RequestDescriptor::new("GET", "/bills", "  ");
        assert!(req.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: RequestDescriptor = serde_json::from_str(
            r#"{"method":"POST","path":"/comments","source_ip":"203.0.113.4"}"#,
        )
        .unwrap();
        assert!(req.body.is_empty());
        assert!(req.actor_id.is_none());
        assert!(req.validate().is_ok());
    }
}
