//! Wire types shared between the broker daemon and any future out-of-process
//! client: the audit record shape, the request identifier, the local
//! transport's JSON request/response envelopes, and the opaque callback-data
//! string channels embed in approval prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One append-only audit log line. `payload` carries the action-specific
/// fields enumerated in the broker's audit event vocabulary; the broker never
/// reads these back, so this type stays deliberately loose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            payload,
        }
    }
}

/// A pending-request identifier: 64 bits rendered as 16 lowercase hex
/// characters. Unique among concurrently pending requests (collisions are
/// possible in principle but astronomically unlikely given 2^64 values drawn
/// from a CSPRNG for a human-paced, small working set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn random() -> Self {
        use rand::RngCore;
        Self(rand::rng().next_u64())
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for RequestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RequestId::parse(&raw).ok_or_else(|| serde::de::Error::custom("not a 16-hex-char id"))
    }
}

/// The outcome an approval resolves to. Distinct from a plain `bool` so
/// timeout is never confused with an explicit operator denial internally,
/// even though both surface as the same error shape to the original caller.
/// `Shutdown` is distinct from `Denied` too: both deny the caller, but only
/// `Denied` triggers a channel `update_outcome` call — shutdown tears down
/// without notifying anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
    Shutdown,
}

impl ApprovalOutcome {
    pub fn approved(self) -> bool {
        matches!(self, ApprovalOutcome::Approved)
    }
}

/// Request actions accepted on the local transport, see `read`/`ping`/`status`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LocalRequest {
    Read {
        reference: String,
        reason: Option<String>,
    },
    Ping,
    Status,
}

#[derive(Debug, Error)]
pub enum CallbackDataError {
    #[error("invalid callback-data shape: {0}")]
    InvalidShape(String),
}

use thiserror::Error;

/// The verb carried by a parsed `ag:<verb>:<id>` callback-data string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackVerb {
    Approve,
    Deny,
}

/// Parses the opaque `ag:approve:<id>` / `ag:deny:<id>` token that channels
/// embed in their prompts and that all three callback ingresses recognise.
pub fn parse_callback_data(raw: &str) -> Result<(CallbackVerb, RequestId), CallbackDataError> {
    let mut parts = raw.splitn(3, ':');
    let prefix = parts
        .next()
        .ok_or_else(|| CallbackDataError::InvalidShape(raw.to_string()))?;
    let verb = parts
        .next()
        .ok_or_else(|| CallbackDataError::InvalidShape(raw.to_string()))?;
    let id = parts
        .next()
        .ok_or_else(|| CallbackDataError::InvalidShape(raw.to_string()))?;
    if prefix != "ag" {
        return Err(CallbackDataError::InvalidShape(raw.to_string()));
    }
    let verb = match verb {
        "approve" => CallbackVerb::Approve,
        "deny" => CallbackVerb::Deny,
        other => return Err(CallbackDataError::InvalidShape(other.to_string())),
    };
    let id = RequestId::parse(id).ok_or_else(|| CallbackDataError::InvalidShape(id.to_string()))?;
    Ok((verb, id))
}

/// Renders a callback-data token for an id and verb, the inverse of
/// `parse_callback_data`. Used when building channel prompts.
pub fn callback_data(verb: CallbackVerb, id: RequestId) -> String {
    let verb = match verb {
        CallbackVerb::Approve => "approve",
        CallbackVerb::Deny => "deny",
    };
    format!("ag:{verb}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_round_trips_through_display_and_parse() {
        let id = RequestId(0x0123456789abcdef);
        assert_eq!(id.to_string(), "0123456789abcdef");
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn request_id_rejects_uppercase_and_wrong_length() {
        assert_eq!(RequestId::parse("0123456789ABCDEF"), None);
        assert_eq!(RequestId::parse("abc"), None);
    }

    #[test]
    fn callback_data_round_trips() {
        let id = RequestId::random();
        let token = callback_data(CallbackVerb::Approve, id);
        let (verb, parsed) = parse_callback_data(&token).unwrap();
        assert_eq!(verb, CallbackVerb::Approve);
        assert_eq!(parsed, id);
    }

    #[test]
    fn callback_data_rejects_garbage() {
        assert!(parse_callback_data("not-a-token").is_err());
        assert!(parse_callback_data("ag:maybe:0123456789abcdef").is_err());
    }
}
