//! In-band control messages exchanged alongside the forward data path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn tag_resend_request() -> String {
    "resend_request".to_string()
}

fn tag_retry_request() -> String {
    "retry_request".to_string()
}

/// Receiver -> sender, sent during forward streaming when a stall is
/// detected. Names a byte position to resume from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResendRequest {
    #[serde(rename = "type", default = "tag_resend_request")]
    pub kind: String,
    pub stream_position: u64,
    pub timestamp: f64,
    pub retry_count: u32,
}

impl ResendRequest {
    #[must_use]
    pub fn new(stream_position: u64, timestamp: f64, retry_count: u32) -> Self {
        Self {
            kind: tag_resend_request(),
            stream_position,
            timestamp,
            retry_count,
        }
    }
}

/// Receiver -> sender, sent once after hash verification if any files
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryRequest {
    #[serde(rename = "type", default = "tag_retry_request")]
    pub kind: String,
    pub failed_files: Vec<String>,
    pub attempt: u32,
}

impl RetryRequest {
    #[must_use]
    pub fn new(failed_files: Vec<String>, attempt: u32) -> Self {
        Self {
            kind: tag_retry_request(),
            failed_files,
            attempt,
        }
    }
}

/// Receiver -> sender, sent after a fully verified transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionSignal {
    pub status: String,
    pub message: String,
    pub completion_time: f64,
}

impl CompletionSignal {
    #[must_use]
    pub fn success(message: impl Into<String>, completion_time: f64) -> Self {
        Self {
            status: "completed".to_string(),
            message: message.into(),
            completion_time,
        }
    }
}

/// Sender -> receiver, the final data record before the end marker:
/// one hex-SHA256 per relative path.
pub type HashMapRecord = HashMap<String, String>;

/// Parsed out of a decrypted control-channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Resend(ResendRequest),
    Retry(RetryRequest),
    Completion(CompletionSignal),
}

/// Parse a decrypted JSON payload into a known control message.
///
/// `ResendRequest`/`RetryRequest` carry an explicit `type` tag;
/// `CompletionSignal` is discriminated by its `status` field instead,
/// since it mirrors the wire shape of spec.md's completion record.
pub fn parse_control_message(bytes: &[u8]) -> serde_json::Result<ControlMessage> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let tag = value
        .get("type")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("status").and_then(|v| v.as_str()));

    match tag {
        Some("resend_request") => Ok(ControlMessage::Resend(serde_json::from_value(value)?)),
        Some("retry_request") => Ok(ControlMessage::Retry(serde_json::from_value(value)?)),
        Some("completed") => Ok(ControlMessage::Completion(serde_json::from_value(value)?)),
        other => Err(serde::de::Error::custom(format!(
            "unrecognized control message (type/status: {other:?})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resend_request_roundtrip() {
        let req = ResendRequest::new(4096, 123.5, 1);
        let json = serde_json::to_vec(&req).unwrap();
        match parse_control_message(&json).unwrap() {
            ControlMessage::Resend(parsed) => assert_eq!(parsed, req),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn retry_request_roundtrip() {
        let req = RetryRequest::new(vec!["a.txt".to_string(), "b.txt".to_string()], 2);
        let json = serde_json::to_vec(&req).unwrap();
        match parse_control_message(&json).unwrap() {
            ControlMessage::Retry(parsed) => assert_eq!(parsed, req),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn completion_signal_roundtrip() {
        let sig = CompletionSignal::success("all good", 42.0);
        let json = serde_json::to_vec(&sig).unwrap();
        match parse_control_message(&json).unwrap() {
            ControlMessage::Completion(parsed) => assert_eq!(parsed, sig),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_rejected() {
        let json = br#"{"type":"mystery"}"#;
        assert!(parse_control_message(json).is_err());
    }
}
