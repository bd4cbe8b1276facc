//! RPC envelope codec
//!
//! Serializes the closed set of learning messages that travel over the bus.
//! Malformed bytes are a decode error; a well-formed envelope of the wrong
//! kind, or one missing its payload, is a protocol error.

use mailsift_common::types::Message;
use mailsift_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Envelope kind for compact verdict reports
pub const KIND_VERDICT_REPORT: &str = "VerdictReport";

/// Envelope kind for materialized learning events
pub const KIND_LEARNING_EVENT: &str = "LearningEvent";

/// Compact spam/ham judgment for one message, no body attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_spam: bool,
    pub message_id: String,
    pub host: String,
    pub reporter: String,
    pub reason: String,
}

/// Spam/ham judgment plus the full message snapshot, ready for module
/// retraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub is_spam: bool,
    pub message: Message,
    pub host: String,
    pub reporter: String,
    pub reason: String,
}

/// Wire envelope carrying exactly one of the learning message kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict_report: Option<Verdict>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_event: Option<LearningEvent>,
}

/// Encode a verdict report envelope
pub fn encode_verdict(verdict: &Verdict) -> Result<Vec<u8>> {
    let envelope = RpcEnvelope {
        kind: KIND_VERDICT_REPORT.to_string(),
        verdict_report: Some(verdict.clone()),
        learning_event: None,
    };
    serde_json::to_vec(&envelope).map_err(|e| Error::Internal(format!("encode envelope: {}", e)))
}

/// Encode a learning event envelope
pub fn encode_learning_event(event: &LearningEvent) -> Result<Vec<u8>> {
    let envelope = RpcEnvelope {
        kind: KIND_LEARNING_EVENT.to_string(),
        verdict_report: None,
        learning_event: Some(event.clone()),
    };
    serde_json::to_vec(&envelope).map_err(|e| Error::Internal(format!("encode envelope: {}", e)))
}

fn decode_envelope(bytes: &[u8]) -> Result<RpcEnvelope> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(format!("malformed envelope: {}", e)))
}

/// Decode a verdict report envelope
pub fn decode_verdict(bytes: &[u8]) -> Result<Verdict> {
    let envelope = decode_envelope(bytes)?;
    if envelope.kind != KIND_VERDICT_REPORT {
        return Err(Error::Protocol(format!(
            "expected {} envelope, got '{}'",
            KIND_VERDICT_REPORT, envelope.kind
        )));
    }
    envelope
        .verdict_report
        .ok_or_else(|| Error::Protocol("envelope is missing its verdict payload".to_string()))
}

/// Decode a learning event envelope
pub fn decode_learning_event(bytes: &[u8]) -> Result<LearningEvent> {
    let envelope = decode_envelope(bytes)?;
    if envelope.kind != KIND_LEARNING_EVENT {
        return Err(Error::Protocol(format!(
            "expected {} envelope, got '{}'",
            KIND_LEARNING_EVENT, envelope.kind
        )));
    }
    envelope
        .learning_event
        .ok_or_else(|| Error::Protocol("envelope is missing its learning payload".to_string()))
}
