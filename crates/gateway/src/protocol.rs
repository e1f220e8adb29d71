//! Gateway wire protocol: JSON frames `{ "op", "d", "s", "t" }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardline_core::{SessionState, ShardIdentity};

use crate::config::{ConnectionProperties, ShardConfig};
use crate::error::TransportError;

pub const API_VERSION: u8 = 10;

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

pub mod close_code {
    /// Normal closure; the server drops the session
    pub const NORMAL: u16 = 1000;
    /// Closing to reconnect; the session stays resumable
    pub const RECONNECT: u16 = 4000;
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    pub const INVALID_SEQUENCE: u16 = 4007;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_SHARD: u16 = 4010;
    pub const SHARDING_REQUIRED: u16 = 4011;
    pub const INVALID_API_VERSION: u16 = 4012;
    pub const INVALID_INTENTS: u16 = 4013;
    pub const DISALLOWED_INTENTS: u16 = 4014;

    /// The server will not accept a resume after this close
    pub fn clears_session(code: u16) -> bool {
        matches!(code, INVALID_SEQUENCE | SESSION_TIMED_OUT)
    }

    /// Reconnecting cannot succeed without a configuration change
    pub fn is_fatal(code: u16) -> bool {
        matches!(
            code,
            AUTHENTICATION_FAILED
                | INVALID_SHARD
                | SHARDING_REQUIRED
                | INVALID_API_VERSION
                | INVALID_INTENTS
                | DISALLOWED_INTENTS
        )
    }
}

/// One inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    pub op: u8,
    pub d: Value,
}

impl OutboundFrame {
    pub fn new(op: u8, d: Value) -> Self {
        Self { op, d }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(opcode::HEARTBEAT, last_sequence.map_or(Value::Null, Value::from))
    }

    pub fn identify(config: &ShardConfig, shard: ShardIdentity) -> Result<Self, serde_json::Error> {
        let payload = Identify {
            token: &config.token,
            intents: config.intents,
            properties: &config.properties,
            shard: shard.as_pair(),
            large_threshold: config.large_threshold,
            presence: config.presence.as_ref(),
        };
        Ok(Self::new(opcode::IDENTIFY, serde_json::to_value(payload)?))
    }

    pub fn resume(token: &str, session: &SessionState) -> Result<Self, serde_json::Error> {
        let payload = Resume {
            token,
            session_id: &session.session_id,
            seq: session.last_sequence,
        };
        Ok(Self::new(opcode::RESUME, serde_json::to_value(payload)?))
    }
}

#[derive(Serialize)]
struct Identify<'a> {
    token: &'a str,
    intents: u64,
    properties: &'a ConnectionProperties,
    shard: [u32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    large_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence: Option<&'a Value>,
}

#[derive(Serialize)]
struct Resume<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

/// Payload of the hello frame
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Milliseconds between heartbeats
    pub heartbeat_interval: u64,
}

/// The parts of READY the shard itself needs
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Append the version and encoding query to a gateway base URL
pub fn gateway_url(base: &str) -> Result<String, TransportError> {
    let mut url = url::Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("v", &API_VERSION.to_string())
        .append_pair("encoding", "json");
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dispatch_frame() {
        let frame: GatewayFrame = serde_json::from_str(
            r#"{"op":0,"d":{"content":"hi"},"s":42,"t":"MESSAGE_CREATE"}"#,
        )
        .unwrap();
        assert_eq!(frame.op, opcode::DISPATCH);
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.d["content"], "hi");
    }

    #[test]
    fn test_parse_minimal_frame() {
        let frame: GatewayFrame = serde_json::from_str(r#"{"op":11}"#).unwrap();
        assert_eq!(frame.op, opcode::HEARTBEAT_ACK);
        assert!(frame.d.is_null());
        assert!(frame.s.is_none());
    }

    #[test]
    fn test_identify_payload() {
        let config = ShardConfig::new("secret").with_intents(513);
        let frame = OutboundFrame::identify(&config, ShardIdentity::new(1, 4)).unwrap();
        let wire: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(wire["op"], 2);
        assert_eq!(wire["d"]["token"], "secret");
        assert_eq!(wire["d"]["intents"], 513);
        assert_eq!(wire["d"]["shard"], json!([1, 4]));
        assert_eq!(wire["d"]["properties"]["browser"], "shardline");
        assert!(wire["d"].get("presence").is_none());
    }

    #[test]
    fn test_resume_and_heartbeat_payloads() {
        let session = SessionState::new("abc", 7);
        let resume = OutboundFrame::resume("secret", &session).unwrap();
        assert_eq!(resume.op, opcode::RESUME);
        assert_eq!(resume.d, json!({"token": "secret", "session_id": "abc", "seq": 7}));

        assert_eq!(OutboundFrame::heartbeat(None).d, Value::Null);
        assert_eq!(OutboundFrame::heartbeat(Some(9)).d, json!(9));
    }

    #[test]
    fn test_gateway_url_query() {
        assert_eq!(
            gateway_url("wss://gateway.example").unwrap(),
            "wss://gateway.example/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_url("wss://resume.example/?v=9").unwrap(),
            "wss://resume.example/?v=10&encoding=json"
        );
        assert!(gateway_url("not a url").is_err());
    }

    #[test]
    fn test_close_code_classes() {
        assert!(close_code::clears_session(4007));
        assert!(close_code::clears_session(4009));
        assert!(!close_code::clears_session(4000));
        assert!(close_code::is_fatal(4004));
        assert!(!close_code::is_fatal(1000));
    }
}
