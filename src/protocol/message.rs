//! JSON message shapes carried on the socket
//!
//! Before authentication the server speaks plain JSON text (`WHO`, `WELCOME`).
//! Afterwards every control frame holds a `srvCommand` / `devCommand`
//! envelope whose `msgPayload` is itself a JSON string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::player::MediaReport;
use crate::{Error, Result};

/// Handshake operation sent by the server as its identity challenge
pub const OP_CHALLENGE: &str = "WHO";

/// Handshake operation acknowledging a valid identity response
pub const OP_WELCOME: &str = "WELCOME";

/// Operation tag of the client's identity response
pub const OP_IDENTITY: &str = "IAM";

/// Outbound message type reporting media status
pub const MSG_MEDIA_STATUS: &str = "Upd_MEST";

/// Outbound message type requesting a voice command session
pub const MSG_VOICE_REQUEST: &str = "Req_VOCM";

/// Outbound message type cancelling a voice command session
pub const MSG_VOICE_CANCEL: &str = "Req_CAVM";

/// Pre-authentication message from the server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeMessage {
    /// Operation tag (`WHO`, `WELCOME`, ...)
    #[serde(default)]
    pub operation: Option<String>,
}

impl HandshakeMessage {
    /// Parse a handshake text message
    ///
    /// # Errors
    ///
    /// Returns error if the text is not JSON
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this is the server's identity challenge
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        self.operation.as_deref() == Some(OP_CHALLENGE)
    }

    /// Whether this is the server's welcome acknowledgment
    #[must_use]
    pub fn is_welcome(&self) -> bool {
        self.operation.as_deref() == Some(OP_WELCOME)
    }
}

/// Signed identity response answering the server's challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// Always [`OP_IDENTITY`]
    pub operation: String,
    /// Client type tag
    pub clienttype: String,
    /// Client UUID assigned by authorization (empty if not yet assigned)
    pub clientuuid: String,
    /// Signing timestamp (`YYYYMMDDHHMMSSmmm`)
    pub timestamp: String,
    /// Hex HMAC-SHA256 over `id:key:timestamp`
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    #[serde(rename = "srvCommand")]
    srv_command: Option<RawCommand>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCommand {
    #[serde(rename = "msgType")]
    msg_type: String,
    #[serde(rename = "msgPayload")]
    msg_payload: String,
}

#[derive(Debug, Serialize)]
struct DeviceEnvelope<'a> {
    #[serde(rename = "devCommand")]
    dev_command: &'a RawCommand,
}

/// A server command with its payload decoded from the inner JSON string
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCommand {
    /// Command type (`Req_PLMD`, `Snd_SVEV`, ...)
    pub msg_type: String,
    /// Decoded payload object
    pub payload: Value,
}

impl ServerCommand {
    /// Decode a control frame body
    ///
    /// Returns `Ok(None)` when the envelope has no `srvCommand`.
    ///
    /// # Errors
    ///
    /// Returns error if either the outer envelope or the inner payload string
    /// is not valid JSON
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let envelope: ServerEnvelope = serde_json::from_str(text)?;
        let Some(raw) = envelope.srv_command else {
            return Ok(None);
        };

        let payload: Value = serde_json::from_str(&raw.msg_payload).map_err(|e| {
            Error::Protocol(format!("msgPayload of {} is not json: {e}", raw.msg_type))
        })?;

        Ok(Some(Self {
            msg_type: raw.msg_type,
            payload,
        }))
    }

    /// Chained follow-up command carried in `nextCmd` / `nextCmdOpt`
    #[must_use]
    pub fn chained(&self) -> Option<Self> {
        let next = self.payload.get("nextCmd")?.as_str()?;
        let payload = match self.payload.get("nextCmdOpt") {
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Null),
            Some(v) => v.clone(),
            None => Value::Null,
        };
        Some(Self {
            msg_type: next.to_string(),
            payload,
        })
    }

    /// The `cmdOpt` object of the payload, or `null`
    #[must_use]
    pub fn cmd_opt(&self) -> &Value {
        self.payload.get("cmdOpt").unwrap_or(&Value::Null)
    }
}

/// Outbound device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Message type
    pub msg_type: String,
    /// Payload, already serialized to a JSON string
    pub msg_payload: String,
}

impl DeviceCommand {
    /// Build a command whose payload is serialized from `payload`
    #[must_use]
    pub fn new(msg_type: &str, payload: &Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            msg_payload: payload.to_string(),
        }
    }

    /// Media status report (`Upd_MEST`)
    #[must_use]
    pub fn media_status(report: &MediaReport) -> Self {
        Self::new(
            MSG_MEDIA_STATUS,
            &serde_json::json!({ "cmdOpt": report.to_json() }),
        )
    }

    /// Voice command request carrying the current DSS status tags
    #[must_use]
    pub fn voice_request<'a>(dss_status: impl IntoIterator<Item = &'a str>) -> Self {
        let tags: Vec<&str> = dss_status.into_iter().collect();
        Self::new(
            MSG_VOICE_REQUEST,
            &serde_json::json!({ "cmdOpt": {}, "dssStatus": tags }),
        )
    }

    /// Voice command cancellation
    #[must_use]
    pub fn voice_cancel() -> Self {
        Self::new(MSG_VOICE_CANCEL, &serde_json::json!({ "cmdOpt": {} }))
    }

    /// Serialize into the `devCommand` envelope text
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        let raw = RawCommand {
            msg_type: self.msg_type.clone(),
            msg_payload: self.msg_payload.clone(),
        };
        Ok(serde_json::to_string(&DeviceEnvelope { dev_command: &raw })?)
    }
}
