//! Message schema and protocol versions for the IPC boundary.
//!
//! # Security
//! - Versions below the server-enforced minimum are refused, never
//!   downgraded to silently
//! - Payload parse errors report position only, never input bytes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest protocol version this build speaks.
pub const CURRENT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V2;

/// Default downgrade floor.
pub const DEFAULT_MIN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V2;

/// Default frame size cap (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Wire protocol version carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// V1: legacy framing, no downgrade floor.
    pub const V1: Self = Self(1);
    /// V2: enforced minimum version and bounded frames.
    pub const V2: Self = Self(2);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        CURRENT_PROTOCOL_VERSION
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unsupported protocol version {requested} (minimum {minimum})")]
    UnsupportedVersion { requested: u16, minimum: u16 },

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json messages can quote input; keep only the position.
        ProtocolError::Malformed(format!(
            "invalid payload at line {} column {}",
            e.line(),
            e.column()
        ))
    }
}

/// Unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Inference request from caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub request_id: RequestId,
    pub model_id: String,
    pub prompt_tokens: Vec<u32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    256
}

impl InferenceRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.model_id.is_empty() {
            return Err(ProtocolError::Malformed("missing model_id".into()));
        }
        if self.prompt_tokens.is_empty() {
            return Err(ProtocolError::Malformed("missing prompt_tokens".into()));
        }
        if self.max_tokens == 0 {
            return Err(ProtocolError::Malformed("max_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// Inference response to caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: RequestId,
    pub output_tokens: Vec<u32>,
    pub finished: bool,
    pub error: Option<String>,
}

impl InferenceResponse {
    pub fn success(request_id: RequestId, output_tokens: Vec<u32>, finished: bool) -> Self {
        Self {
            request_id,
            output_tokens,
            finished,
            error: None,
        }
    }

    pub fn error(request_id: RequestId, error: String) -> Self {
        Self {
            request_id,
            output_tokens: Vec::new(),
            finished: true,
            error: Some(error),
        }
    }
}

/// IPC message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    Handshake {
        token: String,
        #[serde(default)]
        protocol_version: Option<ProtocolVersion>,
    },
    HandshakeAck {
        session_id: String,
        protocol_version: ProtocolVersion,
    },
    InferenceRequest(InferenceRequest),
    InferenceResponse(InferenceResponse),
    HealthCheck,
    HealthResponse {
        healthy: bool,
        protocol_version: ProtocolVersion,
    },
    /// End the connection's session.
    Revoke,
    RevokeAck,
    Error {
        code: u16,
        message: String,
    },
}

impl IpcMessage {
    /// Tag as it appears on the wire; used for spans and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::HandshakeAck { .. } => "handshake_ack",
            Self::InferenceRequest(_) => "inference_request",
            Self::InferenceResponse(_) => "inference_response",
            Self::HealthCheck => "health_check",
            Self::HealthResponse { .. } => "health_response",
            Self::Revoke => "revoke",
            Self::RevokeAck => "revoke_ack",
            Self::Error { .. } => "error",
        }
    }
}

/// Encode message to JSON payload bytes.
pub fn encode_message(message: &IpcMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::from)
}

/// Decode a JSON payload.
pub fn decode_message(bytes: &[u8]) -> Result<IpcMessage, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}
