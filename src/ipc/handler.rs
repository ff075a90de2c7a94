//! Request/response handling for IPC connections.

use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;

use super::auth::{AuthError, SessionAuth, SessionToken};
use super::codec::{Frame, FrameCodec};
use super::protocol::{
    decode_message, InferenceRequest, InferenceResponse, IpcMessage, ProtocolError,
    ProtocolVersion,
};
use crate::backend::{CallerIdentity, InferenceBackend};
use crate::security::AuditTrail;
use crate::telemetry::{self, FrameSpan, SecurityEvent, SpanExt};

const AUDIT_SOURCE: &str = "ipc";

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl HandlerError {
    /// Status code carried in the `error` reply.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(ProtocolError::Malformed(_)) => 400,
            Self::Protocol(ProtocolError::MessageTooLarge { .. }) => 413,
            Self::Protocol(ProtocolError::UnsupportedVersion { .. }) => 426,
            Self::Auth(AuthError::Locked) => 423,
            Self::Auth(AuthError::RateLimited) => 429,
            Self::Auth(_) | Self::NotAuthenticated => 401,
        }
    }

    /// Protocol violations end the connection; auth refusals do not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn to_message(&self) -> IpcMessage {
        IpcMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Per-connection state owned by the connection task.
#[derive(Debug)]
pub struct ConnectionState {
    identity: String,
    session: Option<SessionToken>,
    version: ProtocolVersion,
}

impl ConnectionState {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            session: None,
            version: ProtocolVersion::default(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Version used for outbound frames.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }
}

/// Handles IPC message processing with authentication.
pub struct IpcHandler {
    auth: Arc<SessionAuth>,
    codec: FrameCodec,
    backend: Arc<dyn InferenceBackend>,
    audit: AuditTrail,
}

impl IpcHandler {
    pub fn new(
        auth: Arc<SessionAuth>,
        codec: FrameCodec,
        backend: Arc<dyn InferenceBackend>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            auth,
            codec,
            backend,
            audit,
        }
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn auth(&self) -> &Arc<SessionAuth> {
        &self.auth
    }

    /// Process one decoded frame and produce the reply.
    pub async fn handle_frame(
        &self,
        frame: &Frame,
        state: &mut ConnectionState,
    ) -> Result<IpcMessage, HandlerError> {
        let message = match decode_message(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                self.report_protocol_error(state.identity(), &e);
                return Err(e.into());
            }
        };

        let span = FrameSpan::new(state.identity(), message.kind(), frame.version.as_u16());
        let result = self
            .handle_message(message, state)
            .instrument(span.clone())
            .await;
        span.record_result(&result);
        result
    }

    async fn handle_message(
        &self,
        message: IpcMessage,
        state: &mut ConnectionState,
    ) -> Result<IpcMessage, HandlerError> {
        match message {
            IpcMessage::Handshake {
                token,
                protocol_version,
            } => self.handshake(&token, protocol_version, state),

            IpcMessage::HealthCheck => {
                self.auth.check_exempt(state.identity())?;
                Ok(IpcMessage::HealthResponse {
                    healthy: true,
                    protocol_version: state.version,
                })
            }

            IpcMessage::InferenceRequest(request) => {
                self.charge_unauthenticated(state)?;
                self.require_session(state)?;
                let caller = CallerIdentity {
                    identity: state.identity.clone(),
                    protocol_version: state.version,
                };
                let response = self.handle_inference(&caller, request).await;
                Ok(IpcMessage::InferenceResponse(response))
            }

            IpcMessage::Revoke => {
                self.charge_unauthenticated(state)?;
                if let Some(token) = state.session.take() {
                    self.auth.revoke(&token);
                }
                Ok(IpcMessage::RevokeAck)
            }

            _ => {
                self.charge_unauthenticated(state)?;
                Ok(IpcMessage::Error {
                    code: 400,
                    message: "Unexpected message type".into(),
                })
            }
        }
    }

    fn handshake(
        &self,
        token: &str,
        requested: Option<ProtocolVersion>,
        state: &mut ConnectionState,
    ) -> Result<IpcMessage, HandlerError> {
        let version = match self.codec.negotiate(requested) {
            Ok(version) => version,
            Err(e) => {
                self.report_protocol_error(state.identity(), &e);
                return Err(e.into());
            }
        };

        let session = self.auth.authenticate(token, state.identity())?;
        if let Some(previous) = state.session.replace(session.clone()) {
            self.auth.revoke(&previous);
        }
        state.version = version;

        Ok(IpcMessage::HandshakeAck {
            session_id: session.to_hex(),
            protocol_version: version,
        })
    }

    /// Without a session, every request spends the identity's exempt budget.
    fn charge_unauthenticated(&self, state: &ConnectionState) -> Result<(), HandlerError> {
        if state.session.is_none() {
            self.auth.check_exempt(state.identity())?;
        }
        Ok(())
    }

    fn require_session(&self, state: &mut ConnectionState) -> Result<(), HandlerError> {
        let token = state.session.as_ref().ok_or(HandlerError::NotAuthenticated)?;
        match self.auth.validate(token) {
            Ok(()) => Ok(()),
            Err(e @ (AuthError::SessionExpired | AuthError::SessionNotFound)) => {
                state.session = None;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_inference(
        &self,
        caller: &CallerIdentity,
        request: InferenceRequest,
    ) -> InferenceResponse {
        if let Err(e) = request.validate() {
            return InferenceResponse::error(request.request_id, e.to_string());
        }
        self.backend.infer(caller, request).await
    }

    /// Audit and count a rejected frame or payload.
    pub fn report_protocol_error(&self, identity: &str, err: &ProtocolError) {
        let (event, reason) = match err {
            ProtocolError::MessageTooLarge { .. } => (SecurityEvent::OversizedFrame, "too_large"),
            ProtocolError::UnsupportedVersion { .. } => {
                (SecurityEvent::DowngradeRejected, "unsupported_version")
            }
            ProtocolError::Malformed(_) => (SecurityEvent::ProtocolViolation, "malformed"),
        };
        telemetry::record_frame_rejected(reason);
        let detail = err.to_string();
        self.audit.emit(
            event,
            AUDIT_SOURCE,
            "Frame rejected",
            &[("identity", identity), ("reason", detail.as_str())],
        );
    }
}

impl std::fmt::Debug for IpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcHandler")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
