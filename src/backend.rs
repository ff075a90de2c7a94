//! Seam to the inference engine behind the trust boundary.
//!
//! Only requests that passed session validation reach a backend. The
//! backend's response travels back to the caller unchanged.

use crate::ipc::{InferenceRequest, InferenceResponse, ProtocolVersion};

/// Who is asking, as established by the transport and the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Transport identity, e.g. `uid:1000`.
    pub identity: String,
    /// Version negotiated for this connection.
    pub protocol_version: ProtocolVersion,
}

/// External inference engine.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, caller: &CallerIdentity, request: InferenceRequest) -> InferenceResponse;
}

/// Backend used when nothing is attached: every request gets an error
/// response.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedBackend;

#[async_trait::async_trait]
impl InferenceBackend for DetachedBackend {
    async fn infer(&self, _caller: &CallerIdentity, request: InferenceRequest) -> InferenceResponse {
        InferenceResponse::error(request.request_id, "no inference backend attached".into())
    }
}
