//! IPC boundary: framing, session authentication and request dispatch.
//!
//! Unix domain socket transport with length-prefixed, versioned frames.
//! This is the ONLY external interface - no HTTP/REST/WebSocket allowed.

mod auth;
mod auth_session;
mod codec;
mod connections;
mod handler;
mod protocol;
mod server;

pub use auth::{AuthError, SessionAuth, SessionToken, SESSION_TOKEN_BYTES};
pub use codec::{Frame, FrameCodec, FrameHeader, FRAME_HEADER_LEN, MIN_MAX_MESSAGE_BYTES};
pub use connections::{ConnectionConfig, ConnectionPool, OwnedConnectionGuard};
pub use handler::{ConnectionState, HandlerError, IpcHandler};
pub use protocol::{
    decode_message, encode_message, InferenceRequest, InferenceResponse, IpcMessage,
    ProtocolError, ProtocolVersion, RequestId, CURRENT_PROTOCOL_VERSION,
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MIN_PROTOCOL_VERSION,
};
#[cfg(unix)]
pub use server::serve;
pub use server::{handle_connection, spawn_connection, ServerError};
