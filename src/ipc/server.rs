//! IPC server loop for accepting and processing connections.
//!
//! Frames are read through [`FrameCodec`], so size and version checks happen
//! on the header before any payload is buffered. A protocol violation gets
//! one `error` frame and then the connection is closed.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use super::connections::{ConnectionPool, OwnedConnectionGuard};
use super::handler::{ConnectionState, HandlerError, IpcHandler};
use super::protocol::{encode_message, IpcMessage, ProtocolError};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Handle one IPC connection: read frames, dispatch, write replies.
///
/// `identity` is the transport-level caller identity used for rate limits
/// and audit records. The guard is held until the connection ends. When
/// `shutdown` fires the connection closes before reading another frame.
pub async fn handle_connection<S>(
    mut stream: S,
    identity: String,
    handler: Arc<IpcHandler>,
    _guard: OwnedConnectionGuard,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let codec = *handler.codec();
    let mut state = ConnectionState::new(identity);

    loop {
        let read = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(identity = %state.identity(), "Closing connection for shutdown");
                break;
            }
            read = codec.read_frame(&mut stream) => read,
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            // Client disconnected
            Ok(None) => break,
            Err(ServerError::Protocol(e)) => {
                handler.report_protocol_error(state.identity(), &e);
                let reply = HandlerError::from(e).to_message();
                let _ = send(&codec, &mut stream, &state, &reply).await;
                break;
            }
            Err(ServerError::Io(e)) => {
                tracing::debug!(identity = %state.identity(), error = %e, "Connection read error");
                break;
            }
        };

        let (reply, close) = match handler.handle_frame(&frame, &mut state).await {
            Ok(reply) => (reply, false),
            Err(e) => (e.to_message(), e.is_fatal()),
        };
        if let Err(e) = send(&codec, &mut stream, &state, &reply).await {
            tracing::debug!(identity = %state.identity(), error = %e, "Connection write error");
            break;
        }
        if close || shutdown.is_cancelled() {
            break;
        }
    }
}

async fn send<S>(
    codec: &FrameCodec,
    stream: &mut S,
    state: &ConnectionState,
    reply: &IpcMessage,
) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    let payload = encode_message(reply)?;
    codec
        .write_frame(stream, state.protocol_version(), &payload)
        .await
}

/// Acquire a slot and spawn a connection task that stops with `shutdown`.
/// Returns false when the connection was refused at the limit.
pub fn spawn_connection<S>(
    stream: S,
    identity: String,
    handler: &Arc<IpcHandler>,
    connections: &Arc<ConnectionPool>,
    shutdown: &CancellationToken,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let guard = match connections.try_acquire_owned() {
        Some(g) => g,
        None => {
            tracing::warn!(
                identity = %identity,
                max = connections.max_connections(),
                "Connection limit reached, rejecting client"
            );
            return false;
        }
    };
    let handler = Arc::clone(handler);
    let shutdown = shutdown.child_token();
    tokio::spawn(async move {
        handle_connection(stream, identity, handler, guard, shutdown).await;
    });
    true
}

/// Run the IPC server on a Unix domain socket until `shutdown` fires.
///
/// Callers are identified by peer uid (`uid:<n>`).
#[cfg(unix)]
pub async fn serve(
    socket_path: &std::path::Path,
    handler: Arc<IpcHandler>,
    connections: Arc<ConnectionPool>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    use tokio::net::UnixListener;

    let _ = std::fs::remove_file(socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    restrict_socket(socket_path)?;
    tracing::info!(path = %socket_path.display(), "IPC server listening");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("IPC server shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let identity = match stream.peer_cred() {
                            Ok(cred) => format!("uid:{}", cred.uid()),
                            Err(_) => "uid:unknown".to_string(),
                        };
                        spawn_connection(stream, identity, &handler, &connections, &shutdown);
                    }
                    Err(e) => tracing::warn!(error = %e, "Accept error"),
                }
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

/// Owner-only socket permissions.
#[cfg(unix)]
fn restrict_socket(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
