//! GG Trust
//!
//! Trust-boundary core of a local inference runtime: caller authentication,
//! session lifecycle, bounded framing of untrusted input, and authenticated
//! encryption of model material at rest with key rotation.
//!
//! # Security Boundaries
//!
//! - IPC: Unix domain sockets only, length-prefixed and versioned frames.
//!   No HTTP/REST/WebSocket.
//! - Sessions: opaque 32-byte tokens, never persisted, never logged.
//! - Keys: derived per installation, wiped from memory on drop.
//! - Nonces: one process-wide ledger shared by every encryption engine.

pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod ipc;
pub mod security;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use backend::InferenceBackend;
use clock::{Clock, SystemClock};
use config::{ConfigError, TrustConfig};
use ipc::{ConnectionConfig, ConnectionPool, FrameCodec, IpcHandler, ProtocolVersion, SessionAuth};
use security::{
    default_salt_path, installation_root_key, run_power_on_self_tests, AuditTrail, CryptoError,
    EncryptionEngine, KeyRegistry, NonceLedger, SecretMaterial, SelfTestError,
};

/// How long [`TrustRuntime::shutdown`] waits for open connections to close.
pub const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Self-test failed: {0}")]
    SelfTest(#[from] SelfTestError),

    #[error("No handshake credential configured (set GG_TRUST_AUTH_TOKEN)")]
    MissingCredential,
}

/// Process-wide trust context. Created once at startup; every component
/// shares its ledger, registry and session store.
pub struct TrustRuntime {
    config: TrustConfig,
    codec: FrameCodec,
    auth: Arc<SessionAuth>,
    ledger: Arc<NonceLedger>,
    registry: Arc<KeyRegistry>,
    connections: Arc<ConnectionPool>,
    audit: AuditTrail,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TrustRuntime {
    /// Build a runtime around a known credential and root key.
    pub fn new(
        config: TrustConfig,
        credential: SecretMaterial,
        root_key: SecretMaterial,
    ) -> Result<Self, RuntimeError> {
        Self::with_parts(
            config,
            credential,
            root_key,
            Arc::new(SystemClock),
            AuditTrail::tracing_only(),
        )
    }

    /// [`new`](Self::new) with an explicit clock and audit trail.
    pub fn with_parts(
        config: TrustConfig,
        credential: SecretMaterial,
        root_key: SecretMaterial,
        clock: Arc<dyn Clock>,
        audit: AuditTrail,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        if credential.is_empty() {
            return Err(RuntimeError::MissingCredential);
        }

        let registry = Arc::new(KeyRegistry::new(root_key)?.with_audit(audit.clone()));
        let ledger = Arc::new(NonceLedger::new(config.encryption.nonce_ledger_capacity));
        let auth = Arc::new(
            SessionAuth::new(&credential, config.auth.clone())
                .with_clock(clock)
                .with_audit(audit.clone()),
        );
        let codec = FrameCodec::new(
            config.protocol.max_message_bytes,
            ProtocolVersion(config.protocol.min_protocol_version),
        );
        let connections = Arc::new(ConnectionPool::new(ConnectionConfig {
            max_connections: config.server.max_connections,
        }));

        tracing::info!(
            max_message_bytes = config.protocol.max_message_bytes,
            min_protocol_version = config.protocol.min_protocol_version,
            active_key_id = registry.active_key_id(),
            "Trust runtime initialized"
        );

        Ok(Self {
            config,
            codec,
            auth,
            ledger,
            registry,
            connections,
            audit,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Production startup: self-tests, credential from config, installation
    /// salt and machine identity into the root key.
    pub fn bootstrap(config: TrustConfig) -> Result<Self, RuntimeError> {
        run_power_on_self_tests()?;
        config.validate()?;
        if config.auth_token.is_empty() {
            return Err(RuntimeError::MissingCredential);
        }

        let credential = SecretMaterial::from_slice(config.auth_token.as_bytes());
        let salt_path = match &config.encryption.salt_path {
            Some(path) => path.clone(),
            None => default_salt_path()?,
        };
        let root_key = installation_root_key(&salt_path, config.encryption.kdf_iterations)?;
        Self::new(config, credential, root_key)
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn auth(&self) -> &Arc<SessionAuth> {
        &self.auth
    }

    pub fn ledger(&self) -> &Arc<NonceLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionPool> {
        &self.connections
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// A fresh engine over the shared ledger and key registry.
    pub fn encryption_engine(&self) -> EncryptionEngine {
        EncryptionEngine::new(Arc::clone(&self.registry), Arc::clone(&self.ledger))
            .with_retry_limit(self.config.encryption.nonce_retry_limit)
            .with_audit(self.audit.clone())
    }

    /// Request dispatcher bound to this runtime.
    pub fn ipc_handler(&self, backend: Arc<dyn InferenceBackend>) -> Arc<IpcHandler> {
        Arc::new(IpcHandler::new(
            Arc::clone(&self.auth),
            self.codec,
            backend,
            self.audit.clone(),
        ))
    }

    /// Start periodic session cleanup; stopped by [`shutdown`](Self::shutdown).
    pub fn spawn_session_reaper(&self) {
        let handle = self.auth.spawn_reaper(self.shutdown.child_token());
        self.tasks.lock().push(handle);
    }

    /// Serve IPC on the configured socket until shutdown.
    #[cfg(unix)]
    pub async fn serve(&self, backend: Arc<dyn InferenceBackend>) -> Result<(), ipc::ServerError> {
        ipc::serve(
            &self.config.server.socket_path,
            self.ipc_handler(backend),
            Arc::clone(&self.connections),
            self.shutdown.child_token(),
        )
        .await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop background tasks, drain open connections and revoke every
    /// session. Returns the number of sessions revoked.
    ///
    /// Connections spawned with a child of [`shutdown_token`](Self::shutdown_token)
    /// close before reading their next frame, so none can open a session
    /// after the revocation.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        let remaining = self
            .connections
            .wait_for_drain(CONNECTION_DRAIN_TIMEOUT)
            .await;
        if remaining > 0 {
            tracing::warn!(remaining, "Connections still open after drain timeout");
        }

        let revoked = self.auth.revoke_all();
        tracing::info!(revoked, "Trust runtime stopped");
        revoked
    }
}

impl std::fmt::Debug for TrustRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRuntime")
            .field("config", &self.config)
            .field("codec", &self.codec)
            .field("sessions", &self.auth.session_count())
            .field("active_key_id", &self.registry.active_key_id())
            .finish_non_exhaustive()
    }
}
