//! Authenticated encryption of model blobs at rest.
//!
//! AES-256-GCM under keys from the [`KeyRegistry`]. Every nonce is recorded
//! in the process-wide [`NonceLedger`] before use; a draw that collides is
//! retried a bounded number of times, after which the engine halts (fails
//! closed) until an operator clears the alarm.
//!
//! Decryption failures are uniform: a wrong key, a flipped ciphertext bit and
//! an edited header all surface as [`CryptoError::DecryptionFailed`].

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use super::audit::AuditTrail;
use super::blob::{BlobHeader, EncryptedBlob, HEADER_LEN};
use super::key_registry::{KeyId, KeyRegistry, KeyStatus};
use super::nonce_ledger::NonceLedger;
use super::secret::SecretMaterial;
use crate::telemetry::{record_decryption_failure, record_nonce_collision, SecurityEvent};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Default bound on nonce redraws after a ledger collision.
pub const DEFAULT_NONCE_RETRY_LIMIT: u32 = 3;

/// Encryption, key and blob errors. Messages never contain key, nonce or
/// plaintext bytes.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("nonce reuse detected; encryption halted until cleared")]
    NonceReuseDetected,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("key {0} not found")]
    KeyNotFound(KeyId),
    #[error("key derivation failed: {0}")]
    KdfFailure(&'static str),
    #[error("malformed blob: {0}")]
    Malformed(&'static str),
    #[error("key {0} is retired and cannot encrypt")]
    KeyRetired(KeyId),
    #[error("key id space exhausted")]
    KeyIdExhausted,
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of 96-bit nonces.
pub trait NonceSource: Send + Sync {
    fn fill(&self, nonce: &mut [u8; NONCE_SIZE]);
}

/// Nonces straight from the OS CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn fill(&self, nonce: &mut [u8; NONCE_SIZE]) {
        rand::rngs::OsRng.fill_bytes(nonce);
    }
}

/// Always yields the same nonce. Simulates a stuck RNG in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedNonceSource {
    nonce: [u8; NONCE_SIZE],
}

impl FixedNonceSource {
    pub fn new(nonce: [u8; NONCE_SIZE]) -> Self {
        Self { nonce }
    }
}

impl NonceSource for FixedNonceSource {
    fn fill(&self, nonce: &mut [u8; NONCE_SIZE]) {
        *nonce = self.nonce;
    }
}

/// Encrypts and decrypts blobs. Cheap to create; instances share the
/// registry and ledger but each carries its own halt flag.
pub struct EncryptionEngine {
    registry: Arc<KeyRegistry>,
    ledger: Arc<NonceLedger>,
    nonce_source: Arc<dyn NonceSource>,
    retry_limit: u32,
    halted: AtomicBool,
    audit: AuditTrail,
}

impl EncryptionEngine {
    pub fn new(registry: Arc<KeyRegistry>, ledger: Arc<NonceLedger>) -> Self {
        Self {
            registry,
            ledger,
            nonce_source: Arc::new(OsNonceSource),
            retry_limit: DEFAULT_NONCE_RETRY_LIMIT,
            halted: AtomicBool::new(false),
            audit: AuditTrail::tracing_only(),
        }
    }

    /// Engine over a private registry and ledger holding one key.
    pub fn from_key(key: SecretMaterial) -> Result<Self, CryptoError> {
        Ok(Self::new(
            Arc::new(KeyRegistry::new(key)?),
            Arc::new(NonceLedger::default()),
        ))
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_nonce_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.nonce_source = source;
        self
    }

    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn active_key_id(&self) -> KeyId {
        self.registry.active_key_id()
    }

    /// Rotate the shared registry to a fresh key.
    pub fn rotate(&self) -> Result<KeyId, CryptoError> {
        self.registry.rotate()
    }

    /// Encrypt under the current Active key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        self.ensure_running()?;
        let (key_id, key) = self.registry.active();
        self.seal(key_id, &key, plaintext)
    }

    /// Encrypt under a specific key, which must still be Active.
    pub fn encrypt_with_key(
        &self,
        key_id: KeyId,
        plaintext: &[u8],
    ) -> Result<EncryptedBlob, CryptoError> {
        self.ensure_running()?;
        match self.registry.get(key_id) {
            None => Err(CryptoError::KeyNotFound(key_id)),
            Some((KeyStatus::Retired, _)) => Err(CryptoError::KeyRetired(key_id)),
            Some((KeyStatus::Active, key)) => self.seal(key_id, &key, plaintext),
        }
    }

    /// Parse and decrypt a serialized blob.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let header = BlobHeader::parse(data)?;
        self.open(&header, &data[HEADER_LEN..])
    }

    pub fn decrypt_blob(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, CryptoError> {
        self.open(blob.header(), blob.sealed())
    }

    /// Decrypt `data` and, if it was sealed under a key other than the Active
    /// one, re-encrypt it under the Active key. `None` means already current.
    pub fn reencrypt_if_stale(&self, data: &[u8]) -> Result<Option<EncryptedBlob>, CryptoError> {
        let header = BlobHeader::parse(data)?;
        if header.key_id == self.registry.active_key_id() {
            return Ok(None);
        }
        let plaintext = Zeroizing::new(self.open(&header, &data[HEADER_LEN..])?);
        self.encrypt(&plaintext).map(Some)
    }

    /// Whether nonce retries were exhausted and encryption is refused.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Resume encryption after a nonce alarm has been investigated.
    pub fn clear_nonce_alarm(&self) {
        if self.halted.swap(false, Ordering::AcqRel) {
            self.audit.emit(
                SecurityEvent::NonceAlarmCleared,
                "encryption",
                "Nonce alarm cleared; encryption resumed",
                &[],
            );
        }
    }

    /// Encrypt `input` to `output`, replacing `output` atomically.
    pub fn encrypt_file(&self, input: &Path, output: &Path) -> Result<(), CryptoError> {
        let plaintext = Zeroizing::new(std::fs::read(input)?);
        let blob = self.encrypt(&plaintext)?;
        write_atomic(output, &blob.to_bytes())
    }

    /// Decrypt `input` to `output`, replacing `output` atomically.
    pub fn decrypt_file(&self, input: &Path, output: &Path) -> Result<(), CryptoError> {
        let data = std::fs::read(input)?;
        let plaintext = Zeroizing::new(self.decrypt(&data)?);
        write_atomic(output, &plaintext)
    }

    /// Re-encrypt `path` in place if it is under a retired key. Returns
    /// whether the file was rewritten.
    pub fn migrate_file(&self, path: &Path) -> Result<bool, CryptoError> {
        let data = std::fs::read(path)?;
        match self.reencrypt_if_stale(&data)? {
            Some(blob) => {
                write_atomic(path, &blob.to_bytes())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ensure_running(&self) -> Result<(), CryptoError> {
        if self.is_halted() {
            return Err(CryptoError::NonceReuseDetected);
        }
        Ok(())
    }

    /// Draw a nonce and record it in the ledger in one step. Collisions are
    /// redrawn up to `retry_limit` times; exhaustion halts the engine.
    fn reserve_nonce(&self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        for attempt in 0..=self.retry_limit {
            self.nonce_source.fill(&mut nonce);
            if self.ledger.check_and_insert(&nonce) {
                return Ok(nonce);
            }
            record_nonce_collision();
            let attempt = (attempt + 1).to_string();
            self.audit.emit(
                SecurityEvent::NonceCollision,
                "encryption",
                "Nonce already recorded; redrawing",
                &[("attempt", attempt.as_str())],
            );
        }

        self.halted.store(true, Ordering::Release);
        let retries = self.retry_limit.to_string();
        self.audit.emit(
            SecurityEvent::NonceReuseDetected,
            "encryption",
            "Nonce retries exhausted; RNG health suspect, encryption halted",
            &[("retries", retries.as_str())],
        );
        Err(CryptoError::NonceReuseDetected)
    }

    fn seal(
        &self,
        key_id: KeyId,
        key: &SecretMaterial,
        plaintext: &[u8],
    ) -> Result<EncryptedBlob, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = self.reserve_nonce()?;
        let header = BlobHeader::new(key_id, nonce, plaintext.len() as u64);
        let aad = header.to_bytes();

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedBlob::from_parts(header, sealed))
    }

    fn open(&self, header: &BlobHeader, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (_, key) = self
            .registry
            .get(header.key_id)
            .ok_or(CryptoError::KeyNotFound(header.key_id))?;
        let cipher =
            Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::DecryptionFailed)?;
        let aad = header.to_bytes();

        cipher
            .decrypt(
                Nonce::from_slice(&header.nonce),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                record_decryption_failure();
                let key_id = header.key_id.to_string();
                self.audit.emit(
                    SecurityEvent::DecryptionFailed,
                    "encryption",
                    "Blob failed authentication",
                    &[("key_id", key_id.as_str())],
                );
                CryptoError::DecryptionFailed
            })
    }
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("registry", &self.registry)
            .field("retry_limit", &self.retry_limit)
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

/// Write through a temp file in the destination directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CryptoError::Io(e.error))?;
    Ok(())
}
