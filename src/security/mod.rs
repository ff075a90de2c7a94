//! Cryptographic side of the trust boundary.
//!
//! - [`SecretMaterial`]: zeroizing key and credential bytes
//! - [`NonceLedger`]: process-wide record of used nonces
//! - [`EncryptionEngine`]: AES-256-GCM blobs with key rotation
//! - [`kdf`]: installation-bound root key derivation
//! - [`audit`]: structured security audit records
//! - [`self_test`]: power-on known-answer tests

pub mod audit;
pub mod blob;
pub mod encryption;
pub mod kdf;
pub mod key_registry;
pub mod nonce_ledger;
pub mod secret;

pub use audit::{AuditCategory, AuditEvent, AuditSink, AuditTrail, MemoryAuditLog, NullSink};
pub use blob::{BlobHeader, EncryptedBlob, BLOB_FORMAT_VERSION, BLOB_MAGIC, HEADER_LEN};
pub use encryption::{
    CryptoError, EncryptionEngine, FixedNonceSource, NonceSource, OsNonceSource, KEY_SIZE,
    NONCE_SIZE, TAG_SIZE,
};
pub use kdf::{
    default_salt_path, derive_root_key, installation_root_key, machine_identifier,
    InstallationSalt, DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS, MIN_SALT_SIZE,
};
pub use key_registry::{KeyId, KeyRegistry, KeyStatus};
pub use nonce_ledger::{NonceLedger, DEFAULT_LEDGER_CAPACITY};
pub use secret::{constant_time_eq, SecretMaterial};
pub use self_test::{run_power_on_self_tests, SelfTestError, SelfTestResults};
