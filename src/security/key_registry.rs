//! Versioned key storage with rotation.
//!
//! Exactly one key is Active at any time. Rotation generates a fresh key,
//! promotes it and demotes the previous Active key to Retired inside a single
//! write-lock critical section, so readers never observe zero or two Active
//! keys. Retired keys remain available for decryption only.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::audit::AuditTrail;
use super::encryption::{CryptoError, KEY_SIZE};
use super::secret::SecretMaterial;
use crate::telemetry::{record_key_rotation, SecurityEvent};

/// Key ID type (4 bytes, supports ~4 billion key versions)
pub type KeyId = u32;

/// Lifecycle state of a registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Used for new encryptions.
    Active,
    /// Decrypt-only.
    Retired,
}

struct KeyEntry {
    key: Arc<SecretMaterial>,
    #[allow(dead_code)]
    created_at: SystemTime,
    status: KeyStatus,
}

struct RegistryState {
    keys: BTreeMap<KeyId, KeyEntry>,
    active: KeyId,
    active_key: Arc<SecretMaterial>,
}

/// Process-wide key registry shared by every encryption engine.
pub struct KeyRegistry {
    state: RwLock<RegistryState>,
    audit: AuditTrail,
}

impl KeyRegistry {
    /// Registry whose first Active key is `initial` with key_id 1.
    pub fn new(initial: SecretMaterial) -> Result<Self, CryptoError> {
        Self::with_first_id(1, initial)
    }

    /// Registry whose first Active key carries `first_id`.
    pub fn with_first_id(first_id: KeyId, initial: SecretMaterial) -> Result<Self, CryptoError> {
        check_key_len(&initial)?;
        let key = Arc::new(initial);
        let mut keys = BTreeMap::new();
        keys.insert(
            first_id,
            KeyEntry {
                key: Arc::clone(&key),
                created_at: SystemTime::now(),
                status: KeyStatus::Active,
            },
        );
        Ok(Self {
            state: RwLock::new(RegistryState {
                keys,
                active: first_id,
                active_key: key,
            }),
            audit: AuditTrail::tracing_only(),
        })
    }

    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    /// Consistent snapshot of the Active key id and material.
    pub fn active(&self) -> (KeyId, Arc<SecretMaterial>) {
        let state = self.state.read();
        (state.active, Arc::clone(&state.active_key))
    }

    pub fn active_key_id(&self) -> KeyId {
        self.state.read().active
    }

    /// Key material and status for `key_id`, Active or Retired.
    pub fn get(&self, key_id: KeyId) -> Option<(KeyStatus, Arc<SecretMaterial>)> {
        self.state
            .read()
            .keys
            .get(&key_id)
            .map(|entry| (entry.status, Arc::clone(&entry.key)))
    }

    pub fn status(&self, key_id: KeyId) -> Option<KeyStatus> {
        self.state.read().keys.get(&key_id).map(|entry| entry.status)
    }

    /// All registered ids in ascending order.
    pub fn key_ids(&self) -> Vec<KeyId> {
        self.state.read().keys.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generate a new key and make it Active; the previous Active key is
    /// Retired. Fails with `KeyIdExhausted` instead of wrapping.
    pub fn rotate(&self) -> Result<KeyId, CryptoError> {
        self.install(SecretMaterial::random(KEY_SIZE))
    }

    /// Promote caller-supplied key material, e.g. a key restored from an
    /// external store.
    pub fn rotate_to(&self, key: SecretMaterial) -> Result<KeyId, CryptoError> {
        check_key_len(&key)?;
        self.install(key)
    }

    fn install(&self, key: SecretMaterial) -> Result<KeyId, CryptoError> {
        let (previous, new_id) = {
            let mut state = self.state.write();
            let highest = state.keys.keys().next_back().copied().unwrap_or(state.active);
            let new_id = highest.checked_add(1).ok_or(CryptoError::KeyIdExhausted)?;

            let previous = state.active;
            if let Some(entry) = state.keys.get_mut(&previous) {
                entry.status = KeyStatus::Retired;
            }
            let key = Arc::new(key);
            state.keys.insert(
                new_id,
                KeyEntry {
                    key: Arc::clone(&key),
                    created_at: SystemTime::now(),
                    status: KeyStatus::Active,
                },
            );
            state.active = new_id;
            state.active_key = key;
            (previous, new_id)
        };

        record_key_rotation();
        let (previous, new_id_text) = (previous.to_string(), new_id.to_string());
        self.audit.emit(
            SecurityEvent::KeyRotated,
            "key_registry",
            "Active key rotated",
            &[
                ("previous_key_id", previous.as_str()),
                ("key_id", new_id_text.as_str()),
            ],
        );
        Ok(new_id)
    }
}

fn check_key_len(key: &SecretMaterial) -> Result<(), CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(())
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("KeyRegistry")
            .field("active", &state.active)
            .field("keys", &state.keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecretMaterial {
        SecretMaterial::from_slice(&[byte; KEY_SIZE])
    }

    #[test]
    fn starts_with_single_active_key() {
        let registry = KeyRegistry::new(key(1)).unwrap();
        assert_eq!(registry.active_key_id(), 1);
        assert_eq!(registry.status(1), Some(KeyStatus::Active));
        assert_eq!(registry.key_ids(), vec![1]);
    }

    #[test]
    fn rotation_retires_previous_key() {
        let registry = KeyRegistry::new(key(1)).unwrap();
        let id2 = registry.rotate().unwrap();

        assert_eq!(id2, 2);
        assert_eq!(registry.active_key_id(), 2);
        assert_eq!(registry.status(1), Some(KeyStatus::Retired));
        assert_eq!(registry.status(2), Some(KeyStatus::Active));

        let (status, old) = registry.get(1).unwrap();
        assert_eq!(status, KeyStatus::Retired);
        assert_eq!(old.expose(), &[1u8; KEY_SIZE]);
    }

    #[test]
    fn exactly_one_active_after_many_rotations() {
        let registry = KeyRegistry::new(key(1)).unwrap();
        for _ in 0..10 {
            registry.rotate().unwrap();
        }
        let active = registry
            .key_ids()
            .into_iter()
            .filter(|id| registry.status(*id) == Some(KeyStatus::Active))
            .count();
        assert_eq!(active, 1);
        assert_eq!(registry.active_key_id(), 11);
    }

    #[test]
    fn id_space_exhaustion_is_an_error() {
        let registry = KeyRegistry::with_first_id(u32::MAX, key(9)).unwrap();
        assert!(matches!(registry.rotate(), Err(CryptoError::KeyIdExhausted)));
        assert_eq!(registry.active_key_id(), u32::MAX);
        assert_eq!(registry.status(u32::MAX), Some(KeyStatus::Active));
    }

    #[test]
    fn rejects_short_key() {
        let result = KeyRegistry::new(SecretMaterial::from_slice(&[0u8; 16]));
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn rotate_to_uses_supplied_material() {
        let registry = KeyRegistry::new(key(1)).unwrap();
        let id = registry.rotate_to(key(0xAB)).unwrap();
        let (active_id, material) = registry.active();
        assert_eq!(active_id, id);
        assert_eq!(material.expose(), &[0xAB; KEY_SIZE]);
    }

    #[test]
    fn concurrent_rotations_assign_unique_ids() {
        let registry = Arc::new(KeyRegistry::new(key(1)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.rotate().unwrap())
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.len(), 9);
    }
}
