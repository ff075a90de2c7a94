//! Zeroizing container for raw key and credential bytes.
//!
//! # Security
//! - Every instance, including clones, overwrites its buffer on drop
//! - `Debug` never prints the contents
//! - Equality is constant-time

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Owned secret bytes that are wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretMaterial {
    bytes: Box<[u8]>,
}

impl SecretMaterial {
    /// Take ownership of `bytes`. If the vector has spare capacity the
    /// contents are copied into an exact-size buffer and the vector is
    /// wiped, so no stale copy survives a reallocation.
    pub fn new(mut bytes: Vec<u8>) -> Self {
        if bytes.capacity() == bytes.len() {
            return Self {
                bytes: bytes.into_boxed_slice(),
            };
        }
        let exact: Box<[u8]> = bytes.as_slice().into();
        bytes.zeroize();
        Self { bytes: exact }
    }

    /// Copy bytes out of a slice. The caller remains responsible for the
    /// source buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// A zero-filled buffer of `len` bytes, to be written in place.
    pub(crate) fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// `len` bytes from the OS CSPRNG.
    pub fn random(len: usize) -> Self {
        let mut secret = Self::zeroed(len);
        rand::rngs::OsRng.fill_bytes(secret.expose_mut());
        secret
    }

    /// Borrow the raw bytes.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Constant-time equality. Lengths are public; contents are not.
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        constant_time_eq(&self.bytes, other)
    }
}

impl std::fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretMaterial([REDACTED; {}])", self.bytes.len())
    }
}

/// Byte-wise comparison that folds every position before deciding.
///
/// Differing lengths return false immediately; callers compare fixed-size
/// digests so the length is never secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}
