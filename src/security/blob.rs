//! Versioned on-disk format for encrypted model blobs.
//!
//! ```text
//! [HLGCM][version:2][key_id:4][nonce:12][length:8][ciphertext:length][tag:16]
//! ```
//!
//! All integers are big-endian. The 31-byte header is bound into the AEAD as
//! associated data, so any header edit fails authentication.

use super::encryption::{CryptoError, NONCE_SIZE, TAG_SIZE};
use super::key_registry::KeyId;

/// Magic number for keyed, versioned blobs.
pub const BLOB_MAGIC: &[u8; 5] = b"HLGCM";

/// Current blob format version.
pub const BLOB_FORMAT_VERSION: u16 = 3;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 5 + 2 + 4 + NONCE_SIZE + 8;

/// Parsed blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub version: u16,
    pub key_id: KeyId,
    pub nonce: [u8; NONCE_SIZE],
    pub length: u64,
}

impl BlobHeader {
    pub(crate) fn new(key_id: KeyId, nonce: [u8; NONCE_SIZE], length: u64) -> Self {
        Self {
            version: BLOB_FORMAT_VERSION,
            key_id,
            nonce,
            length,
        }
    }

    /// Serialized header; also the AEAD associated data.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..5].copy_from_slice(BLOB_MAGIC);
        out[5..7].copy_from_slice(&self.version.to_be_bytes());
        out[7..11].copy_from_slice(&self.key_id.to_be_bytes());
        out[11..11 + NONCE_SIZE].copy_from_slice(&self.nonce);
        out[11 + NONCE_SIZE..HEADER_LEN].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Parse and check a header against the number of bytes that follow it.
    ///
    /// The declared length is compared to the real remaining byte count
    /// before anything else uses it, so it never drives an allocation.
    pub fn parse(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < HEADER_LEN + TAG_SIZE {
            return Err(CryptoError::Malformed("blob shorter than header and tag"));
        }
        if &data[0..5] != BLOB_MAGIC {
            return Err(CryptoError::Malformed("bad magic"));
        }

        let version = u16::from_be_bytes([data[5], data[6]]);
        if version != BLOB_FORMAT_VERSION {
            return Err(CryptoError::Malformed("unsupported blob version"));
        }

        let key_id = u32::from_be_bytes([data[7], data[8], data[9], data[10]]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[11..11 + NONCE_SIZE]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[11 + NONCE_SIZE..HEADER_LEN]);
        let length = u64::from_be_bytes(len_bytes);

        let body_len = (data.len() - HEADER_LEN - TAG_SIZE) as u64;
        if length != body_len {
            return Err(CryptoError::Malformed("declared length does not match blob size"));
        }

        Ok(Self {
            version,
            key_id,
            nonce,
            length,
        })
    }
}

/// An immutable encrypted blob: header plus ciphertext and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    header: BlobHeader,
    /// Ciphertext immediately followed by the 16-byte tag.
    sealed: Vec<u8>,
}

impl EncryptedBlob {
    pub(crate) fn from_parts(header: BlobHeader, sealed: Vec<u8>) -> Self {
        Self { header, sealed }
    }

    /// Parse a serialized blob. Performs no cryptographic work.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        let header = BlobHeader::parse(data)?;
        Ok(Self {
            header,
            sealed: data[HEADER_LEN..].to_vec(),
        })
    }

    pub fn header(&self) -> &BlobHeader {
        &self.header
    }

    pub fn key_id(&self) -> KeyId {
        self.header.key_id
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.header.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.sealed[..self.sealed.len() - TAG_SIZE]
    }

    pub fn tag(&self) -> &[u8] {
        &self.sealed[self.sealed.len() - TAG_SIZE..]
    }

    /// Ciphertext and tag as one slice, the shape the AEAD consumes.
    pub(crate) fn sealed(&self) -> &[u8] {
        &self.sealed
    }

    /// Total serialized size.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.sealed.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.sealed);
        out
    }
}
