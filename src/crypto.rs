//! At-rest encryption for ciphered buckets.
//!
//! Payloads are sealed with AES-256-GCM under a single process-wide key.
//! A fresh 12-byte nonce is drawn for every call and written in front of the
//! sealed bytes, so a stored blob is `nonce || ciphertext || tag` and can be
//! opened with nothing but the key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use std::{fmt, sync::Arc};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-256-GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-256 key size (256 bits).
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("cipher key is not configured")]
    MissingKey,
    #[error("cipher key must be exactly {KEY_SIZE} bytes (got {0})")]
    InvalidKeyLength(usize),
    #[error("cipher key is not valid base64")]
    InvalidKeyEncoding,
    #[error("ciphertext is shorter than one nonce ({0} bytes)")]
    Malformed(usize),
    #[error("ciphertext failed authentication")]
    Integrity,
    #[error("encryption failed")]
    Encrypt,
}

impl CryptoError {
    /// True for problems with the configured key rather than with the payload.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingKey | Self::InvalidKeyLength(_) | Self::InvalidKeyEncoding
        )
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Shared handle to the process-wide AEAD key.
///
/// A `Cipher` is always constructible; a missing or malformed key is kept as
/// the error every later `encrypt`/`decrypt` call reports, so only operations
/// on ciphered buckets fail when the key is absent.
#[derive(Clone)]
pub struct Cipher {
    aead: Result<Arc<Aes256Gcm>, CryptoError>,
}

impl Cipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> Self {
        if key.len() != KEY_SIZE {
            return Self {
                aead: Err(CryptoError::InvalidKeyLength(key.len())),
            };
        }
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()));
        Self {
            aead: aead.map(Arc::new),
        }
    }

    /// A cipher with no key. Every operation fails with [`CryptoError::MissingKey`].
    pub fn disabled() -> Self {
        Self {
            aead: Err(CryptoError::MissingKey),
        }
    }

    /// Parse the configured key: either exactly 32 raw bytes, or
    /// `base64:<...>` decoding to 32 bytes.
    pub fn from_config(value: Option<&str>) -> Self {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Self::disabled();
        };

        match value.strip_prefix("base64:") {
            Some(encoded) => match general_purpose::STANDARD.decode(encoded.trim()) {
                Ok(bytes) => {
                    let bytes = Zeroizing::new(bytes);
                    Self::new(&bytes)
                }
                Err(_) => Self {
                    aead: Err(CryptoError::InvalidKeyEncoding),
                },
            },
            None => Self::new(value.as_bytes()),
        }
    }

    /// Whether a usable key is loaded.
    pub fn is_configured(&self) -> bool {
        self.aead.is_ok()
    }

    /// The reason the key is unusable, if any.
    pub fn key_error(&self) -> Option<&CryptoError> {
        self.aead.as_ref().err()
    }

    fn aead(&self) -> CryptoResult<&Aes256Gcm> {
        self.aead.as_deref().map_err(Clone::clone)
    }

    /// Seal `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let aead = self.aead()?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a blob produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let aead = self.aead()?;

        if data.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed(data.len()));
        }

        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        aead.decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Integrity)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("configured", &self.is_configured())
            .finish()
    }
}
