// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-document envelope encryption.
//!
//! Every document gets its own random 256-bit key. Document bytes are sealed
//! with AES-256-GCM under that key, and the key itself is sealed ("wrapped")
//! under the process-wide master key before it is persisted.
//!
//! ## Frame Layout
//!
//! ```text
//! [12-byte nonce][16-byte auth tag][ciphertext]
//! ```
//!
//! A fresh random nonce is drawn for every call. Wrapped keys use the same
//! frame, base64-encoded.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Smallest valid frame: nonce + tag with an empty ciphertext.
pub const MIN_FRAME_LEN: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Tampered data, wrong key, or broken framing.
    #[error("integrity check failed")]
    Integrity,

    #[error("secure random source unavailable")]
    Rng,

    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("cipher failure")]
    Cipher,
}

/// A per-document data key.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentKey([u8; KEY_LEN]);

impl DocumentKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentKey(<redacted>)")
    }
}

/// The server master key used to wrap document keys.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Parse a master key from exactly 64 hex characters.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim();
        if trimmed.len() != KEY_LEN * 2 {
            return Err(CryptoError::InvalidMasterKey(format!(
                "expected {} hex characters, got {}",
                KEY_LEN * 2,
                trimmed.len()
            )));
        }
        let bytes = hex::decode(trimmed)
            .map_err(|e| CryptoError::InvalidMasterKey(format!("not valid hex: {e}")))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidMasterKey("wrong length".to_string()))?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Generate a fresh random document key.
pub fn generate_document_key() -> Result<DocumentKey, CryptoError> {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| CryptoError::Rng)?;
    Ok(DocumentKey(key))
}

/// Encrypt `plaintext` under `key` into a `[nonce][tag][ciphertext]` frame.
pub fn encrypt(plaintext: &[u8], key: &DocumentKey) -> Result<Vec<u8>, CryptoError> {
    seal(plaintext, key.as_bytes())
}

/// Decrypt a frame produced by [`encrypt`].
pub fn decrypt(frame: &[u8], key: &DocumentKey) -> Result<Vec<u8>, CryptoError> {
    open(frame, key.as_bytes())
}

/// Wrap a document key under the master key as a base64 token.
pub fn wrap_key(file_key: &DocumentKey, master: &MasterKey) -> Result<String, CryptoError> {
    let frame = seal(file_key.as_bytes(), &master.0)?;
    Ok(Base64::encode_string(&frame))
}

/// Recover a document key from a token produced by [`wrap_key`].
pub fn unwrap_key(token: &str, master: &MasterKey) -> Result<DocumentKey, CryptoError> {
    let frame = Base64::decode_vec(token.trim()).map_err(|_| CryptoError::Integrity)?;
    let plaintext = open(&frame, &master.0)?;
    let bytes: [u8; KEY_LEN] = plaintext
        .try_into()
        .map_err(|_| CryptoError::Integrity)?;
    Ok(DocumentKey(bytes))
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::Cipher)?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let sealing_key = aead_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::Rng)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Cipher)?;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + in_out.len());
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(tag.as_ref());
    frame.extend_from_slice(&in_out);
    Ok(frame)
}

fn open(frame: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(CryptoError::Integrity);
    }
    let opening_key = aead_key(key)?;

    let (nonce_bytes, rest) = frame.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Integrity)?;

    // ring expects the tag appended to the ciphertext.
    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Integrity)?;
    Ok(plaintext.to_vec())
}
