// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptography
//!
//! - `envelope` - per-document AEAD encryption and master-key wrapping
//! - [`constant_time_eq`] - secret comparison for shared-secret headers

pub mod envelope;

pub use envelope::{
    decrypt, encrypt, generate_document_key, unwrap_key, wrap_key, CryptoError, DocumentKey,
    MasterKey, KEY_LEN,
};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compare two secrets without leaking the position of the first mismatch.
///
/// Both inputs are MACed under a fixed key and the tags are compared with
/// `verify_slice`, which is constant-time.
pub fn constant_time_eq(provided: &[u8], expected: &[u8]) -> bool {
    let tag_of = |input: &[u8]| {
        let mut mac = match HmacSha256::new_from_slice(b"secret-compare") {
            Ok(mac) => mac,
            Err(_) => return None,
        };
        mac.update(input);
        Some(mac)
    };

    let (Some(expected_mac), Some(provided_mac)) = (tag_of(expected), tag_of(provided)) else {
        return false;
    };
    let expected_tag = expected_mac.finalize().into_bytes();
    provided_mac.verify_slice(&expected_tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_inputs_only() {
        assert!(constant_time_eq(b"cron-secret", b"cron-secret"));
        assert!(!constant_time_eq(b"cron-secret", b"cron-secreT"));
        assert!(!constant_time_eq(b"", b"cron-secret"));
        assert!(!constant_time_eq(b"cron-secret-longer", b"cron-secret"));
    }
}
