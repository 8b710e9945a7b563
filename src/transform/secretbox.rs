// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! XSalsa20-Poly1305 (NaCl secretbox) transformer.
//!
//! On-storage layout: `nonce (24) ‖ ciphertext ‖ tag (16)`. Secretbox has no
//! additional-data input, so `data_ctx` is not bound to the value.

use async_trait::async_trait;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use ring::rand::{SecureRandom, SystemRandom};

use super::error::TransformError;
use super::Transformer;

/// Secretbox key size in bytes.
pub const SECRETBOX_KEY_SIZE: usize = 32;

/// Secretbox nonce size in bytes.
pub const SECRETBOX_NONCE_SIZE: usize = 24;

/// Secretbox authentication tag size in bytes.
pub const SECRETBOX_TAG_SIZE: usize = 16;

/// A transformer sealing values with XSalsa20-Poly1305 under a fixed key.
pub struct SecretboxTransformer {
    cipher: XSalsa20Poly1305,
    rng: SystemRandom,
}

impl SecretboxTransformer {
    /// Creates a transformer from raw key material. The key must be exactly
    /// 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, TransformError> {
        if key.len() != SECRETBOX_KEY_SIZE {
            return Err(TransformError::InvalidKeyLength {
                expected: SECRETBOX_KEY_SIZE.to_string(),
                got: key.len(),
            });
        }
        let cipher = XSalsa20Poly1305::new_from_slice(key)
            .map_err(|e| TransformError::Encrypt(e.to_string()))?;
        Ok(Self {
            cipher,
            rng: SystemRandom::new(),
        })
    }
}

#[async_trait]
impl Transformer for SecretboxTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        _data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let mut nonce = [0u8; SECRETBOX_NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| TransformError::Encrypt("failed to generate nonce".into()))?;

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| TransformError::Encrypt("secretbox seal failed".into()))?;

        let mut out = Vec::with_capacity(SECRETBOX_NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        _data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.len() < SECRETBOX_NONCE_SIZE + SECRETBOX_TAG_SIZE {
            return Err(TransformError::MalformedValue(
                "ciphertext shorter than nonce and tag".into(),
            ));
        }
        let (nonce, sealed) = stored.split_at(SECRETBOX_NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| TransformError::Decrypt("secretbox open failed".into()))?;
        Ok((plaintext, false))
    }
}
