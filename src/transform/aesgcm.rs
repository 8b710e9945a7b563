// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AES-GCM transformer.
//!
//! On-storage layout: `nonce (12) ‖ ciphertext ‖ tag (16)`. The caller's
//! `data_ctx` is bound as additional authenticated data, so a value copied
//! under a different storage key fails authentication on read.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};

use super::error::TransformError;
use super::Transformer;

/// AES-GCM nonce size in bytes.
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const AES_GCM_TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// A transformer sealing values with AES-GCM under a fixed key.
///
/// Accepts 16, 24 or 32 byte keys. Nonces are random per write; with the
/// volumes a single configured key sees before rotation this is safe, and
/// the configuration layer encourages rotation by reporting stale reads.
pub struct AesGcmTransformer {
    cipher: Cipher,
    rng: SystemRandom,
}

impl AesGcmTransformer {
    /// Creates a transformer from raw key material.
    pub fn new(key: &[u8]) -> Result<Self, TransformError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|e| TransformError::Encrypt(e.to_string()))?,
            )),
            24 => Cipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(|e| TransformError::Encrypt(e.to_string()))?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|e| TransformError::Encrypt(e.to_string()))?,
            )),
            got => {
                return Err(TransformError::InvalidKeyLength {
                    expected: "16, 24 or 32".to_string(),
                    got,
                })
            }
        };
        Ok(Self {
            cipher,
            rng: SystemRandom::new(),
        })
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, TransformError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let sealed = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, payload),
            Cipher::Aes192(c) => c.encrypt(nonce, payload),
            Cipher::Aes256(c) => c.encrypt(nonce, payload),
        };
        sealed.map_err(|_| TransformError::Encrypt("AES-GCM seal failed".into()))
    }

    fn open(&self, nonce: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, TransformError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: sealed, aad };
        let opened = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, payload),
            Cipher::Aes192(c) => c.decrypt(nonce, payload),
            Cipher::Aes256(c) => c.decrypt(nonce, payload),
        };
        opened.map_err(|_| TransformError::Decrypt("AES-GCM open failed".into()))
    }
}

#[async_trait]
impl Transformer for AesGcmTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| TransformError::Encrypt("failed to generate nonce".into()))?;

        let sealed = self.seal(&nonce, plaintext, data_ctx)?;

        let mut out = Vec::with_capacity(AES_GCM_NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(TransformError::MalformedValue(
                "ciphertext shorter than nonce and tag".into(),
            ));
        }
        let (nonce, sealed) = stored.split_at(AES_GCM_NONCE_SIZE);
        let plaintext = self.open(nonce, sealed, data_ctx)?;
        Ok((plaintext, false))
    }
}
