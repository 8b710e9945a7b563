// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AES-CBC transformer.
//!
//! On-storage layout: `iv (16) ‖ PKCS#7-padded ciphertext`. CBC carries no
//! authentication tag, so `data_ctx` is not bound to the value; the mode
//! exists for compatibility with configurations migrating off it.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::error::TransformError;
use super::Transformer;

/// AES block and IV size in bytes.
pub const AES_CBC_BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A transformer sealing values with AES-CBC under a fixed key.
///
/// Accepts 16, 24 or 32 byte keys. The key material is zeroized on drop.
pub struct AesCbcTransformer {
    key: Zeroizing<Vec<u8>>,
    rng: SystemRandom,
}

impl AesCbcTransformer {
    /// Creates a transformer from raw key material.
    pub fn new(key: &[u8]) -> Result<Self, TransformError> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Zeroizing::new(key.to_vec()),
                rng: SystemRandom::new(),
            }),
            got => Err(TransformError::InvalidKeyLength {
                expected: "16, 24 or 32".to_string(),
                got,
            }),
        }
    }

    fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TransformError> {
        let bad_key = |_| TransformError::Encrypt("invalid AES-CBC key".into());
        let out = match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => Aes192CbcEnc::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => Aes256CbcEnc::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        Ok(out)
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TransformError> {
        let bad_key = |_| TransformError::Decrypt("invalid AES-CBC key".into());
        let bad_pad = |_| TransformError::Decrypt("invalid PKCS#7 padding".into());
        match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(bad_pad),
            24 => Aes192CbcDec::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(bad_pad),
            _ => Aes256CbcDec::new_from_slices(&self.key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(bad_pad),
        }
    }
}

#[async_trait]
impl Transformer for AesCbcTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        _data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let mut iv = [0u8; AES_CBC_BLOCK_SIZE];
        self.rng
            .fill(&mut iv)
            .map_err(|_| TransformError::Encrypt("failed to generate IV".into()))?;

        let ciphertext = self.encrypt(&iv, plaintext)?;

        let mut out = Vec::with_capacity(AES_CBC_BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        _data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.len() < 2 * AES_CBC_BLOCK_SIZE {
            return Err(TransformError::MalformedValue(
                "ciphertext shorter than IV and one block".into(),
            ));
        }
        let (iv, ciphertext) = stored.split_at(AES_CBC_BLOCK_SIZE);
        if ciphertext.len() % AES_CBC_BLOCK_SIZE != 0 {
            return Err(TransformError::MalformedValue(
                "ciphertext is not block aligned".into(),
            ));
        }
        let plaintext = self.decrypt(iv, ciphertext)?;
        Ok((plaintext, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_all_key_sizes() {
        for size in [16usize, 24, 32] {
            let key = vec![0x17u8; size];
            let t = AesCbcTransformer::new(&key).unwrap();

            let stored = t.transform_to_storage(b"value", b"").await.unwrap();
            let (out, stale) = t.transform_from_storage(&stored, b"").await.unwrap();
            assert_eq!(out, b"value");
            assert!(!stale);
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_key_length() {
        assert!(matches!(
            AesCbcTransformer::new(&[0u8; 20]),
            Err(TransformError::InvalidKeyLength { got: 20, .. })
        ));
    }

    #[tokio::test]
    async fn test_unaligned_ciphertext_is_malformed() {
        let t = AesCbcTransformer::new(&[1u8; 16]).unwrap();
        let result = t.transform_from_storage(&[0u8; 33], b"").await;
        assert!(matches!(result, Err(TransformError::MalformedValue(_))));
    }

    #[tokio::test]
    async fn test_short_ciphertext_is_malformed() {
        let t = AesCbcTransformer::new(&[1u8; 16]).unwrap();
        let result = t.transform_from_storage(&[0u8; 16], b"").await;
        assert!(matches!(result, Err(TransformError::MalformedValue(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_padding_check() {
        let a = AesCbcTransformer::new(&[1u8; 32]).unwrap();
        let b = AesCbcTransformer::new(&[2u8; 32]).unwrap();

        let stored = a.transform_to_storage(b"value", b"").await.unwrap();
        // Overwhelmingly likely to produce garbage padding under the wrong key.
        let result = b.transform_from_storage(&stored, b"").await;
        assert!(result.is_err() || result.unwrap().0 != b"value");
    }

    #[tokio::test]
    async fn test_empty_plaintext_round_trips() {
        let t = AesCbcTransformer::new(&[9u8; 24]).unwrap();
        let stored = t.transform_to_storage(b"", b"").await.unwrap();
        let (out, _) = t.transform_from_storage(&stored, b"").await.unwrap();
        assert!(out.is_empty());
    }
}
