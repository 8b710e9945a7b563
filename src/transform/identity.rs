// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Passthrough transformer for unencrypted storage.

use async_trait::async_trait;

use super::error::TransformError;
use super::Transformer;

/// Byte tag shared by every encrypting provider's on-storage prefix.
const ENCRYPTED_VALUE_TAG: &[u8] = b"k8s:enc:";

/// A transformer that stores values as-is.
///
/// Reading refuses data that carries an encrypting provider's tag so a
/// misconfigured resource never hands ciphertext back to a caller as if it
/// were plaintext.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransformer;

#[async_trait]
impl Transformer for IdentityTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        _data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        Ok(plaintext.to_vec())
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        _data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.starts_with(ENCRYPTED_VALUE_TAG) {
            return Err(TransformError::IdentityReadEncrypted);
        }
        Ok((stored.to_vec(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_is_verbatim() {
        let t = IdentityTransformer;
        let stored = t.transform_to_storage(b"plain", b"ctx").await.unwrap();
        assert_eq!(stored, b"plain");

        let (out, stale) = t.transform_from_storage(&stored, b"ctx").await.unwrap();
        assert_eq!(out, b"plain");
        assert!(!stale);
    }

    #[tokio::test]
    async fn test_refuses_encrypted_data() {
        let t = IdentityTransformer;
        let result = t
            .transform_from_storage(b"k8s:enc:aesgcm:v1:key1:junk", b"")
            .await;
        assert!(matches!(
            result,
            Err(TransformError::IdentityReadEncrypted)
        ));
    }

    #[tokio::test]
    async fn test_empty_value_round_trips() {
        let t = IdentityTransformer;
        let (out, stale) = t.transform_from_storage(b"", b"").await.unwrap();
        assert!(out.is_empty());
        assert!(!stale);
    }
}
