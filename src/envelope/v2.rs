// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Second-generation envelope service contract and transformer.

use std::sync::Arc;

use async_trait::async_trait;
use ring::rand::SystemRandom;
use tracing::debug;
use zeroize::Zeroizing;

use crate::transform::{TransformError, Transformer};

use super::{generate_dek, open_with_dek, seal_with_dek, EnvelopeError, DEK_SIZE};

/// Maximum accepted length of a remote key identifier, in bytes.
pub const KEY_ID_MAX_SIZE: usize = 128;

/// The `healthz` value a healthy v2 service reports.
pub const STATUS_HEALTHY: &str = "ok";

/// The protocol version this crate speaks.
pub const STATUS_VERSION: &str = "v2alpha1";

/// Response of [`EnvelopeServiceV2::encrypt`].
#[derive(Debug, Clone)]
pub struct EncryptResponse {
    /// The wrapped DEK.
    pub ciphertext: Vec<u8>,
    /// Identifier of the remote key that wrapped it.
    pub key_id: String,
}

/// Request for [`EnvelopeServiceV2::decrypt`].
#[derive(Debug, Clone)]
pub struct DecryptRequest {
    /// The wrapped DEK.
    pub ciphertext: Vec<u8>,
    /// Identifier of the remote key that wrapped it.
    pub key_id: String,
}

/// Response of [`EnvelopeServiceV2::status`].
#[derive(Debug, Clone)]
pub struct StatusResponse {
    /// `"ok"` when the service is healthy.
    pub healthz: String,
    /// Protocol version the service speaks.
    pub version: String,
    /// Identifier of the service's current key.
    pub key_id: String,
}

/// Remote envelope service, second protocol generation.
#[async_trait]
pub trait EnvelopeServiceV2: Send + Sync {
    /// Wraps `plaintext` under the service's current key. `uid` correlates
    /// the request in the remote service's logs.
    async fn encrypt(&self, uid: &str, plaintext: &[u8]) -> Result<EncryptResponse, EnvelopeError>;

    /// Unwraps a previously wrapped DEK.
    async fn decrypt(&self, uid: &str, req: &DecryptRequest) -> Result<Vec<u8>, EnvelopeError>;

    /// Reports the service's health, protocol version and current key id.
    async fn status(&self) -> Result<StatusResponse, EnvelopeError>;
}

/// Ways a remote key identifier can be malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIdError {
    /// The identifier was empty.
    Empty,
    /// The identifier exceeded [`KEY_ID_MAX_SIZE`] bytes.
    TooLong,
}

impl KeyIdError {
    /// Stable label used on the invalid-key-id metric.
    pub fn as_label(&self) -> &'static str {
        match self {
            KeyIdError::Empty => "empty",
            KeyIdError::TooLong => "too_long",
        }
    }
}

impl std::fmt::Display for KeyIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyIdError::Empty => write!(f, "key id is empty"),
            KeyIdError::TooLong => {
                write!(f, "key id is longer than {} bytes", KEY_ID_MAX_SIZE)
            }
        }
    }
}

/// Validates a remote key identifier.
pub fn validate_key_id(key_id: &str) -> Result<(), KeyIdError> {
    if key_id.is_empty() {
        return Err(KeyIdError::Empty);
    }
    if key_id.len() > KEY_ID_MAX_SIZE {
        return Err(KeyIdError::TooLong);
    }
    Ok(())
}

/// Transformer delegating DEK wrapping to a v2 envelope service.
///
/// On-storage layout: `key-id length (u16 BE) ‖ key id ‖ wrapped-DEK length
/// (u32 BE) ‖ wrapped DEK ‖ sealed value`. The key id is carried alongside
/// the wrapped DEK so the remote service can route the unwrap to the right
/// key after a remote rotation.
pub struct EnvelopeV2Transformer {
    provider_name: String,
    service: Arc<dyn EnvelopeServiceV2>,
    rng: SystemRandom,
}

impl EnvelopeV2Transformer {
    /// Creates a transformer backed by `service`.
    pub fn new(provider_name: impl Into<String>, service: Arc<dyn EnvelopeServiceV2>) -> Self {
        Self {
            provider_name: provider_name.into(),
            service,
            rng: SystemRandom::new(),
        }
    }

    fn request_uid() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl Transformer for EnvelopeV2Transformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let dek = generate_dek(&self.rng)?;
        let sealed = seal_with_dek(&self.rng, &dek, plaintext, data_ctx)?;

        let uid = Self::request_uid();
        let resp = self
            .service
            .encrypt(&uid, dek.as_ref())
            .await
            .map_err(|e| TransformError::Envelope(e.to_string()))?;

        if let Err(err) = validate_key_id(&resp.key_id) {
            return Err(TransformError::Envelope(format!(
                "provider {} returned an invalid key id: {}",
                self.provider_name, err
            )));
        }
        if resp.ciphertext.is_empty() || resp.ciphertext.len() > u32::MAX as usize {
            return Err(TransformError::Envelope(format!(
                "provider {} returned a wrapped DEK of {} bytes",
                self.provider_name,
                resp.ciphertext.len()
            )));
        }
        debug!(provider = %self.provider_name, uid = %uid, key_id = %resp.key_id, "wrapped DEK");

        let key_id = resp.key_id.as_bytes();
        let mut out =
            Vec::with_capacity(2 + key_id.len() + 4 + resp.ciphertext.len() + sealed.len());
        out.extend_from_slice(&(key_id.len() as u16).to_be_bytes());
        out.extend_from_slice(key_id);
        out.extend_from_slice(&(resp.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&resp.ciphertext);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.len() < 2 {
            return Err(TransformError::MalformedValue("missing key id length".into()));
        }
        let key_id_len = u16::from_be_bytes([stored[0], stored[1]]) as usize;
        if key_id_len > KEY_ID_MAX_SIZE {
            return Err(TransformError::MalformedValue(format!(
                "stored key id of {} bytes exceeds the {} byte limit",
                key_id_len, KEY_ID_MAX_SIZE
            )));
        }
        let rest = &stored[2..];
        if rest.len() < key_id_len + 4 {
            return Err(TransformError::MalformedValue("truncated key id".into()));
        }
        let (key_id_bytes, rest) = rest.split_at(key_id_len);
        let key_id = std::str::from_utf8(key_id_bytes)
            .map_err(|_| TransformError::MalformedValue("key id is not valid UTF-8".into()))?
            .to_string();

        let wrapped_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let rest = &rest[4..];
        if rest.len() < wrapped_len {
            return Err(TransformError::MalformedValue("truncated wrapped DEK".into()));
        }
        let (wrapped, sealed) = rest.split_at(wrapped_len);

        let uid = Self::request_uid();
        let req = DecryptRequest {
            ciphertext: wrapped.to_vec(),
            key_id,
        };
        let raw = self
            .service
            .decrypt(&uid, &req)
            .await
            .map_err(|e| TransformError::Envelope(e.to_string()))?;
        if raw.len() != DEK_SIZE {
            return Err(TransformError::Envelope(format!(
                "provider {} unwrapped a DEK of {} bytes, expected {}",
                self.provider_name,
                raw.len(),
                DEK_SIZE
            )));
        }
        let mut dek = Zeroizing::new([0u8; DEK_SIZE]);
        dek.copy_from_slice(&raw);

        let plaintext = open_with_dek(&dek, sealed, data_ctx)?;
        Ok((plaintext, false))
    }
}
