// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Envelope encryption against remote Key Management Services.
//!
//! An envelope transformer never sends values to the remote service. Each
//! write seals the value locally under a fresh data encryption key (DEK)
//! and asks the KMS only to wrap the DEK; the wrapped DEK travels with the
//! ciphertext. Reads unwrap the DEK remotely (with a local cache so steady
//! state reads stay off the network) and open the value locally.
//!
//! Two service generations exist: the v1 contract wraps raw bytes and has a
//! dedicated health endpoint, the v2 contract threads request uids and key
//! identifiers through every call and reports health via a `Status` RPC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;
use zeroize::Zeroizing;

use crate::transform::{TransformError, Transformer};

mod v2;

pub use v2::{
    validate_key_id, DecryptRequest, EncryptResponse, EnvelopeServiceV2, EnvelopeV2Transformer,
    KeyIdError, StatusResponse, KEY_ID_MAX_SIZE, STATUS_HEALTHY, STATUS_VERSION,
};

/// Size of data encryption keys in bytes.
pub const DEK_SIZE: usize = 32;

/// Size of the AES-GCM nonce used to seal values under a DEK.
pub const DEK_NONCE_SIZE: usize = 12;

/// Errors from a remote envelope service or its local plumbing.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The service could not be reached or constructed.
    #[error("envelope service unavailable: {0}")]
    Unavailable(String),

    /// The service answered the RPC with an error.
    #[error("envelope RPC failed: {0}")]
    Rpc(String),

    /// The service answered with a structurally invalid response.
    #[error("invalid envelope service response: {0}")]
    InvalidResponse(String),
}

/// Remote envelope service, first protocol generation.
///
/// Wraps and unwraps opaque byte strings (DEKs) and exposes a liveness
/// endpoint used by the health probe.
#[async_trait]
pub trait EnvelopeService: Send + Sync {
    /// Wraps `data` under the service's key.
    async fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError>;

    /// Unwraps data previously wrapped by [`EnvelopeService::encrypt`].
    async fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError>;

    /// Answers the service's health endpoint.
    async fn health(&self) -> Result<(), EnvelopeError>;
}

/// Constructor for envelope services, injected by the embedding server.
///
/// The configuration loader calls this once per configured KMS provider.
/// Implementations should tie any connection pool they open to `shutdown`
/// so a failed or superseded configuration attempt releases its resources.
#[async_trait]
pub trait EnvelopeServiceFactory: Send + Sync {
    /// Creates a v1 service speaking to `endpoint`.
    async fn create_v1(
        &self,
        endpoint: &str,
        timeout: Duration,
        shutdown: &crate::shutdown::ShutdownToken,
    ) -> Result<Arc<dyn EnvelopeService>, EnvelopeError>;

    /// Creates a v2 service speaking to `endpoint` on behalf of `provider_name`.
    async fn create_v2(
        &self,
        endpoint: &str,
        provider_name: &str,
        timeout: Duration,
        shutdown: &crate::shutdown::ShutdownToken,
    ) -> Result<Arc<dyn EnvelopeServiceV2>, EnvelopeError>;
}

struct SingleNonce {
    nonce: [u8; NONCE_LEN],
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        Nonce::try_assume_unique_for_key(&self.nonce)
    }
}

/// Seals `plaintext` with AES-256-GCM under `dek`, binding `aad`.
///
/// Returns `nonce ‖ ciphertext ‖ tag`.
pub(crate) fn seal_with_dek(
    rng: &SystemRandom,
    dek: &[u8; DEK_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, TransformError> {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill(&mut nonce)
        .map_err(|_| TransformError::Encrypt("failed to generate nonce".into()))?;

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, dek)
        .map_err(|_| TransformError::Encrypt("invalid DEK".into()))?;
    let mut sealing_key = aead::SealingKey::new(unbound, SingleNonce { nonce });

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| TransformError::Encrypt("AES-GCM seal failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Opens data produced by [`seal_with_dek`].
pub(crate) fn open_with_dek(
    dek: &[u8; DEK_SIZE],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, TransformError> {
    if sealed.len() < NONCE_LEN + 16 {
        return Err(TransformError::MalformedValue(
            "sealed value shorter than nonce and tag".into(),
        ));
    }
    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, dek)
        .map_err(|_| TransformError::Decrypt("invalid DEK".into()))?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce { nonce });

    let mut in_out = encrypted.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::from(aad), &mut in_out)
        .map_err(|_| TransformError::Decrypt("AES-GCM open failed".into()))?;
    Ok(plaintext.to_vec())
}

/// Generates a fresh random DEK.
pub(crate) fn generate_dek(rng: &SystemRandom) -> Result<Zeroizing<[u8; DEK_SIZE]>, TransformError> {
    let mut dek = Zeroizing::new([0u8; DEK_SIZE]);
    rng.fill(dek.as_mut())
        .map_err(|_| TransformError::Encrypt("failed to generate DEK".into()))?;
    Ok(dek)
}

/// Bounded cache of unwrapped DEKs, keyed by their wrapped form.
///
/// Dropping the whole map once the bound is hit keeps the implementation a
/// plain `RwLock<HashMap>`; a hot provider repopulates the handful of DEKs
/// it actually reads within a few calls.
pub(crate) struct DekCache {
    entries: RwLock<HashMap<Vec<u8>, Arc<Zeroizing<[u8; DEK_SIZE]>>>>,
    capacity: usize,
}

impl DekCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub(crate) fn get(&self, wrapped: &[u8]) -> Option<Arc<Zeroizing<[u8; DEK_SIZE]>>> {
        self.entries.read().get(wrapped).cloned()
    }

    pub(crate) fn insert(&self, wrapped: Vec<u8>, dek: Arc<Zeroizing<[u8; DEK_SIZE]>>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            debug!(capacity = self.capacity, "DEK cache full, clearing");
            entries.clear();
        }
        entries.insert(wrapped, dek);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Transformer delegating DEK wrapping to a v1 envelope service.
///
/// On-storage layout: `wrapped-DEK length (u16 BE) ‖ wrapped DEK ‖ sealed
/// value`, where the value is sealed locally with AES-256-GCM under the DEK.
pub struct EnvelopeTransformer {
    service: Arc<dyn EnvelopeService>,
    cache: DekCache,
    rng: SystemRandom,
}

impl EnvelopeTransformer {
    /// Creates a transformer backed by `service`, caching up to
    /// `cache_size` unwrapped DEKs.
    pub fn new(service: Arc<dyn EnvelopeService>, cache_size: usize) -> Self {
        Self {
            service,
            cache: DekCache::new(cache_size),
            rng: SystemRandom::new(),
        }
    }
}

#[async_trait]
impl Transformer for EnvelopeTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let dek = generate_dek(&self.rng)?;
        let sealed = seal_with_dek(&self.rng, &dek, plaintext, data_ctx)?;

        let wrapped = self
            .service
            .encrypt(dek.as_ref())
            .await
            .map_err(|e| TransformError::Envelope(e.to_string()))?;
        if wrapped.is_empty() || wrapped.len() > u16::MAX as usize {
            return Err(TransformError::Envelope(format!(
                "service returned a wrapped DEK of {} bytes",
                wrapped.len()
            )));
        }

        let mut out = Vec::with_capacity(2 + wrapped.len() + sealed.len());
        out.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&sealed);

        self.cache.insert(wrapped, Arc::new(dek));
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        if stored.len() < 2 {
            return Err(TransformError::MalformedValue(
                "missing wrapped DEK length".into(),
            ));
        }
        let wrapped_len = u16::from_be_bytes([stored[0], stored[1]]) as usize;
        let rest = &stored[2..];
        if rest.len() < wrapped_len {
            return Err(TransformError::MalformedValue(
                "truncated wrapped DEK".into(),
            ));
        }
        let (wrapped, sealed) = rest.split_at(wrapped_len);

        let dek = match self.cache.get(wrapped) {
            Some(dek) => dek,
            None => {
                let raw = self
                    .service
                    .decrypt(wrapped)
                    .await
                    .map_err(|e| TransformError::Envelope(e.to_string()))?;
                if raw.len() != DEK_SIZE {
                    return Err(TransformError::Envelope(format!(
                        "service unwrapped a DEK of {} bytes, expected {}",
                        raw.len(),
                        DEK_SIZE
                    )));
                }
                let mut dek = Zeroizing::new([0u8; DEK_SIZE]);
                dek.copy_from_slice(&raw);
                let dek = Arc::new(dek);
                self.cache.insert(wrapped.to_vec(), Arc::clone(&dek));
                dek
            }
        };

        let plaintext = open_with_dek(&dek, sealed, data_ctx)?;
        Ok((plaintext, false))
    }
}
