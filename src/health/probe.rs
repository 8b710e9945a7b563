// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Liveness probe for v1 envelope services.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::envelope::EnvelopeService;

use super::{
    HealthCheck, HealthCheckError, KMS_HEALTHZ_NEGATIVE_TTL, KMS_HEALTHZ_POSITIVE_TTL,
};

/// Cached outcome of the most recent health RPC.
pub(super) struct CachedResponse {
    pub(super) error: Option<HealthCheckError>,
    pub(super) expires_at: Instant,
}

impl CachedResponse {
    pub(super) fn result(&self) -> Result<(), HealthCheckError> {
        match &self.error {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}

/// Probe for a v1 envelope service.
///
/// The mutex both guards the cached response and collapses concurrent
/// callers onto a single in-flight RPC; it is held across the await on
/// purpose and protects nothing else.
pub struct KmsV1Probe {
    name: String,
    service: Arc<dyn EnvelopeService>,
    last: Mutex<Option<CachedResponse>>,
}

impl KmsV1Probe {
    /// Creates a probe for the named provider.
    pub fn new(name: impl Into<String>, service: Arc<dyn EnvelopeService>) -> Self {
        Self {
            name: name.into(),
            service,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl HealthCheck for KmsV1Probe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), HealthCheckError> {
        let mut last = self.last.lock().await;
        if let Some(cached) = last.as_ref() {
            if Instant::now() < cached.expires_at {
                return cached.result();
            }
        }

        let outcome = self.service.health().await;
        let (error, ttl) = match outcome {
            Ok(()) => (None, KMS_HEALTHZ_POSITIVE_TTL),
            Err(err) => {
                debug!(provider = %self.name, error = %err, "KMS health endpoint failed");
                (
                    Some(HealthCheckError::Probe {
                        provider: self.name.clone(),
                        reason: err.to_string(),
                    }),
                    KMS_HEALTHZ_NEGATIVE_TTL,
                )
            }
        };

        let cached = CachedResponse {
            error,
            expires_at: Instant::now() + ttl,
        };
        let result = cached.result();
        *last = Some(cached);
        result
    }
}
