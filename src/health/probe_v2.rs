// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Liveness probe for v2 envelope services.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::envelope::{
    validate_key_id, EnvelopeServiceV2, STATUS_HEALTHY, STATUS_VERSION,
};
use crate::metrics::metrics;

use super::probe::CachedResponse;
use super::{
    HealthCheck, HealthCheckError, KMS_HEALTHZ_NEGATIVE_TTL, KMS_HEALTHZ_POSITIVE_TTL,
};

/// Probe for a v2 envelope service.
///
/// Beyond liveness, the probe validates the `Status` response contents: the
/// service must report itself healthy, speak the expected protocol version
/// and return a well-formed key identifier. The most recent valid key id is
/// published through an atomic cell so logging and cache-key derivation can
/// read it without taking the probe's mutex.
pub struct KmsV2Probe {
    name: String,
    service: Arc<dyn EnvelopeServiceV2>,
    last: Mutex<Option<CachedResponse>>,
    key_id: ArcSwap<String>,
}

impl KmsV2Probe {
    /// Creates a probe for the named provider.
    pub fn new(name: impl Into<String>, service: Arc<dyn EnvelopeServiceV2>) -> Self {
        Self {
            name: name.into(),
            service,
            last: Mutex::new(None),
            key_id: ArcSwap::new(Arc::new(String::new())),
        }
    }

    /// The provider's current key id, empty until the first healthy probe.
    pub fn key_id(&self) -> Arc<String> {
        self.key_id.load_full()
    }

    fn validate_status(
        &self,
        resp: &crate::envelope::StatusResponse,
    ) -> Result<(), HealthCheckError> {
        let mut reasons = Vec::new();
        if resp.healthz != STATUS_HEALTHY {
            reasons.push(format!("got unexpected healthz status: {}", resp.healthz));
        }
        if resp.version != STATUS_VERSION {
            reasons.push(format!(
                "expected KMSv2 API version {}, got {}",
                STATUS_VERSION, resp.version
            ));
        }
        if let Err(err) = validate_key_id(&resp.key_id) {
            metrics().record_invalid_key_id(&self.name, err.as_label());
            reasons.push(format!("got invalid key id: {}", err));
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(HealthCheckError::InvalidStatus {
                provider: self.name.clone(),
                reason: reasons.join(", "),
            })
        }
    }
}

#[async_trait]
impl HealthCheck for KmsV2Probe {
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

        let outcome = match self.service.status().await {
            Ok(resp) => self.validate_status(&resp).map(|()| resp.key_id),
            Err(err) => {
                debug!(provider = %self.name, error = %err, "KMS Status RPC failed");
                Err(HealthCheckError::Probe {
                    provider: self.name.clone(),
                    reason: err.to_string(),
                })
            }
        };

        let (error, ttl) = match outcome {
            Ok(key_id) => {
                self.key_id.store(Arc::new(key_id));
                (None, KMS_HEALTHZ_POSITIVE_TTL)
            }
            Err(err) => (Some(err), KMS_HEALTHZ_NEGATIVE_TTL),
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
