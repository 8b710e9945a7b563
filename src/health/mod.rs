// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Health checks for remote KMS providers.
//!
//! Each configured KMS provider gets a probe that answers a liveness
//! question with bounded freshness: a healthy answer is reused for
//! [`KMS_HEALTHZ_POSITIVE_TTL`] so the server's health endpoint cannot
//! stampede the remote service, while a failure is retried after the much
//! shorter [`KMS_HEALTHZ_NEGATIVE_TTL`]. An [`AggregateHealthCheck`] folds
//! every probe of a configuration into the single check the reload
//! controller gates on.

use std::sync::Arc;

use async_trait::async_trait;
use std::time::Duration;

mod probe;
mod probe_v2;

pub use probe::KmsV1Probe;
pub use probe_v2::KmsV2Probe;

/// How long a healthy probe answer is served from cache.
pub const KMS_HEALTHZ_POSITIVE_TTL: Duration = Duration::from_secs(20);

/// How long a failed probe answer is served from cache.
pub const KMS_HEALTHZ_NEGATIVE_TTL: Duration = Duration::from_millis(100);

/// Name of the aggregate health check covering all KMS providers.
pub const KMS_PROVIDERS_CHECK_NAME: &str = "kms-providers";

/// Errors reported by health checks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthCheckError {
    /// The provider's health RPC failed.
    #[error("failed health check for KMS provider {provider}: {reason}")]
    Probe { provider: String, reason: String },

    /// The provider's `Status` RPC answered, but with invalid contents.
    #[error("invalid response from Status RPC for KMS provider {provider}: {reason}")]
    InvalidStatus { provider: String, reason: String },

    /// One or more wrapped checks failed.
    #[error("{0}")]
    Aggregate(String),
}

/// A named, repeatable liveness check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Stable name of the check.
    fn name(&self) -> &str;

    /// Runs the check.
    async fn check(&self) -> Result<(), HealthCheckError>;
}

/// Folds a configuration's KMS probes into one check.
///
/// The aggregate passes iff every wrapped probe passes under its own TTL
/// semantics. With no probes configured it always passes.
pub struct AggregateHealthCheck {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl AggregateHealthCheck {
    /// Creates the aggregate over `checks`.
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self { checks }
    }

    /// Number of wrapped checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// True when no probes are wrapped.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[async_trait]
impl HealthCheck for AggregateHealthCheck {
    fn name(&self) -> &str {
        KMS_PROVIDERS_CHECK_NAME
    }

    async fn check(&self) -> Result<(), HealthCheckError> {
        let mut failures = Vec::new();
        for check in &self.checks {
            if let Err(err) = check.check().await {
                failures.push(format!("{}: {}", check.name(), err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HealthCheckError::Aggregate(failures.join("; ")))
        }
    }
}
