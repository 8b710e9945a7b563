// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Atomic publication of transformer generations.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MIN_KMS_CLOSE_GRACE_PERIOD;
use crate::health::HealthCheck;
use crate::shutdown::ShutdownToken;
use crate::transform::{self, GroupResource, Transformer, TransformerMap};

/// Callback releasing a generation's background resources. Invoked exactly
/// once per generation, after its grace period or at holder shutdown.
pub type CloseFn = Box<dyn FnOnce() + Send + 'static>;

struct Generation {
    transformers: TransformerMap,
    health_check: Arc<dyn HealthCheck>,
    close: Mutex<Option<CloseFn>>,
    grace_period: Duration,
}

impl Generation {
    fn close_now(&self) {
        if let Some(close) = self.close.lock().take() {
            close();
        }
    }
}

/// Holder publishing one transformer generation at a time.
///
/// Readers load the current generation through an atomic pointer swap and
/// never block; [`DynamicTransformers::set`] flips the pointer and schedules
/// release of the superseded generation after its grace period. The grace
/// period is an upper bound on in-flight storage operations (one KMS
/// timeout plus retry headroom), so a reader that picked up the old map
/// right before the swap can still finish decrypting against it.
///
/// `set` must be called from within a tokio runtime; the delayed close runs
/// on a spawned task that also fires promptly at holder shutdown.
pub struct DynamicTransformers {
    current: ArcSwap<Generation>,
    shutdown: ShutdownToken,
}

impl DynamicTransformers {
    /// Creates a holder publishing the boot-time generation.
    pub fn new(
        transformers: TransformerMap,
        close: CloseFn,
        health_check: Arc<dyn HealthCheck>,
        grace_period: Duration,
    ) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(Generation {
                transformers,
                health_check,
                close: Mutex::new(Some(close)),
                grace_period,
            })),
            shutdown: ShutdownToken::new(),
        }
    }

    /// Publishes a new generation and schedules release of the previous one
    /// after `max(previous.grace_period, 10s)`.
    pub fn set(
        &self,
        transformers: TransformerMap,
        close: CloseFn,
        health_check: Arc<dyn HealthCheck>,
        grace_period: Duration,
    ) {
        let next = Arc::new(Generation {
            transformers,
            health_check,
            close: Mutex::new(Some(close)),
            grace_period,
        });
        let prev = self.current.swap(next);
        info!(
            grace_period_secs = prev.grace_period.as_secs(),
            "published new transformer generation"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let wait = prev.grace_period.max(MIN_KMS_CLOSE_GRACE_PERIOD);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    debug!("grace period elapsed, closing previous generation");
                }
                _ = shutdown.cancelled() => {
                    debug!("holder shut down, closing previous generation early");
                }
            }
            prev.close_now();
        });
    }

    /// Looks up the transformer for `resource` in the current generation.
    ///
    /// Lock-free; safe to call from request-handler threads.
    pub fn transformer_for(&self, resource: &GroupResource) -> Option<Arc<dyn Transformer>> {
        let generation = self.current.load();
        transform::transformer_for(&generation.transformers, resource).map(Arc::clone)
    }

    /// The current generation's aggregate health check.
    pub fn health_check(&self) -> Arc<dyn HealthCheck> {
        Arc::clone(&self.current.load().health_check)
    }

    /// Releases every generation: draining ones immediately, then the
    /// current one. Called when the server shuts down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.current.load().close_now();
    }
}
