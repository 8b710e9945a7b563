// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the encryption configuration subsystem.
//!
//! Counters live on a dedicated registry so the embedding server can mount
//! them wherever its exposition endpoint lives via [`Metrics::gather`].

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Opts, Registry};

/// Process-wide metrics instance.
static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Returns the process-wide metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Counters emitted by the reload controller and the KMS v2 probes.
pub struct Metrics {
    registry: Registry,

    reload_success: CounterVec,
    reload_failure: CounterVec,
    invalid_key_id: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let reload_success = CounterVec::new(
            Opts::new(
                "sealkv_encryption_config_automatic_reload_success_total",
                "Total number of successful automatic reloads of the encryption configuration",
            ),
            &["apiserver_id"],
        )
        .expect("reload success counter definition is static");
        registry
            .register(Box::new(reload_success.clone()))
            .expect("reload success counter registers once");

        let reload_failure = CounterVec::new(
            Opts::new(
                "sealkv_encryption_config_automatic_reload_failure_total",
                "Total number of failed automatic reloads of the encryption configuration",
            ),
            &["apiserver_id"],
        )
        .expect("reload failure counter definition is static");
        registry
            .register(Box::new(reload_failure.clone()))
            .expect("reload failure counter registers once");

        let invalid_key_id = CounterVec::new(
            Opts::new(
                "apiserver_envelope_encryption_invalid_key_id_from_status_total",
                "Number of times an invalid key id is returned by the Status RPC call, split by error",
            ),
            &["error", "provider_name"],
        )
        .expect("invalid key id counter definition is static");
        registry
            .register(Box::new(invalid_key_id.clone()))
            .expect("invalid key id counter registers once");

        Self {
            registry,
            reload_success,
            reload_failure,
            invalid_key_id,
        }
    }

    /// Records one successful automatic reload.
    pub fn record_reload_success(&self, apiserver_id: &str) {
        self.reload_success
            .with_label_values(&[apiserver_id])
            .inc();
    }

    /// Records one failed automatic reload.
    pub fn record_reload_failure(&self, apiserver_id: &str) {
        self.reload_failure
            .with_label_values(&[apiserver_id])
            .inc();
    }

    /// Records an invalid key id observed in a `Status` response.
    pub fn record_invalid_key_id(&self, provider_name: &str, error: &str) {
        self.invalid_key_id
            .with_label_values(&[error, provider_name])
            .inc();
    }

    /// Current value of the reload success counter for `apiserver_id`.
    pub fn reload_success_count(&self, apiserver_id: &str) -> u64 {
        self.reload_success
            .with_label_values(&[apiserver_id])
            .get() as u64
    }

    /// Current value of the reload failure counter for `apiserver_id`.
    pub fn reload_failure_count(&self, apiserver_id: &str) -> u64 {
        self.reload_failure
            .with_label_values(&[apiserver_id])
            .get() as u64
    }

    /// Current value of the invalid key id counter for a provider/error pair.
    pub fn invalid_key_id_count(&self, provider_name: &str, error: &str) -> u64 {
        self.invalid_key_id
            .with_label_values(&[error, provider_name])
            .get() as u64
    }

    /// Gathers all metric families for exposition.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
