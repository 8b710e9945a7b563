// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! SealKV: the encryption-at-rest configuration core of a control-plane
//! key/value store.
//!
//! This crate compiles a declarative encryption configuration file into a
//! live set of per-resource value transformers, health-probes the remote
//! KMS providers the configuration names, and keeps the published
//! transformer set synchronized with the file while the server runs:
//!
//! - [`config`] parses and validates the file, computes its content hash
//!   and builds the transformer map and KMS probes.
//! - [`transform`] defines the [`Transformer`] contract and the symmetric
//!   and compound prefix transformers.
//! - [`envelope`] holds the KMS service contracts and the envelope
//!   transformers that wrap per-value data encryption keys.
//! - [`health`] caches provider liveness behind positive/negative TTLs and
//!   folds all probes into one aggregate check.
//! - [`reload`] publishes transformer generations atomically and hot
//!   reloads the file on a single-worker, rate-limited loop.

pub mod config;
pub mod envelope;
pub mod health;
pub mod metrics;
pub mod reload;
pub mod shutdown;
pub mod transform;

pub use config::{
    compute_encryption_config_hash, load_encryption_config, ConfigError, LoadedConfiguration,
};
pub use envelope::{EnvelopeError, EnvelopeService, EnvelopeServiceFactory, EnvelopeServiceV2};
pub use health::{AggregateHealthCheck, HealthCheck, HealthCheckError, KmsV1Probe, KmsV2Probe};
pub use reload::{DynamicTransformers, EncryptionConfigController, ReloadError};
pub use shutdown::ShutdownToken;
pub use transform::{GroupResource, TransformError, Transformer, TransformerMap};
