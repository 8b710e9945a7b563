// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Encryption configuration: schema, validation and compilation.
//!
//! The configuration file declares, per resource, an ordered list of
//! encryption providers. This module decodes the file (current and legacy
//! schema), validates it, enforces the wildcard masking rules that keep
//! every selector reachable, and compiles it into the live transformer
//! map plus the KMS health probes that guard it.
//!
//! ```text
//! ┌────────────┐   parse    ┌──────────────┐   compile   ┌──────────────────┐
//! │  YAML file │ ─────────► │ schema tree  │ ──────────► │ transformers map │
//! │ (+ SHA-256)│  validate  │ (both forms) │   probes    │ + health checks  │
//! └────────────┘            └──────────────┘             └──────────────────┘
//! ```

mod error;
mod load;
mod schema;

pub use error::ConfigError;
pub use load::{
    compute_encryption_config_hash, load_encryption_config, LoadedConfiguration, AESCBC_PREFIX,
    AESGCM_PREFIX, KMS_CACHE_SIZE_DEFAULT, KMS_TIMEOUT_DEFAULT, KMS_V1_PREFIX, KMS_V2_PREFIX,
    MIN_KMS_CLOSE_GRACE_PERIOD, SECRETBOX_PREFIX,
};
pub use schema::{
    parse_duration, AesConfiguration, EncryptionConfiguration, IdentityConfiguration, Key,
    KmsConfiguration, ProviderConfiguration, ResourceConfiguration, SecretboxConfiguration,
    API_VERSION_CURRENT, API_VERSION_LEGACY, KIND_CURRENT, KIND_LEGACY,
};
