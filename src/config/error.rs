// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration error types.
//!
//! Validation errors carry the path of the offending field in the same
//! bracketed notation the file uses (`resources[0].providers[1].kms.name`)
//! so an operator can find the line without guessing.

use std::path::PathBuf;

/// Errors from loading, validating or compiling an encryption configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("error reading encryption configuration file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// The file is not decodable under the known schema.
    #[error("error decoding encryption configuration file {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A field holds a value outside its allowed set.
    #[error("{field}: Invalid value: \"{value}\": {detail}")]
    Invalid {
        field: String,
        value: String,
        detail: String,
    },

    /// A required field is absent or empty.
    #[error("{field}: Required value: {detail}")]
    Required { field: String, detail: String },

    /// A value occurs more than once where uniqueness is required.
    #[error("{field}: Duplicate value: \"{value}\"")]
    Duplicate { field: String, value: String },

    /// A field-scoped constraint violation that should not echo the value,
    /// e.g. anything involving key material.
    #[error("{field}: {detail}")]
    Field { field: String, detail: String },

    /// A resource selector can never match because an earlier wildcard
    /// already covers it.
    #[error("resource {resource} is masked by earlier rule {rule}")]
    Masked { resource: String, rule: String },

    /// An envelope service for a KMS provider could not be constructed.
    #[error("could not construct envelope service for KMS provider {provider}: {reason}")]
    ServiceConstruction { provider: String, reason: String },
}

impl ConfigError {
    /// Builds a masking error. The universal wildcard is echoed bare, any
    /// other rule is quoted, matching the selector syntax in the file.
    pub(crate) fn masked(resource: &str, rule: &str) -> Self {
        let rule = if rule == "*.*" {
            rule.to_string()
        } else {
            format!("'{}'", rule)
        };
        ConfigError::Masked {
            resource: resource.to_string(),
            rule,
        }
    }
}
