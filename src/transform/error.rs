// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Value transformation error types.

/// Errors that can occur while transforming values to or from storage.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The stored value does not carry any prefix known to the compound
    /// transformer handling the resource.
    #[error("no matching prefix found to decrypt the stored value")]
    NoMatchingPrefix,

    /// Invalid key length for the selected primitive.
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: String, got: usize },

    /// The stored value is truncated or otherwise structurally malformed.
    #[error("malformed stored value: {0}")]
    MalformedValue(String),

    /// A passthrough transformer was asked to read encrypted data.
    #[error("identity transformer tried to read encrypted data")]
    IdentityReadEncrypted,

    /// The remote envelope service failed.
    #[error("envelope service failed: {0}")]
    Envelope(String),
}
