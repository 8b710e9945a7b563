// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Compound transformer dispatching on per-provider byte prefixes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::TransformError;
use super::Transformer;

/// One entry of a compound transformer: the on-storage prefix identifying
/// the provider and the transformer that handles its payload.
pub struct PrefixEntry {
    /// Human-readable byte tag written before the provider's payload.
    pub prefix: Vec<u8>,
    /// Transformer for the payload behind the prefix.
    pub transformer: Arc<dyn Transformer>,
}

impl PrefixEntry {
    /// Creates an entry from a prefix string and a transformer.
    pub fn new(prefix: impl Into<Vec<u8>>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            prefix: prefix.into(),
            transformer,
        }
    }
}

/// A transformer that tries a sequence of prefixed providers.
///
/// Writes always go through the first entry. Reads scan the entries in
/// listed order and use the first whose prefix matches the stored bytes;
/// decoding through any entry other than the first reports the value as
/// stale so the storage layer rewrites it with the current write provider.
///
/// An empty prefix (the identity provider) matches every value. When such
/// an entry fails to decode, typically because the stored bytes carry an
/// encrypting provider's tag, the scan continues with the remaining
/// entries, which is what lets an identity-first configuration still read
/// values written while encryption was enabled.
pub struct PrefixTransformer {
    entries: Vec<PrefixEntry>,
}

impl PrefixTransformer {
    /// Creates a compound transformer. `entries` must be non-empty; the
    /// first entry is the write provider.
    pub fn new(entries: Vec<PrefixEntry>) -> Self {
        debug_assert!(!entries.is_empty());
        Self { entries }
    }

    /// Returns the write provider's prefix.
    pub fn write_prefix(&self) -> &[u8] {
        &self.entries[0].prefix
    }
}

#[async_trait]
impl Transformer for PrefixTransformer {
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let entry = &self.entries[0];
        let payload = entry.transformer.transform_to_storage(plaintext, data_ctx).await?;

        let mut out = Vec::with_capacity(entry.prefix.len() + payload.len());
        out.extend_from_slice(&entry.prefix);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    async fn transform_from_storage(
        &self,
        stored: &[u8],
        data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError> {
        for (i, entry) in self.entries.iter().enumerate() {
            if !stored.starts_with(&entry.prefix) {
                continue;
            }
            let result = entry
                .transformer
                .transform_from_storage(&stored[entry.prefix.len()..], data_ctx)
                .await;

            // A passthrough entry that refused the bytes is not a final
            // answer; some later provider's prefix may still match.
            if entry.prefix.is_empty() {
                if let Err(err) = &result {
                    debug!(error = %err, "passthrough entry rejected value, continuing scan");
                    continue;
                }
            }

            return result.map(|(plaintext, stale)| (plaintext, stale || i != 0));
        }
        Err(TransformError::NoMatchingPrefix)
    }
}
