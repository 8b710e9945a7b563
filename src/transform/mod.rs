// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Value transformers for encryption at rest.
//!
//! A [`Transformer`] converts a plaintext value into its on-storage form and
//! back. Concrete transformers exist for every provider the configuration
//! file can name: passthrough identity, the symmetric primitives (AES-GCM,
//! AES-CBC, XSalsa20-Poly1305 secretbox) and envelope KMS providers. A
//! [`PrefixTransformer`] composes several of them behind per-provider byte
//! prefixes so values written under an older provider remain readable after
//! the configuration changes.
//!
//! # Staleness
//!
//! `transform_from_storage` reports `stale == true` whenever decryption
//! succeeded through any provider other than the first configured one. The
//! storage layer uses this as a signal to rewrite the value with the current
//! write provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

mod aescbc;
mod aesgcm;
mod error;
mod identity;
mod prefix;
mod secretbox;

pub use aescbc::AesCbcTransformer;
pub use aesgcm::AesGcmTransformer;
pub use error::TransformError;
pub use identity::IdentityTransformer;
pub use prefix::{PrefixEntry, PrefixTransformer};
pub use secretbox::SecretboxTransformer;

/// A resource lookup key: the API group and the resource name within it.
///
/// The core group is the empty string. The resource field may be the
/// wildcard `*`, and `*.*` (both fields wildcard) matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupResource {
    /// API group; empty for the core group.
    pub group: String,
    /// Resource name within the group, or `*`.
    pub resource: String,
}

impl GroupResource {
    /// Creates a key from explicit group and resource parts.
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// Parses a selector as written in the configuration file.
    ///
    /// `"secrets"` names a core-group resource, `"deployments.apps"` a
    /// resource in a named group, `"*."` every core-group resource,
    /// `"*.apps"` every resource in `apps`, and `"*.*"` everything.
    pub fn parse(selector: &str) -> Self {
        match selector.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::new("", selector),
        }
    }

    /// True when either field is the wildcard `*`.
    pub fn is_wildcard(&self) -> bool {
        self.resource == "*" || self.group == "*"
    }
}

impl std::fmt::Display for GroupResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// A value transformer.
///
/// `data_ctx` is authenticated context bound to the value's storage location;
/// AEAD transformers mix it into the authentication tag so a ciphertext moved
/// to another key fails to decrypt.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Transforms a plaintext value into its on-storage form.
    async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        data_ctx: &[u8],
    ) -> Result<Vec<u8>, TransformError>;

    /// Transforms a stored value back into plaintext.
    ///
    /// The returned flag is true when the value was readable but should be
    /// rewritten with the primary provider.
    async fn transform_from_storage(
        &self,
        stored: &[u8],
        data_ctx: &[u8],
    ) -> Result<(Vec<u8>, bool), TransformError>;
}

/// Compiled resource-to-transformer mapping.
pub type TransformerMap = HashMap<GroupResource, Arc<dyn Transformer>>;

/// Looks up the transformer responsible for a resource.
///
/// Resolution order: exact `{group, resource}` match, then the group
/// wildcard `*.<group>`, then the universal wildcard `*.*`.
pub fn transformer_for<'a>(
    map: &'a TransformerMap,
    resource: &GroupResource,
) -> Option<&'a Arc<dyn Transformer>> {
    if let Some(t) = map.get(resource) {
        return Some(t);
    }
    if let Some(t) = map.get(&GroupResource::new(resource.group.clone(), "*")) {
        return Some(t);
    }
    map.get(&GroupResource::new("*", "*"))
}
