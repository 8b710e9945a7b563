// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! On-disk schema of the encryption configuration document.
//!
//! Two schema generations decode to the same tree: the current
//! `sealkv.io/v1` / `EncryptionConfiguration` form and the legacy `v1` /
//! `EncryptionConfig` form that predates the API group.

use std::time::Duration;

use serde::Deserialize;

/// Current API version of the configuration document.
pub const API_VERSION_CURRENT: &str = "sealkv.io/v1";

/// Kind accompanying [`API_VERSION_CURRENT`].
pub const KIND_CURRENT: &str = "EncryptionConfiguration";

/// Legacy API version accepted for compatibility.
pub const API_VERSION_LEGACY: &str = "v1";

/// Kind accompanying [`API_VERSION_LEGACY`].
pub const KIND_LEGACY: &str = "EncryptionConfig";

/// Root of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfiguration {
    /// Schema version, current or legacy.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Document kind matching the schema version.
    pub kind: String,
    /// Resource rules, in priority order.
    #[serde(default)]
    pub resources: Vec<ResourceConfiguration>,
}

impl EncryptionConfiguration {
    /// True when the `kind`/`apiVersion` pair names a known schema.
    pub fn is_known_schema(&self) -> bool {
        (self.api_version == API_VERSION_CURRENT && self.kind == KIND_CURRENT)
            || (self.api_version == API_VERSION_LEGACY && self.kind == KIND_LEGACY)
    }
}

/// One resource rule: the selectors it covers and the providers to use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfiguration {
    /// Resource selectors: bare names, `resource.group` forms, the group
    /// wildcards `*.` / `*.<group>`, or the universal wildcard `*.*`.
    pub resources: Vec<String>,
    /// Providers in decode priority order; the first one encrypts writes.
    pub providers: Vec<ProviderConfiguration>,
}

/// A provider slot. Exactly one variant must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfiguration {
    /// Passthrough, no encryption.
    #[serde(default)]
    pub identity: Option<IdentityConfiguration>,
    /// AES-GCM with locally held keys.
    #[serde(default)]
    pub aesgcm: Option<AesConfiguration>,
    /// AES-CBC with locally held keys.
    #[serde(default)]
    pub aescbc: Option<AesConfiguration>,
    /// XSalsa20-Poly1305 with locally held keys.
    #[serde(default)]
    pub secretbox: Option<SecretboxConfiguration>,
    /// Envelope encryption against a remote KMS.
    #[serde(default)]
    pub kms: Option<KmsConfiguration>,
}

impl ProviderConfiguration {
    /// Number of variants set on this slot.
    pub fn variant_count(&self) -> usize {
        [
            self.identity.is_some(),
            self.aesgcm.is_some(),
            self.aescbc.is_some(),
            self.secretbox.is_some(),
            self.kms.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Configuration of the identity provider. Carries no fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfiguration {}

/// Configuration of an AES provider (GCM or CBC).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AesConfiguration {
    /// Named keys, newest first.
    pub keys: Vec<Key>,
}

/// Configuration of the secretbox provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretboxConfiguration {
    /// Named keys, newest first.
    pub keys: Vec<Key>,
}

/// A named symmetric key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Key {
    /// Name embedded in the on-storage prefix of values this key writes.
    pub name: String,
    /// Base64-encoded key material.
    pub secret: String,
}

/// Configuration of a KMS provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmsConfiguration {
    /// Provider name, embedded in the on-storage prefix.
    pub name: String,
    /// Endpoint of the remote envelope service.
    pub endpoint: String,
    /// Envelope protocol generation, `v1` or `v2`.
    #[serde(rename = "apiVersion", default = "default_kms_api_version")]
    pub api_version: String,
    /// Bound on the unwrapped-DEK cache. v1 only.
    #[serde(default)]
    pub cachesize: Option<i32>,
    /// Per-RPC timeout, integer seconds with an `s` suffix.
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_kms_api_version() -> String {
    "v1".to_string()
}

/// Parses a duration written as integer seconds with an `s` suffix.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let seconds = value
        .strip_suffix('s')
        .ok_or_else(|| format!("{value:?} must be integer seconds with an 's' suffix"))?;
    let seconds: u64 = seconds
        .parse()
        .map_err(|_| format!("{value:?} must be integer seconds with an 's' suffix"))?;
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0s").unwrap(), Duration::from_secs(0));
        assert_eq!(parse_duration("120s").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_rejects_other_forms() {
        assert!(parse_duration("3").is_err());
        assert!(parse_duration("3m").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_current_and_legacy_schema_decode_identically() {
        let current = r#"
apiVersion: sealkv.io/v1
kind: EncryptionConfiguration
resources:
  - resources:
      - secrets
    providers:
      - aescbc:
          keys:
            - name: key1
              secret: c2VjcmV0IGlzIHNlY3VyZQ==
"#;
        let legacy = r#"
apiVersion: v1
kind: EncryptionConfig
resources:
  - resources:
      - secrets
    providers:
      - aescbc:
          keys:
            - name: key1
              secret: c2VjcmV0IGlzIHNlY3VyZQ==
"#;
        let a: EncryptionConfiguration = serde_yaml::from_str(current).unwrap();
        let b: EncryptionConfiguration = serde_yaml::from_str(legacy).unwrap();
        assert!(a.is_known_schema());
        assert!(b.is_known_schema());
        assert_eq!(a.resources, b.resources);
    }

    #[test]
    fn test_unknown_schema_pair_is_flagged() {
        let doc = r#"
apiVersion: v2
kind: EncryptionConfig
resources: []
"#;
        let parsed: EncryptionConfiguration = serde_yaml::from_str(doc).unwrap();
        assert!(!parsed.is_known_schema());
    }

    #[test]
    fn test_kms_api_version_defaults_to_v1() {
        let doc = r#"
name: foo
endpoint: unix:///tmp/foo.sock
"#;
        let kms: KmsConfiguration = serde_yaml::from_str(doc).unwrap();
        assert_eq!(kms.api_version, "v1");
        assert!(kms.timeout.is_none());
        assert!(kms.cachesize.is_none());
    }

    #[test]
    fn test_provider_variant_count() {
        let empty = ProviderConfiguration::default();
        assert_eq!(empty.variant_count(), 0);

        let one = ProviderConfiguration {
            identity: Some(IdentityConfiguration {}),
            ..Default::default()
        };
        assert_eq!(one.variant_count(), 1);

        let two = ProviderConfiguration {
            identity: Some(IdentityConfiguration {}),
            kms: Some(KmsConfiguration {
                name: "foo".into(),
                endpoint: "unix:///tmp/foo.sock".into(),
                api_version: "v1".into(),
                cachesize: None,
                timeout: None,
            }),
            ..Default::default()
        };
        assert_eq!(two.variant_count(), 2);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let doc = r#"
apiVersion: sealkv.io/v1
kind: EncryptionConfiguration
resources: []
extra: true
"#;
        assert!(serde_yaml::from_str::<EncryptionConfiguration>(doc).is_err());
    }
}
