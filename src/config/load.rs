// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Loading and compiling the encryption configuration.
//!
//! [`load_encryption_config`] turns the on-disk document into a
//! [`LoadedConfiguration`]: the per-resource transformer map, the health
//! checks guarding its KMS providers, the content hash used for change
//! detection, and the grace period the holder waits before releasing a
//! superseded generation's KMS connections.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::digest;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::envelope::{EnvelopeServiceFactory, EnvelopeTransformer, EnvelopeV2Transformer};
use crate::health::{AggregateHealthCheck, HealthCheck, KmsV1Probe, KmsV2Probe};
use crate::shutdown::ShutdownToken;
use crate::transform::{
    AesCbcTransformer, AesGcmTransformer, GroupResource, IdentityTransformer, PrefixEntry,
    PrefixTransformer, SecretboxTransformer, Transformer, TransformerMap,
};

use super::error::ConfigError;
use super::schema::{
    parse_duration, AesConfiguration, EncryptionConfiguration, KmsConfiguration,
    ProviderConfiguration, ResourceConfiguration, SecretboxConfiguration,
};

/// On-storage prefix of AES-GCM values, completed by `<keyname>:`.
pub const AESGCM_PREFIX: &str = "k8s:enc:aesgcm:v1:";

/// On-storage prefix of AES-CBC values, completed by `<keyname>:`.
pub const AESCBC_PREFIX: &str = "k8s:enc:aescbc:v1:";

/// On-storage prefix of secretbox values, completed by `<keyname>:`.
pub const SECRETBOX_PREFIX: &str = "k8s:enc:secretbox:v1:";

/// On-storage prefix of KMS v1 values, completed by `<providername>:`.
pub const KMS_V1_PREFIX: &str = "k8s:enc:kms:v1:";

/// On-storage prefix of KMS v2 values, completed by `<providername>:`.
pub const KMS_V2_PREFIX: &str = "k8s:enc:kms:v2:";

/// Default per-RPC timeout for KMS providers.
pub const KMS_TIMEOUT_DEFAULT: Duration = Duration::from_secs(3);

/// Default bound on a v1 provider's unwrapped-DEK cache.
pub const KMS_CACHE_SIZE_DEFAULT: usize = 1000;

/// Lower bound on the close grace period of any configuration.
pub const MIN_KMS_CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A compiled encryption configuration.
pub struct LoadedConfiguration {
    /// Per-resource transformers, wildcard keys included.
    pub transformers: TransformerMap,
    /// Health checks guarding the KMS providers. Compiling for reload folds
    /// them into exactly one aggregate check.
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
    /// Hex SHA-256 of the raw file bytes.
    pub content_hash: String,
    /// How long superseded KMS connections stay open for in-flight reads.
    pub kms_close_grace_period: Duration,
}

impl std::fmt::Debug for LoadedConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedConfiguration")
            .field("transformers", &self.transformers.len())
            .field("health_checks", &self.health_checks.len())
            .field("content_hash", &self.content_hash)
            .field("kms_close_grace_period", &self.kms_close_grace_period)
            .finish()
    }
}

/// Computes the content hash of a configuration document: the lowercase hex
/// SHA-256 of the raw bytes as read from disk.
pub fn compute_encryption_config_hash(data: &[u8]) -> String {
    hex_encode(digest::digest(&digest::SHA256, data).as_ref())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Reads, validates and compiles the configuration at `path`.
///
/// With `reload` set, the returned configuration carries exactly one health
/// check: the aggregate over every KMS probe (a no-op when no KMS provider
/// is configured). Without it, each probe is returned individually so the
/// server can register them on its health endpoint at boot.
///
/// Envelope services are constructed through `factory` under `shutdown`;
/// cancelling the token releases everything this call built.
pub async fn load_encryption_config(
    path: &Path,
    reload: bool,
    factory: &Arc<dyn EnvelopeServiceFactory>,
    shutdown: &ShutdownToken,
) -> Result<LoadedConfiguration, ConfigError> {
    let data = tokio::fs::read(path).await.map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let content_hash = compute_encryption_config_hash(&data);

    let config = parse_config(path, &data)?;
    validate_config(&config)?;

    let compiled = build_transformers(&config, factory, shutdown).await?;
    debug!(
        resources = compiled.transformers.len(),
        probes = compiled.probes.len(),
        grace_period_secs = compiled.grace_period.as_secs(),
        "compiled encryption configuration"
    );

    let health_checks: Vec<Arc<dyn HealthCheck>> = if reload {
        vec![Arc::new(AggregateHealthCheck::new(compiled.probes))]
    } else {
        compiled.probes
    };

    info!(path = %path.display(), hash = %content_hash, "loaded encryption configuration");
    Ok(LoadedConfiguration {
        transformers: compiled.transformers,
        health_checks,
        content_hash,
        kms_close_grace_period: compiled.grace_period,
    })
}

fn parse_config(path: &Path, data: &[u8]) -> Result<EncryptionConfiguration, ConfigError> {
    let config: EncryptionConfiguration =
        serde_yaml::from_slice(data).map_err(|e| ConfigError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !config.is_known_schema() {
        return Err(ConfigError::Invalid {
            field: "apiVersion".to_string(),
            value: format!("{}/{}", config.api_version, config.kind),
            detail: "expected sealkv.io/v1 EncryptionConfiguration or legacy v1 EncryptionConfig"
                .to_string(),
        });
    }
    Ok(config)
}

fn validate_config(config: &EncryptionConfiguration) -> Result<(), ConfigError> {
    if config.resources.is_empty() {
        return Err(ConfigError::Required {
            field: "resources".to_string(),
            detail: "at least one resource rule is required".to_string(),
        });
    }
    for (i, rule) in config.resources.iter().enumerate() {
        validate_rule(i, rule)?;
    }
    validate_masking(config)
}

fn validate_rule(i: usize, rule: &ResourceConfiguration) -> Result<(), ConfigError> {
    if rule.resources.is_empty() {
        return Err(ConfigError::Required {
            field: format!("resources[{i}].resources"),
            detail: "at least one resource selector is required".to_string(),
        });
    }
    if rule.providers.is_empty() {
        return Err(ConfigError::Required {
            field: format!("resources[{i}].providers"),
            detail: "at least one provider is required".to_string(),
        });
    }
    for (j, selector) in rule.resources.iter().enumerate() {
        if rule.resources[..j].contains(selector) {
            return Err(ConfigError::Duplicate {
                field: format!("resources[{i}].resources[{j}]"),
                value: selector.clone(),
            });
        }
    }
    for (j, provider) in rule.providers.iter().enumerate() {
        validate_provider(i, j, provider)?;
    }
    Ok(())
}

fn validate_provider(i: usize, j: usize, provider: &ProviderConfiguration) -> Result<(), ConfigError> {
    if provider.variant_count() != 1 {
        return Err(ConfigError::Field {
            field: format!("resources[{i}].providers[{j}]"),
            detail: "provider must contain exactly one provider".to_string(),
        });
    }
    let field = |suffix: &str| format!("resources[{i}].providers[{j}].{suffix}");

    if let Some(aes) = &provider.aesgcm {
        validate_aes_keys(&field("aesgcm"), aes)?;
    }
    if let Some(aes) = &provider.aescbc {
        validate_aes_keys(&field("aescbc"), aes)?;
    }
    if let Some(secretbox) = &provider.secretbox {
        validate_secretbox_keys(&field("secretbox"), secretbox)?;
    }
    if let Some(kms) = &provider.kms {
        validate_kms(&field("kms"), kms)?;
    }
    Ok(())
}

fn validate_aes_keys(field: &str, config: &AesConfiguration) -> Result<(), ConfigError> {
    validate_keys(field, &config.keys, &[16, 24, 32], "16, 24 or 32")
}

fn validate_secretbox_keys(field: &str, config: &SecretboxConfiguration) -> Result<(), ConfigError> {
    validate_keys(field, &config.keys, &[32], "32")
}

fn validate_keys(
    field: &str,
    keys: &[super::schema::Key],
    allowed_sizes: &[usize],
    expected: &str,
) -> Result<(), ConfigError> {
    if keys.is_empty() {
        return Err(ConfigError::Required {
            field: format!("{field}.keys"),
            detail: "at least one key is required".to_string(),
        });
    }
    for (k, key) in keys.iter().enumerate() {
        if key.name.is_empty() {
            return Err(ConfigError::Required {
                field: format!("{field}.keys[{k}].name"),
                detail: "key name is required".to_string(),
            });
        }
        if keys[..k].iter().any(|other| other.name == key.name) {
            return Err(ConfigError::Duplicate {
                field: format!("{field}.keys[{k}].name"),
                value: key.name.clone(),
            });
        }
        let decoded = decode_key(&format!("{field}.keys[{k}].secret"), &key.secret)?;
        if !allowed_sizes.contains(&decoded.len()) {
            return Err(ConfigError::Field {
                field: format!("{field}.keys[{k}].secret"),
                detail: format!("expected key of {} bytes, got {}", expected, decoded.len()),
            });
        }
    }
    Ok(())
}

fn decode_key(field: &str, secret: &str) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    BASE64
        .decode(secret)
        .map(Zeroizing::new)
        .map_err(|_| ConfigError::Field {
            field: field.to_string(),
            detail: "secret must be base64 encoded".to_string(),
        })
}

fn validate_kms(field: &str, kms: &KmsConfiguration) -> Result<(), ConfigError> {
    if kms.name.is_empty() {
        return Err(ConfigError::Required {
            field: format!("{field}.name"),
            detail: "provider name is required".to_string(),
        });
    }
    if kms.endpoint.is_empty() {
        return Err(ConfigError::Required {
            field: format!("{field}.endpoint"),
            detail: "endpoint is required".to_string(),
        });
    }
    match kms.api_version.as_str() {
        "v1" => {}
        "v2" => {
            if kms.name.contains(':') {
                return Err(ConfigError::Field {
                    field: format!("{field}.name"),
                    detail: "v2 provider names must not contain ':'".to_string(),
                });
            }
        }
        other => {
            return Err(ConfigError::Invalid {
                field: format!("{field}.apiVersion"),
                value: other.to_string(),
                detail:
                    "unsupported apiVersion apiVersion for KMS provider, only v1 and v2 are supported"
                        .to_string(),
            });
        }
    }
    if let Some(timeout) = &kms.timeout {
        let parsed = parse_duration(timeout).map_err(|reason| ConfigError::Field {
            field: format!("{field}.timeout"),
            detail: reason,
        })?;
        if parsed.is_zero() {
            return Err(ConfigError::Field {
                field: format!("{field}.timeout"),
                detail: "timeout must be greater than zero".to_string(),
            });
        }
    }
    if let Some(cachesize) = kms.cachesize {
        if cachesize < 0 {
            return Err(ConfigError::Field {
                field: format!("{field}.cachesize"),
                detail: "cachesize must not be negative".to_string(),
            });
        }
    }
    Ok(())
}

/// Rejects selectors that an earlier wildcard makes unreachable.
///
/// Selectors are scanned flattened, in file order; the first earlier rule
/// that covers a later one is reported. Identical wildcards do not mask
/// each other, only strict containment does.
fn validate_masking(config: &EncryptionConfiguration) -> Result<(), ConfigError> {
    let mut earlier: Vec<&str> = Vec::new();
    for rule in &config.resources {
        for selector in &rule.resources {
            for prior in &earlier {
                if masks(prior, selector) {
                    return Err(ConfigError::masked(selector, prior));
                }
            }
            earlier.push(selector);
        }
    }
    Ok(())
}

fn masks(earlier: &str, later: &str) -> bool {
    if earlier == later {
        return false;
    }
    if earlier == "*.*" {
        return true;
    }
    if let Some(group) = earlier.strip_prefix("*.") {
        if later == "*.*" || later.starts_with("*.") {
            return false;
        }
        return GroupResource::parse(later).group == group;
    }
    false
}

struct CompiledTransformers {
    transformers: TransformerMap,
    probes: Vec<Arc<dyn HealthCheck>>,
    grace_period: Duration,
}

async fn build_transformers(
    config: &EncryptionConfiguration,
    factory: &Arc<dyn EnvelopeServiceFactory>,
    shutdown: &ShutdownToken,
) -> Result<CompiledTransformers, ConfigError> {
    let mut transformers = TransformerMap::new();
    let mut probes: Vec<Arc<dyn HealthCheck>> = Vec::new();
    let mut timeout_sum = Duration::ZERO;

    for (i, rule) in config.resources.iter().enumerate() {
        let mut entries: Vec<PrefixEntry> = Vec::new();

        for (j, provider) in rule.providers.iter().enumerate() {
            let field = |suffix: &str| format!("resources[{i}].providers[{j}].{suffix}");

            if provider.identity.is_some() {
                entries.push(PrefixEntry::new(
                    "",
                    Arc::new(IdentityTransformer) as Arc<dyn Transformer>,
                ));
            } else if let Some(aes) = &provider.aesgcm {
                for (k, key) in aes.keys.iter().enumerate() {
                    let material = decode_key(&field(&format!("aesgcm.keys[{k}].secret")), &key.secret)?;
                    let transformer =
                        AesGcmTransformer::new(&material).map_err(|e| ConfigError::Field {
                            field: field(&format!("aesgcm.keys[{k}].secret")),
                            detail: e.to_string(),
                        })?;
                    entries.push(PrefixEntry::new(
                        format!("{}{}:", AESGCM_PREFIX, key.name),
                        Arc::new(transformer) as Arc<dyn Transformer>,
                    ));
                }
            } else if let Some(aes) = &provider.aescbc {
                for (k, key) in aes.keys.iter().enumerate() {
                    let material = decode_key(&field(&format!("aescbc.keys[{k}].secret")), &key.secret)?;
                    let transformer =
                        AesCbcTransformer::new(&material).map_err(|e| ConfigError::Field {
                            field: field(&format!("aescbc.keys[{k}].secret")),
                            detail: e.to_string(),
                        })?;
                    entries.push(PrefixEntry::new(
                        format!("{}{}:", AESCBC_PREFIX, key.name),
                        Arc::new(transformer) as Arc<dyn Transformer>,
                    ));
                }
            } else if let Some(secretbox) = &provider.secretbox {
                for (k, key) in secretbox.keys.iter().enumerate() {
                    let material =
                        decode_key(&field(&format!("secretbox.keys[{k}].secret")), &key.secret)?;
                    let transformer =
                        SecretboxTransformer::new(&material).map_err(|e| ConfigError::Field {
                            field: field(&format!("secretbox.keys[{k}].secret")),
                            detail: e.to_string(),
                        })?;
                    entries.push(PrefixEntry::new(
                        format!("{}{}:", SECRETBOX_PREFIX, key.name),
                        Arc::new(transformer) as Arc<dyn Transformer>,
                    ));
                }
            } else if let Some(kms) = &provider.kms {
                let timeout = match &kms.timeout {
                    Some(value) => parse_duration(value).map_err(|reason| ConfigError::Field {
                        field: field("kms.timeout"),
                        detail: reason,
                    })?,
                    None => KMS_TIMEOUT_DEFAULT,
                };

                match kms.api_version.as_str() {
                    "v1" => {
                        let service = factory
                            .create_v1(&kms.endpoint, timeout, shutdown)
                            .await
                            .map_err(|e| ConfigError::ServiceConstruction {
                                provider: kms.name.clone(),
                                reason: e.to_string(),
                            })?;
                        let cache_size = kms
                            .cachesize
                            .map(|size| size as usize)
                            .unwrap_or(KMS_CACHE_SIZE_DEFAULT);
                        entries.push(PrefixEntry::new(
                            format!("{}{}:", KMS_V1_PREFIX, kms.name),
                            Arc::new(EnvelopeTransformer::new(Arc::clone(&service), cache_size))
                                as Arc<dyn Transformer>,
                        ));
                        probes.push(Arc::new(KmsV1Probe::new(kms.name.clone(), service)));
                        // A superseded v1 connection may be serving a read
                        // and one retry when the swap happens.
                        timeout_sum += 2 * timeout;
                    }
                    _ => {
                        let service = factory
                            .create_v2(&kms.endpoint, &kms.name, timeout, shutdown)
                            .await
                            .map_err(|e| ConfigError::ServiceConstruction {
                                provider: kms.name.clone(),
                                reason: e.to_string(),
                            })?;
                        entries.push(PrefixEntry::new(
                            format!("{}{}:", KMS_V2_PREFIX, kms.name),
                            Arc::new(EnvelopeV2Transformer::new(
                                kms.name.clone(),
                                Arc::clone(&service),
                            )) as Arc<dyn Transformer>,
                        ));
                        probes.push(Arc::new(KmsV2Probe::new(kms.name.clone(), service)));
                        timeout_sum += timeout;
                    }
                }
            }
        }

        let compound: Arc<dyn Transformer> = Arc::new(PrefixTransformer::new(entries));
        for selector in &rule.resources {
            transformers
                .entry(GroupResource::parse(selector))
                .or_insert_with(|| Arc::clone(&compound));
        }
    }

    Ok(CompiledTransformers {
        transformers,
        probes,
        grace_period: timeout_sum.max(MIN_KMS_CLOSE_GRACE_PERIOD),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{
        DecryptRequest, EncryptResponse, EnvelopeError, EnvelopeService, EnvelopeServiceV2,
        StatusResponse, STATUS_HEALTHY, STATUS_VERSION,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const SAMPLE_TEXT: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const SAMPLE_CONTEXT: &[u8] = b"0123456789";

    struct MockV1Service;

    #[async_trait]
    impl EnvelopeService for MockV1Service {
        async fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
            Ok(BASE64.encode(data).into_bytes())
        }

        async fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
            BASE64
                .decode(data)
                .map_err(|e| EnvelopeError::Rpc(e.to_string()))
        }

        async fn health(&self) -> Result<(), EnvelopeError> {
            Ok(())
        }
    }

    struct MockV2Service;

    #[async_trait]
    impl EnvelopeServiceV2 for MockV2Service {
        async fn encrypt(
            &self,
            _uid: &str,
            plaintext: &[u8],
        ) -> Result<EncryptResponse, EnvelopeError> {
            Ok(EncryptResponse {
                ciphertext: BASE64.encode(plaintext).into_bytes(),
                key_id: "1".into(),
            })
        }

        async fn decrypt(
            &self,
            _uid: &str,
            req: &DecryptRequest,
        ) -> Result<Vec<u8>, EnvelopeError> {
            BASE64
                .decode(&req.ciphertext)
                .map_err(|e| EnvelopeError::Rpc(e.to_string()))
        }

        async fn status(&self) -> Result<StatusResponse, EnvelopeError> {
            Ok(StatusResponse {
                healthz: STATUS_HEALTHY.into(),
                version: STATUS_VERSION.into(),
                key_id: "1".into(),
            })
        }
    }

    struct MockFactory;

    #[async_trait]
    impl EnvelopeServiceFactory for MockFactory {
        async fn create_v1(
            &self,
            _endpoint: &str,
            _timeout: Duration,
            _shutdown: &ShutdownToken,
        ) -> Result<Arc<dyn EnvelopeService>, EnvelopeError> {
            Ok(Arc::new(MockV1Service))
        }

        async fn create_v2(
            &self,
            _endpoint: &str,
            _provider_name: &str,
            _timeout: Duration,
            _shutdown: &ShutdownToken,
        ) -> Result<Arc<dyn EnvelopeServiceV2>, EnvelopeError> {
            Ok(Arc::new(MockV2Service))
        }
    }

    fn mock_factory() -> Arc<dyn EnvelopeServiceFactory> {
        Arc::new(MockFactory)
    }

    #[derive(Clone, Copy)]
    enum Provider {
        Identity,
        AesGcm,
        AesCbc,
        Secretbox,
        KmsV1(Option<&'static str>),
        KmsV2(&'static str),
    }

    impl Provider {
        fn snippet(&self) -> String {
            match self {
                Provider::Identity => "      - identity: {}\n".to_string(),
                Provider::AesGcm => "      - aesgcm:\n          keys:\n            - name: key1\n              secret: c2VjcmV0IGlzIHNlY3VyZQ==\n            - name: key2\n              secret: dGhpcyBpcyBwYXNzd29yZA==\n".to_string(),
                Provider::AesCbc => "      - aescbc:\n          keys:\n            - name: key1\n              secret: c2VjcmV0IGlzIHNlY3VyZQ==\n            - name: key2\n              secret: dGhpcyBpcyBwYXNzd29yZA==\n".to_string(),
                Provider::Secretbox => "      - secretbox:\n          keys:\n            - name: key1\n              secret: YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=\n".to_string(),
                Provider::KmsV1(timeout) => {
                    let mut out = "      - kms:\n          name: testprovider\n          apiVersion: v1\n          endpoint: unix:///tmp/testprovider.sock\n          cachesize: 10\n".to_string();
                    if let Some(timeout) = timeout {
                        out.push_str(&format!("          timeout: {timeout}\n"));
                    }
                    out
                }
                Provider::KmsV2(timeout) => format!(
                    "      - kms:\n          name: testproviderv2\n          apiVersion: v2\n          endpoint: unix:///tmp/testproviderv2.sock\n          timeout: {timeout}\n"
                ),
            }
        }
    }

    fn config_yaml(order: &[Provider]) -> String {
        let mut doc = String::from(
            "kind: EncryptionConfiguration\napiVersion: sealkv.io/v1\nresources:\n  - resources:\n      - secrets\n    providers:\n",
        );
        for provider in order {
            doc.push_str(&provider.snippet());
        }
        doc
    }

    fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn load(path: &Path) -> Result<LoadedConfiguration, ConfigError> {
        load_encryption_config(path, true, &mock_factory(), &ShutdownToken::new()).await
    }

    /// The six canonical provider orderings and the grace period each one's
    /// KMS timeouts add up to (two timeouts per v1 provider, one per v2).
    fn grace_period_fixtures() -> Vec<(&'static str, Vec<Provider>, Duration)> {
        vec![
            (
                "identity-first.yaml",
                vec![
                    Provider::Identity,
                    Provider::AesGcm,
                    Provider::KmsV1(Some("15s")),
                    Provider::AesCbc,
                    Provider::Secretbox,
                    Provider::KmsV2("16s"),
                ],
                Duration::from_secs(46),
            ),
            (
                "aes-gcm-first.yaml",
                vec![
                    Provider::AesGcm,
                    Provider::AesCbc,
                    Provider::Secretbox,
                    Provider::KmsV1(Some("10s")),
                    Provider::KmsV2("12s"),
                    Provider::Identity,
                ],
                Duration::from_secs(32),
            ),
            (
                "aes-cbc-first.yaml",
                vec![
                    Provider::AesCbc,
                    Provider::AesGcm,
                    Provider::Secretbox,
                    Provider::KmsV1(Some("8s")),
                    Provider::KmsV2("10s"),
                    Provider::Identity,
                ],
                Duration::from_secs(26),
            ),
            (
                "secret-box-first.yaml",
                vec![
                    Provider::Secretbox,
                    Provider::AesGcm,
                    Provider::AesCbc,
                    Provider::KmsV1(None),
                    Provider::KmsV2("8s"),
                    Provider::Identity,
                ],
                Duration::from_secs(14),
            ),
            (
                "kms-first.yaml",
                vec![
                    Provider::KmsV1(Some("12s")),
                    Provider::AesGcm,
                    Provider::AesCbc,
                    Provider::Secretbox,
                    Provider::KmsV2("10s"),
                    Provider::Identity,
                ],
                Duration::from_secs(34),
            ),
            (
                "kmsv2-first.yaml",
                vec![
                    Provider::KmsV2("14s"),
                    Provider::AesGcm,
                    Provider::AesCbc,
                    Provider::Secretbox,
                    Provider::KmsV1(Some("14s")),
                    Provider::Identity,
                ],
                Duration::from_secs(42),
            ),
        ]
    }

    #[test]
    fn test_content_hash_of_empty_input() {
        assert_eq!(
            compute_encryption_config_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let doc = config_yaml(&[Provider::Identity]);
        assert_eq!(
            compute_encryption_config_hash(doc.as_bytes()),
            compute_encryption_config_hash(doc.as_bytes())
        );
        assert_ne!(
            compute_encryption_config_hash(doc.as_bytes()),
            compute_encryption_config_hash(b"something else")
        );
    }

    #[tokio::test]
    async fn test_close_grace_period_per_ordering() {
        let dir = TempDir::new().unwrap();
        for (name, order, expected) in grace_period_fixtures() {
            let path = write_config(&dir, name, &config_yaml(&order));
            let loaded = load(&path).await.unwrap();
            assert_eq!(
                loaded.kms_close_grace_period, expected,
                "grace period mismatch for {name}"
            );
        }
    }

    #[tokio::test]
    async fn test_cross_ordering_decode_and_staleness() {
        let dir = TempDir::new().unwrap();
        let mut loaded = Vec::new();
        for (name, order, _) in grace_period_fixtures() {
            let path = write_config(&dir, name, &config_yaml(&order));
            let config = load(&path).await.unwrap();
            let transformer = Arc::clone(
                crate::transform::transformer_for(
                    &config.transformers,
                    &GroupResource::parse("secrets"),
                )
                .unwrap(),
            );
            loaded.push((name, transformer));
        }

        for (producer_name, producer) in &loaded {
            let stored = producer
                .transform_to_storage(SAMPLE_TEXT, SAMPLE_CONTEXT)
                .await
                .unwrap();

            for (consumer_name, consumer) in &loaded {
                let (plaintext, stale) = consumer
                    .transform_from_storage(&stored, SAMPLE_CONTEXT)
                    .await
                    .unwrap_or_else(|e| {
                        panic!("{consumer_name} failed to read {producer_name} value: {e}")
                    });
                assert_eq!(plaintext, SAMPLE_TEXT, "{consumer_name} read {producer_name}");
                assert_eq!(
                    stale,
                    producer_name != consumer_name,
                    "stale flag wrong when {consumer_name} reads {producer_name}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_reload_compiles_exactly_one_aggregate_check() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "kms.yaml",
            &config_yaml(&[Provider::KmsV1(Some("5s")), Provider::KmsV2("5s")]),
        );
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.health_checks.len(), 1);
        assert_eq!(loaded.health_checks[0].name(), "kms-providers");
        assert!(loaded.health_checks[0].check().await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_without_kms_has_passing_noop_check() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "aes.yaml", &config_yaml(&[Provider::AesGcm]));
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.health_checks.len(), 1);
        assert!(loaded.health_checks[0].check().await.is_ok());
        assert_eq!(loaded.kms_close_grace_period, MIN_KMS_CLOSE_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn test_boot_load_returns_individual_probes() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "kms.yaml",
            &config_yaml(&[Provider::KmsV1(Some("5s")), Provider::KmsV2("5s")]),
        );
        let loaded =
            load_encryption_config(&path, false, &mock_factory(), &ShutdownToken::new())
                .await
                .unwrap();
        assert_eq!(loaded.health_checks.len(), 2);
        assert_eq!(loaded.health_checks[0].name(), "testprovider");
        assert_eq!(loaded.health_checks[1].name(), "testproviderv2");
    }

    #[tokio::test]
    async fn test_default_timeout_is_three_seconds() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "default-timeout.yaml",
            &config_yaml(&[Provider::KmsV1(None), Provider::KmsV2("5s")]),
        );
        let loaded = load(&path).await.unwrap();
        // Two v1 timeouts at the 3 s default plus one v2 timeout of 5 s is
        // 11 s, above the 10 s floor, so the default is observable.
        assert_eq!(loaded.kms_close_grace_period, Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_close_grace_period_has_floor() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "short-timeout.yaml",
            &config_yaml(&[Provider::KmsV1(Some("1s"))]),
        );
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.kms_close_grace_period, MIN_KMS_CLOSE_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn test_selector_masked_within_one_rule() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - configmaps
      - "*."
      - secrets
    providers:
      - kms:
          name: kms
          apiVersion: v1
          endpoint: unix:///tmp/testprovider.sock
          timeout: 3s
"#;
        let path = write_config(&dir, "masked.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource secrets is masked by earlier rule '*.'"
        );
    }

    #[tokio::test]
    async fn test_selector_masked_by_universal_wildcard_in_earlier_rule() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - configmaps
    providers:
      - identity: {}
  - resources:
      - "*.*"
      - secrets
    providers:
      - identity: {}
"#;
        let path = write_config(&dir, "masked-universal.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource secrets is masked by earlier rule *.*"
        );
    }

    #[tokio::test]
    async fn test_group_wildcard_masked_by_universal_wildcard() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - configmaps
      - "*.*"
      - "*."
    providers:
      - identity: {}
"#;
        let path = write_config(&dir, "masked-wildcard.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource *. is masked by earlier rule *.*"
        );
    }

    #[tokio::test]
    async fn test_trailing_universal_wildcard_masks_nothing() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - configmaps
      - secrets
      - "*.*"
    providers:
      - identity: {}
"#;
        let path = write_config(&dir, "unmasked.yaml", doc);
        assert!(load(&path).await.is_ok());
    }

    #[test]
    fn test_group_wildcard_does_not_mask_other_groups_or_wildcards() {
        assert!(!masks("*.apps", "secrets"));
        assert!(!masks("*.apps", "*.batch"));
        assert!(!masks("*.", "*.*"));
        assert!(!masks("*.", "*."));
        assert!(!masks("*.*", "*.*"));
        assert!(masks("*.apps", "deployments.apps"));
        assert!(masks("*.", "secrets"));
        assert!(masks("*.*", "*."));
        assert!(masks("*.*", "secrets"));
    }

    #[tokio::test]
    async fn test_unsupported_kms_api_version_error() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - kms:
          name: foo
          apiVersion: v3
          endpoint: unix:///tmp/testprovider.sock
"#;
        let path = write_config(&dir, "bad-apiversion.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "resources[0].providers[0].kms.apiVersion: Invalid value: \"v3\": unsupported apiVersion apiVersion for KMS provider, only v1 and v2 are supported"
        );
    }

    #[tokio::test]
    async fn test_provider_slot_must_have_exactly_one_variant() {
        let dir = TempDir::new().unwrap();
        let empty = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - {}
"#;
        let path = write_config(&dir, "empty-provider.yaml", empty);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("exactly one provider"), "{err}");

        let double = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - identity: {}
        secretbox:
          keys:
            - name: key1
              secret: YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=
"#;
        let path = write_config(&dir, "double-provider.yaml", double);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("exactly one provider"), "{err}");
    }

    #[tokio::test]
    async fn test_key_material_validation() {
        let dir = TempDir::new().unwrap();

        let bad_base64 = config_yaml(&[Provider::Identity]).replace(
            "identity: {}",
            "aesgcm:\n          keys:\n            - name: key1\n              secret: \"not base64!\"",
        );
        let path = write_config(&dir, "bad-base64.yaml", &bad_base64);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("base64"), "{err}");

        // "short" decodes to 4 bytes, not an AES key size.
        let bad_length = config_yaml(&[Provider::Identity]).replace(
            "identity: {}",
            "aescbc:\n          keys:\n            - name: key1\n              secret: c2hvcnQ=",
        );
        let path = write_config(&dir, "bad-length.yaml", &bad_length);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("16, 24 or 32"), "{err}");

        // A 16 byte secretbox key is rejected; secretbox requires 32.
        let bad_secretbox = config_yaml(&[Provider::Identity]).replace(
            "identity: {}",
            "secretbox:\n          keys:\n            - name: key1\n              secret: c2VjcmV0IGlzIHNlY3VyZQ==",
        );
        let path = write_config(&dir, "bad-secretbox.yaml", &bad_secretbox);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("32"), "{err}");

        let dup_names = config_yaml(&[Provider::Identity]).replace(
            "identity: {}",
            "aesgcm:\n          keys:\n            - name: key1\n              secret: c2VjcmV0IGlzIHNlY3VyZQ==\n            - name: key1\n              secret: dGhpcyBpcyBwYXNzd29yZA==",
        );
        let path = write_config(&dir, "dup-names.yaml", &dup_names);
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_kms_field_validation() {
        let dir = TempDir::new().unwrap();

        let missing_endpoint = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - kms:
          name: foo
          endpoint: ""
"#;
        let path = write_config(&dir, "no-endpoint.yaml", missing_endpoint);
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Required { .. }), "{err}");

        let colon_name = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - kms:
          name: "foo:bar"
          apiVersion: v2
          endpoint: unix:///tmp/foo.sock
"#;
        let path = write_config(&dir, "colon-name.yaml", colon_name);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("':'"), "{err}");

        let negative_cache = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - kms:
          name: foo
          endpoint: unix:///tmp/foo.sock
          cachesize: -1
"#;
        let path = write_config(&dir, "negative-cache.yaml", negative_cache);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("cachesize"), "{err}");

        let zero_timeout = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
    providers:
      - kms:
          name: foo
          endpoint: unix:///tmp/foo.sock
          timeout: 0s
"#;
        let path = write_config(&dir, "zero-timeout.yaml", zero_timeout);
        let err = load(&path).await.unwrap_err().to_string();
        assert!(err.contains("greater than zero"), "{err}");
    }

    #[tokio::test]
    async fn test_duplicate_selector_within_rule_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - secrets
      - secrets
    providers:
      - identity: {}
"#;
        let path = write_config(&dir, "dup-selector.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_per_rule_transformers_and_wildcard_fallback() {
        let dir = TempDir::new().unwrap();
        let doc = r#"
kind: EncryptionConfiguration
apiVersion: sealkv.io/v1
resources:
  - resources:
      - configmaps
    providers:
      - kms:
          name: kms
          apiVersion: v1
          endpoint: unix:///tmp/testprovider.sock
          timeout: 3s
  - resources:
      - secrets
    providers:
      - kms:
          name: another-kms
          apiVersion: v1
          endpoint: unix:///tmp/testprovider.sock
          timeout: 3s
      - identity: {}
  - resources:
      - "*.*"
    providers:
      - aesgcm:
          keys:
            - name: yet-another-provider
              secret: c2VjcmV0IGlzIHNlY3VyZQ==
"#;
        let path = write_config(&dir, "wildcard.yaml", doc);
        let loaded = load(&path).await.unwrap();

        let cases = [
            ("configmaps", "k8s:enc:kms:v1:kms:"),
            ("secrets", "k8s:enc:kms:v1:another-kms:"),
            ("deployments.apps", "k8s:enc:aesgcm:v1:yet-another-provider:"),
        ];
        for (resource, prefix) in cases {
            let transformer = crate::transform::transformer_for(
                &loaded.transformers,
                &GroupResource::parse(resource),
            )
            .unwrap();
            let stored = transformer
                .transform_to_storage(SAMPLE_TEXT, SAMPLE_CONTEXT)
                .await
                .unwrap();
            assert!(
                stored.starts_with(prefix.as_bytes()),
                "resource {resource} does not write through {prefix}"
            );
        }
    }

    #[tokio::test]
    async fn test_resource_without_rule_has_no_transformer() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "one.yaml", &config_yaml(&[Provider::AesGcm]));
        let loaded = load(&path).await.unwrap();
        assert!(crate::transform::transformer_for(
            &loaded.transformers,
            &GroupResource::parse("configmaps")
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_legacy_schema_loads() {
        let dir = TempDir::new().unwrap();
        let doc = config_yaml(&[Provider::AesGcm])
            .replace("kind: EncryptionConfiguration", "kind: EncryptionConfig")
            .replace("apiVersion: sealkv.io/v1", "apiVersion: v1");
        let path = write_config(&dir, "legacy.yaml", &doc);
        let loaded = load(&path).await.unwrap();
        let transformer = crate::transform::transformer_for(
            &loaded.transformers,
            &GroupResource::parse("secrets"),
        )
        .unwrap();
        let stored = transformer
            .transform_to_storage(SAMPLE_TEXT, SAMPLE_CONTEXT)
            .await
            .unwrap();
        assert!(stored.starts_with(b"k8s:enc:aesgcm:v1:key1:"));
    }

    #[tokio::test]
    async fn test_unknown_schema_pair_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = config_yaml(&[Provider::AesGcm])
            .replace("apiVersion: sealkv.io/v1", "apiVersion: v2");
        let path = write_config(&dir, "unknown-schema.yaml", &doc);
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unparseable_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "junk.yaml", ":\n  - this is not\nthe schema");
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Decode { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_empty_resources_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = "kind: EncryptionConfiguration\napiVersion: sealkv.io/v1\nresources: []\n";
        let path = write_config(&dir, "empty.yaml", doc);
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Required { .. }), "{err}");
    }
}
