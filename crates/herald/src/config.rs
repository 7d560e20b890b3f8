//! Gateway configuration.
//!
//! Two YAML documents: the main config (backends, buckets, proxy trust) and
//! an optional `pods.yaml` naming orchestration peers. Schema validation is
//! strict: unknown or mistyped fields abort startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the main config file.
pub const CONFIG_FILE_PATH_ENV: &str = "CONFIG_FILE_PATH";
/// Legacy spelling, still honored.
pub const HERALD_CONFIG_FILE_PATH_ENV: &str = "HERALD_CONFIG_FILE_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("bucket {bucket:?} references unknown backend {backend:?}")]
    UnknownBackend { bucket: String, backend: String },
    #[error("bucket {bucket:?} has an invalid {protocol} config: {source}")]
    InvalidBucketConfig {
        bucket: String,
        protocol: &'static str,
        source: serde_yaml::Error,
    },
    #[error("replica {replica:?} of bucket {bucket:?} references unknown backend {backend:?}")]
    UnknownReplicaBackend {
        bucket: String,
        replica: String,
        backend: String,
    },
    #[error("bucket {bucket:?} declares duplicate replica name {replica:?}")]
    DuplicateReplicaName { bucket: String, replica: String },
    #[error("invalid trusted CIDR: {0}")]
    Cidr(#[from] crate::net::ParseCidrError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    S3,
    Swift,
}

/// A declared backend: a name bound to a wire protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendDef {
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Bucket-level S3 backend config. Several buckets may share one endpoint;
/// each carries its own upstream bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub credentials: S3Credentials,
    #[serde(default)]
    pub force_path_style: bool,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwiftCredentials {
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain_name: String,
    pub project_domain_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwiftConfig {
    pub auth_url: String,
    pub region: String,
    pub container: String,
    pub credentials: SwiftCredentials,
}

impl SwiftConfig {
    /// Identity key for the Keystone token cache: one token per
    /// (auth endpoint, user, project, region).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.auth_url, self.credentials.username, self.credentials.project_name, self.region
        )
    }
}

/// Raw bucket declaration; the backend-specific `config` is coerced by the
/// registry once the backend protocol is known.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketDef {
    pub backend: String,
    pub config: serde_yaml::Value,
    #[serde(default)]
    pub replicas: Vec<ReplicaDef>,
    #[serde(default)]
    pub is_replica: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaDef {
    pub name: String,
    pub backend: String,
    pub config: serde_yaml::Value,
}

/// Extra client-facing SigV4 keys, on top of the per-bucket backend keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
}

fn default_port() -> u16 {
    8000
}

fn default_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_task_store_path() -> PathBuf {
    PathBuf::from("herald-tasks")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    pub backends: HashMap<String, BackendDef>,
    pub buckets: HashMap<String, BucketDef>,
    #[serde(default)]
    pub trust_proxy: bool,
    #[serde(default)]
    pub trusted_cidrs: Vec<String>,
    #[serde(default)]
    pub service_credentials: Vec<ServiceCredential>,
    #[serde(default = "default_task_store_path")]
    pub task_store_path: PathBuf,
}

impl AppConfig {
    pub fn from_yaml_str(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(path, &contents)
    }

    /// Resolves the config file path: explicit argument, then
    /// `CONFIG_FILE_PATH`, then `HERALD_CONFIG_FILE_PATH`, then the default.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_owned();
        }
        for var in [CONFIG_FILE_PATH_ENV, HERALD_CONFIG_FILE_PATH_ENV] {
            if let Ok(path) = std::env::var(var)
                && !path.is_empty()
            {
                return PathBuf::from(path);
            }
        }
        PathBuf::from("herald.yaml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (bucket_name, bucket) in &self.buckets {
            let Some(backend) = self.backends.get(&bucket.backend) else {
                return Err(ConfigError::UnknownBackend {
                    bucket: bucket_name.clone(),
                    backend: bucket.backend.clone(),
                });
            };
            coerce_backend_config(bucket_name, backend.protocol, &bucket.config)?;

            let mut seen = std::collections::HashSet::new();
            for replica in &bucket.replicas {
                if !seen.insert(replica.name.as_str()) {
                    return Err(ConfigError::DuplicateReplicaName {
                        bucket: bucket_name.clone(),
                        replica: replica.name.clone(),
                    });
                }
                let Some(backend) = self.backends.get(&replica.backend) else {
                    return Err(ConfigError::UnknownReplicaBackend {
                        bucket: bucket_name.clone(),
                        replica: replica.name.clone(),
                        backend: replica.backend.clone(),
                    });
                };
                coerce_backend_config(bucket_name, backend.protocol, &replica.config)?;
            }
        }
        for cidr in &self.trusted_cidrs {
            let _: crate::net::Cidr = cidr.parse()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn parsed_cidrs(&self) -> Vec<crate::net::Cidr> {
        // validated at load time
        self.trusted_cidrs.iter().filter_map(|c| c.parse().ok()).collect()
    }
}

/// A backend-specific bucket config, coerced from YAML per the backend's
/// declared protocol. The serialized form is tagged so persisted mirror
/// tasks survive restarts unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", content = "config")]
pub enum BackendConfig {
    #[serde(rename = "S3BucketConfig")]
    S3(S3Config),
    #[serde(rename = "SwiftBucketConfig")]
    Swift(SwiftConfig),
}

pub(crate) fn coerce_backend_config(
    bucket: &str,
    protocol: Protocol,
    value: &serde_yaml::Value,
) -> Result<BackendConfig, ConfigError> {
    match protocol {
        Protocol::S3 => {
            let cfg: S3Config =
                serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::InvalidBucketConfig {
                    bucket: bucket.to_owned(),
                    protocol: "s3",
                    source,
                })?;
            Ok(BackendConfig::S3(cfg))
        }
        Protocol::Swift => {
            let cfg: SwiftConfig =
                serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::InvalidBucketConfig {
                    bucket: bucket.to_owned(),
                    protocol: "swift",
                    source,
                })?;
            Ok(BackendConfig::Swift(cfg))
        }
    }
}

/// Optional orchestration peers (`pods.yaml`). Parsed and validated when
/// present; the request pipeline does not consume it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodsConfig {
    #[serde(default)]
    pub pods: Vec<PodDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodDef {
    pub name: String,
    pub endpoint: String,
}

impl PodsConfig {
    pub fn load_optional(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
port: 8000
backends:
  minio:
    protocol: s3
  openstack:
    protocol: swift
buckets:
  s3-test:
    backend: minio
    config:
      endpoint: "http://127.0.0.1:9000"
      region: us-east-1
      bucket: s3-test-upstream
      forcePathStyle: true
      credentials:
        accessKeyId: minioadmin
        secretAccessKey: minioadmin
    replicas:
      - name: backup-1
        backend: openstack
        config:
          auth_url: "http://127.0.0.1:5000/v3"
          region: RegionOne
          container: s3-test-backup
          credentials:
            username: demo
            password: secret
            project_name: demo
            user_domain_name: Default
            project_domain_name: Default
  swift-test:
    backend: openstack
    config:
      auth_url: "http://127.0.0.1:5000/v3"
      region: RegionOne
      container: swift-test
      credentials:
        username: demo
        password: secret
        project_name: demo
        user_domain_name: Default
        project_domain_name: Default
trust_proxy: true
trusted_cidrs:
  - "10.0.0.0/8"
service_credentials:
  - accessKeyId: heraldkey
    secretAccessKey: heraldsecret
"#;

    #[test]
    fn parses_sample() {
        let cfg = AppConfig::from_yaml_str(Path::new("test.yaml"), SAMPLE).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.backends.len(), 2);
        assert!(cfg.trust_proxy);
        assert_eq!(cfg.parsed_cidrs().len(), 1);
        let bucket = &cfg.buckets["s3-test"];
        assert_eq!(bucket.replicas.len(), 1);
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let yaml = r#"
backends:
  minio:
    protocol: s3
buckets:
  b:
    backend: nope
    config: {}
"#;
        let err = AppConfig::from_yaml_str(Path::new("t.yaml"), yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend { .. }));
    }

    #[test]
    fn unknown_field_is_fatal() {
        let yaml = r#"
backends: {}
buckets: {}
surprise: true
"#;
        assert!(AppConfig::from_yaml_str(Path::new("t.yaml"), yaml).is_err());
    }

    #[test]
    fn mistyped_bucket_config_is_fatal() {
        let yaml = r#"
backends:
  minio:
    protocol: s3
buckets:
  b:
    backend: minio
    config:
      endpoint: "http://x"
      region: r
      bucket: b
      credentials:
        accessKeyId: k
"#;
        let err = AppConfig::from_yaml_str(Path::new("t.yaml"), yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBucketConfig { .. }));
    }

    #[test]
    fn duplicate_replica_name_is_fatal() {
        let yaml = r#"
backends:
  minio:
    protocol: s3
buckets:
  b:
    backend: minio
    config:
      endpoint: "http://x"
      region: r
      bucket: b
      credentials: { accessKeyId: k, secretAccessKey: s }
    replicas:
      - name: r1
        backend: minio
        config:
          endpoint: "http://y"
          region: r
          bucket: b2
          credentials: { accessKeyId: k, secretAccessKey: s }
      - name: r1
        backend: minio
        config:
          endpoint: "http://z"
          region: r
          bucket: b3
          credentials: { accessKeyId: k, secretAccessKey: s }
"#;
        let err = AppConfig::from_yaml_str(Path::new("t.yaml"), yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateReplicaName { .. }));
    }
}
