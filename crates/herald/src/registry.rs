//! Bucket registry.
//!
//! Built once at boot from the validated configuration; read-only afterward.
//! Lookup is O(1) by client-visible bucket name.

use crate::config::{AppConfig, BackendConfig, ConfigError, coerce_backend_config};

use std::collections::HashMap;
use std::sync::Arc;

/// A mirror target for a bucket. `name` is unique within the bucket.
#[derive(Debug, Clone)]
pub struct Replica {
    pub name: String,
    pub config: BackendConfig,
}

/// A gateway bucket: the client-visible name bound to a primary backend and
/// an ordered list of replicas.
///
/// A bucket is either an entry point with replicas or itself a replica,
/// never both.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub bucket_name: String,
    pub config: BackendConfig,
    pub replicas: Vec<Replica>,
    pub is_replica: bool,
}

impl Bucket {
    #[must_use]
    pub fn has_replicas(&self) -> bool {
        !self.replicas.is_empty()
    }

    /// The upstream container/bucket name on the backend.
    #[must_use]
    pub fn upstream_name(&self) -> &str {
        match &self.config {
            BackendConfig::S3(cfg) => &cfg.bucket,
            BackendConfig::Swift(cfg) => &cfg.container,
        }
    }

    /// Builds the bucket record a replica is dispatched under. Marked
    /// `is_replica` so a failed replica attempt never fans out further.
    #[must_use]
    pub fn replica_bucket(&self, replica: &Replica) -> Bucket {
        Bucket {
            bucket_name: self.bucket_name.clone(),
            config: replica.config.clone(),
            replicas: Vec::new(),
            is_replica: true,
        }
    }
}

/// Immutable bucket name → bucket mapping.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: HashMap<String, Arc<Bucket>>,
}

impl BucketRegistry {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let mut buckets = HashMap::with_capacity(cfg.buckets.len());
        for (name, def) in &cfg.buckets {
            let backend = cfg.backends.get(&def.backend).ok_or_else(|| ConfigError::UnknownBackend {
                bucket: name.clone(),
                backend: def.backend.clone(),
            })?;
            let config = coerce_backend_config(name, backend.protocol, &def.config)?;

            let mut replicas = Vec::with_capacity(def.replicas.len());
            for replica in &def.replicas {
                let backend =
                    cfg.backends
                        .get(&replica.backend)
                        .ok_or_else(|| ConfigError::UnknownReplicaBackend {
                            bucket: name.clone(),
                            replica: replica.name.clone(),
                            backend: replica.backend.clone(),
                        })?;
                let config = coerce_backend_config(name, backend.protocol, &replica.config)?;
                replicas.push(Replica {
                    name: replica.name.clone(),
                    config,
                });
            }

            buckets.insert(
                name.clone(),
                Arc::new(Bucket {
                    bucket_name: name.clone(),
                    config,
                    replicas,
                    is_replica: def.is_replica,
                }),
            );
        }
        Ok(Self { buckets })
    }

    #[must_use]
    pub fn get(&self, bucket_name: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(bucket_name).cloned()
    }

    /// Client-visible bucket names, sorted for stable listings.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Bucket>> {
        self.buckets.values()
    }
}
