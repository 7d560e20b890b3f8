//! Mirror replay workers.
//!
//! One consumer per primary bucket, spawned at boot. Each worker peeks the
//! head of its FIFO, applies the task against the replica, then
//! acknowledges. Transient failures are requeued at the tail with a bumped
//! retry count and exponential backoff; permanent failures (upstream 4xx,
//! undecodable tasks) are logged as poison and dropped. Client responses
//! are never affected by worker outcomes.

use super::{MirrorCommand, MirrorTask, QueuedTask};

use crate::config::BackendConfig;
use crate::forward::{backoff_delay, signed_get};
use crate::http::{OrderedQs, Response};
use crate::registry::Bucket;
use crate::request::{RequestMeta, UrlFormat};
use crate::resolver::{GatewayRequest, RequestContext};
use crate::swift::SwiftClient;
use crate::S3Result;

use std::sync::Arc;

use http::HeaderMap;
use http::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Give up on a task after this many requeues.
const MAX_RETRIES: u32 = 5;

/// Background consumers, one per replicated primary bucket.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one worker per bucket that has replicas.
    #[must_use]
    pub fn spawn(ctx: Arc<RequestContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();
        for bucket in ctx.registry.iter() {
            if bucket.has_replicas() && !bucket.is_replica {
                let ctx = ctx.clone();
                let bucket = bucket.clone();
                let rx = shutdown.subscribe();
                handles.push(tokio::spawn(run_worker(ctx, bucket, rx)));
            }
        }
        info!(workers = handles.len(), "mirror workers started");
        Self { shutdown, handles }
    }

    /// Signals every worker and waits for the task in hand to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(ctx: Arc<RequestContext>, bucket: Arc<Bucket>, mut shutdown: watch::Receiver<bool>) {
    let bucket_name = bucket.bucket_name.clone();
    let notify = ctx.mirror.notifier(&bucket_name);
    debug!(bucket = %bucket_name, "mirror worker running");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match ctx.mirror.peek(&bucket_name) {
            Ok(Some(queued)) => handle_task(&ctx, &bucket_name, queued).await,
            Ok(None) => {
                tokio::select! {
                    () = notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(err) => {
                error!(bucket = %bucket_name, %err, "mirror queue read failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
    debug!(bucket = %bucket_name, "mirror worker stopped");
}

async fn handle_task(ctx: &RequestContext, bucket_name: &str, queued: QueuedTask) {
    let task = &queued.task;
    let locked = ctx.mirror.locked_storages();

    match process_task(ctx, task).await {
        Ok(()) => {
            debug!(bucket = bucket_name, nonce = %task.nonce, replica = %task.replica_name, "mirror task applied");
            if let Err(err) = ctx.mirror.ack(bucket_name, &queued.key) {
                error!(bucket = bucket_name, %err, "mirror ack failed");
                return;
            }
            locked.unlock(bucket_name, &task.replica_name);
        }
        Err(err) if err.is_retryable() && task.retry_count < MAX_RETRIES => {
            let retry = MirrorTask {
                retry_count: task.retry_count + 1,
                ..task.clone()
            };
            warn!(
                bucket = bucket_name,
                nonce = %task.nonce,
                retry = retry.retry_count,
                %err,
                "mirror task failed, requeueing"
            );
            tokio::time::sleep(backoff_delay(retry.retry_count)).await;
            // re-push before ack: a crash between the two replays the task
            // instead of dropping it
            if let Err(err) = ctx.mirror.push(bucket_name, &retry) {
                error!(bucket = bucket_name, %err, "mirror requeue failed");
                return;
            }
            locked.unlock(bucket_name, &task.replica_name);
            if let Err(err) = ctx.mirror.ack(bucket_name, &queued.key) {
                error!(bucket = bucket_name, %err, "mirror ack failed");
            }
        }
        Err(err) => {
            error!(
                bucket = bucket_name,
                nonce = %task.nonce,
                replica = %task.replica_name,
                retries = task.retry_count,
                %err,
                "mirror task poisoned, dropping"
            );
            let _ = ctx.mirror.ack(bucket_name, &queued.key);
            locked.unlock(bucket_name, &task.replica_name);
        }
    }
}

fn replica_record(task: &MirrorTask) -> Bucket {
    Bucket {
        bucket_name: task.bucket_name.clone(),
        config: task.backup_config.clone(),
        replicas: Vec::new(),
        is_replica: true,
    }
}

fn primary_record(task: &MirrorTask) -> Bucket {
    Bucket {
        bucket_name: task.bucket_name.clone(),
        config: task.main_config.clone(),
        replicas: Vec::new(),
        is_replica: true,
    }
}

/// Applies one mirror task against its replica.
pub async fn process_task(ctx: &RequestContext, task: &MirrorTask) -> S3Result<()> {
    match task.command {
        MirrorCommand::PutObject | MirrorCommand::CompleteMultipartUpload => {
            copy_from_primary(ctx, task).await
        }
        MirrorCommand::DeleteObject
        | MirrorCommand::CopyObject
        | MirrorCommand::CreateBucket
        | MirrorCommand::DeleteBucket
        | MirrorCommand::DeleteObjects => replay_original(ctx, task).await,
    }
}

/// Replays the recorded client request against the replica's resolver.
async fn replay_original(ctx: &RequestContext, task: &MirrorTask) -> S3Result<()> {
    let req = task.original.to_gateway_request()?;
    let replica = replica_record(task);
    let resp = crate::resolver::dispatch(ctx, &replica, req, false).await?;
    // any settled status means the mutation was applied or is permanently
    // moot (replayed deletes hitting 404 are the normal case)
    debug!(status = %resp.status, command = ?task.command, "replica replay settled");
    Ok(())
}

/// Streams the object from the primary into the replica. Used for
/// `putObject` and for `completeMultipartUpload` (once assembled, the SLO
/// reads as a single object).
async fn copy_from_primary(ctx: &RequestContext, task: &MirrorTask) -> S3Result<()> {
    let original = task.original.to_gateway_request()?;
    let key = original
        .meta
        .object_key
        .clone()
        .ok_or_else(|| s3_error!(InternalError, "mirror task has no object key"))?;

    let primary_resp = fetch_primary(ctx, task, &key).await?;

    let mut headers = HeaderMap::new();
    for name in [crate::header::CONTENT_LENGTH, crate::header::CONTENT_TYPE, crate::header::ACCEPT_RANGES] {
        if let Some(value) = primary_resp.headers.get(name) {
            headers.insert(name, value.clone());
        }
    }

    // the replayed request is a plain PUT: the uploadId query (if any) is
    // dropped along with the rest of the original query string
    let path = format!("/{}/{key}", task.bucket_name);
    let uri: http::Uri = format!("/{}/{}", task.bucket_name, crate::swift::encode_object_key(&key))
        .parse()
        .map_err(|_| s3_error!(InternalError, "mirror task key does not form a valid path"))?;
    let meta = RequestMeta {
        bucket: Some(task.bucket_name.clone()),
        object_key: Some(key),
        url_format: UrlFormat::Path,
        method: Method::PUT,
        query: OrderedQs::default(),
        decoded_path: path,
        host: "mirror.internal".to_owned(),
    };
    let put = GatewayRequest {
        uri,
        headers,
        body: primary_resp.body,
        meta,
    };

    let replica = replica_record(task);
    let resp = crate::resolver::dispatch(ctx, &replica, put, false).await?;
    if !resp.status.is_success() {
        return Err(s3_error!(InternalError, "replica put settled with {}", resp.status));
    }
    Ok(())
}

/// GETs the object from the primary backend, freshly authenticated.
async fn fetch_primary(ctx: &RequestContext, task: &MirrorTask, key: &str) -> S3Result<Response> {
    match &task.main_config {
        BackendConfig::S3(cfg) => signed_get(&ctx.client, cfg, key).await,
        BackendConfig::Swift(cfg) => {
            let primary = primary_record(task);
            let client = SwiftClient::new(ctx, cfg, &primary);
            let path = client.object_path(key);
            let resp = client.request(&Method::GET, &path, &[]).await?;
            if resp.status.as_u16() != 200 {
                return Err(s3_error!(InternalError, "primary GET returned {}", resp.status));
            }
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{S3Config, S3Credentials};
    use crate::mirror::SerializedRequest;

    fn s3_backend(bucket: &str) -> BackendConfig {
        BackendConfig::S3(S3Config {
            endpoint: "http://127.0.0.1:9000".to_owned(),
            region: "us-east-1".to_owned(),
            credentials: S3Credentials {
                access_key_id: "k".to_owned(),
                secret_access_key: "s".to_owned(),
            },
            force_path_style: true,
            bucket: bucket.to_owned(),
        })
    }

    #[test]
    fn replica_record_never_fans_out() {
        let task = MirrorTask {
            nonce: "n".to_owned(),
            bucket_name: "b".to_owned(),
            main_config: s3_backend("up"),
            replica_name: "r1".to_owned(),
            backup_config: s3_backend("backup"),
            command: MirrorCommand::PutObject,
            original: SerializedRequest {
                method: "PUT".to_owned(),
                uri: "http://localhost/b/k".to_owned(),
                headers: vec![("host".to_owned(), "localhost".to_owned())],
                body: Vec::new(),
            },
            retry_count: 0,
        };
        let replica = replica_record(&task);
        assert!(replica.is_replica);
        assert!(!replica.has_replicas());
        assert_eq!(replica.bucket_name, "b");

        let primary = primary_record(&task);
        assert_eq!(primary.upstream_name(), "up");
    }
}
