//! Asynchronous replication.
//!
//! After a successful mutating operation on a primary bucket, one
//! [`MirrorTask`] per replica is appended to that bucket's durable FIFO
//! before the client response is acknowledged. Background workers (one
//! consumer per primary bucket) replay the tasks against each replica with
//! at-least-once semantics: a task is acknowledged only after it has been
//! applied, so a crash mid-task leads to a replay, never a loss.

mod queue;
pub use self::queue::{LockedStorages, MirrorQueue, QueuedTask};

mod worker;
pub use self::worker::{WorkerPool, process_task};

use crate::config::BackendConfig;
use crate::registry::Bucket;
use crate::resolver::GatewayRequest;
use crate::S3Result;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The mutating operation a task replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorCommand {
    PutObject,
    DeleteObject,
    CopyObject,
    CreateBucket,
    DeleteBucket,
    CompleteMultipartUpload,
    DeleteObjects,
}

impl MirrorCommand {
    /// The mirrorable subset of the operation surface. Multipart part
    /// uploads and aborts are not mirrored: the completed object is.
    #[must_use]
    pub fn from_op(op: crate::resolver::S3Op) -> Option<Self> {
        use crate::resolver::S3Op;
        match op {
            S3Op::PutObject => Some(Self::PutObject),
            S3Op::DeleteObject => Some(Self::DeleteObject),
            S3Op::CopyObject => Some(Self::CopyObject),
            S3Op::CreateBucket => Some(Self::CreateBucket),
            S3Op::DeleteBucket => Some(Self::DeleteBucket),
            S3Op::CompleteMultipartUpload => Some(Self::CompleteMultipartUpload),
            S3Op::DeleteObjects => Some(Self::DeleteObjects),
            _ => None,
        }
    }
}

/// A wire-replayable snapshot of the client request.
///
/// Body bytes are stored only for operations whose body the worker needs
/// (bulk delete XML and the like); object payloads are re-fetched from the
/// primary at replay time instead of being persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SerializedRequest {
    pub fn from_request(req: &GatewayRequest, body: &[u8]) -> Self {
        let headers = req
            .headers
            .iter()
            .filter_map(|(n, v)| Some((n.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();
        Self {
            method: req.meta.method.as_str().to_owned(),
            uri: req.uri.to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    /// Rebuilds a dispatchable request. The bucket/key meta is re-derived
    /// from the recorded request line.
    pub fn to_gateway_request(&self) -> S3Result<GatewayRequest> {
        let method: http::Method = self
            .method
            .parse()
            .map_err(|_| s3_error!(InternalError, "task has invalid method {}", self.method))?;
        let uri: http::Uri = self
            .uri
            .parse()
            .map_err(|e| s3_error!(e, InternalError, "task has invalid uri {}", self.uri))?;

        let mut headers = http::HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::try_from(name.as_str()),
                http::HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        let meta = crate::request::extract_request_info(&method, &uri, &headers)?;
        Ok(GatewayRequest {
            uri,
            headers,
            body: Bytes::from(self.body.clone()).into(),
            meta,
        })
    }
}

/// One queued unit of replication work: replay `command` from the primary
/// onto one replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTask {
    pub nonce: String,
    pub bucket_name: String,
    pub main_config: BackendConfig,
    pub replica_name: String,
    pub backup_config: BackendConfig,
    pub command: MirrorCommand,
    pub original: SerializedRequest,
    pub retry_count: u32,
}

/// Appends one task per replica to the bucket's FIFO. Called after the
/// primary reported success and before the response goes back to the
/// client, so a crash window never loses an acknowledged mutation.
pub fn enqueue_for_replicas(
    queue: &MirrorQueue,
    bucket: &Bucket,
    command: MirrorCommand,
    original: &SerializedRequest,
) -> S3Result<()> {
    for replica in &bucket.replicas {
        let task = MirrorTask {
            nonce: uuid::Uuid::new_v4().to_string(),
            bucket_name: bucket.bucket_name.clone(),
            main_config: bucket.config.clone(),
            replica_name: replica.name.clone(),
            backup_config: replica.config.clone(),
            command,
            original: original.clone(),
            retry_count: 0,
        };
        queue.push(&bucket.bucket_name, &task)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_request_round_trip() {
        let uri: http::Uri = "http://localhost:8000/demo/a.txt?uploadId=u1".parse().unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::HOST, "localhost:8000".parse().unwrap());
        headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let meta = crate::request::extract_request_info(&http::Method::PUT, &uri, &headers).unwrap();
        let req = GatewayRequest {
            uri,
            headers,
            body: Bytes::from_static(b"payload").into(),
            meta,
        };

        let serialized = SerializedRequest::from_request(&req, b"payload");
        let rebuilt = serialized.to_gateway_request().unwrap();
        assert_eq!(rebuilt.meta.method, http::Method::PUT);
        assert_eq!(rebuilt.meta.bucket.as_deref(), Some("demo"));
        assert_eq!(rebuilt.meta.object_key.as_deref(), Some("a.txt"));
        assert_eq!(rebuilt.meta.query.get("uploadId"), Some("u1"));
        assert_eq!(rebuilt.body.bytes().unwrap().as_ref(), b"payload");

        // survives the persisted form too
        let json = serde_json::to_vec(&serialized).unwrap();
        let back: SerializedRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.method, "PUT");
        assert_eq!(back.body, b"payload");
    }

    #[test]
    fn one_task_per_replica_with_distinct_nonces() {
        use crate::config::{BackendConfig, S3Config, S3Credentials};
        use crate::registry::{Bucket, Replica};

        let backend = |bucket: &str| {
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
        };
        let bucket = Bucket {
            bucket_name: "demo".to_owned(),
            config: backend("up"),
            replicas: vec![
                Replica {
                    name: "r1".to_owned(),
                    config: backend("backup-1"),
                },
                Replica {
                    name: "r2".to_owned(),
                    config: backend("backup-2"),
                },
            ],
            is_replica: false,
        };

        let dir = tempfile::tempdir().unwrap();
        let queue = MirrorQueue::open(dir.path()).unwrap();
        let original = SerializedRequest {
            method: "PUT".to_owned(),
            uri: "http://localhost/demo/a.bin".to_owned(),
            headers: vec![("host".to_owned(), "localhost".to_owned())],
            body: Vec::new(),
        };
        enqueue_for_replicas(&queue, &bucket, MirrorCommand::PutObject, &original).unwrap();

        assert_eq!(queue.len("demo").unwrap(), 2);
        let first = queue.peek("demo").unwrap().unwrap();
        queue.ack("demo", &first.key).unwrap();
        let second = queue.peek("demo").unwrap().unwrap();

        // declaration order, distinct nonces
        assert_eq!(first.task.replica_name, "r1");
        assert_eq!(second.task.replica_name, "r2");
        assert_ne!(first.task.nonce, second.task.nonce);
        assert_eq!(first.task.command, MirrorCommand::PutObject);
        assert_eq!(first.task.retry_count, 0);
    }

    #[test]
    fn mirror_command_wire_names() {
        let json = serde_json::to_string(&MirrorCommand::PutObject).unwrap();
        assert_eq!(json, "\"putObject\"");
        let json = serde_json::to_string(&MirrorCommand::CompleteMultipartUpload).unwrap();
        assert_eq!(json, "\"completeMultipartUpload\"");
        let back: MirrorCommand = serde_json::from_str("\"deleteObjects\"").unwrap();
        assert_eq!(back, MirrorCommand::DeleteObjects);
    }
}
