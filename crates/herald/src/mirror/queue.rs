//! Durable FIFO storage for mirror tasks.
//!
//! One sled tree per primary bucket, named `{bucket}_mirror_tasks`. Keys are
//! big-endian monotonic ids, so the tree's natural order is the enqueue
//! order. Consumers peek the head, apply the task, then acknowledge.
//! Acknowledgement is the only deletion, which is what makes the queue
//! at-least-once.

use super::MirrorTask;
use crate::{S3Error, S3Result};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;
use tracing::{debug, info};

/// A task peeked from the head of a FIFO, with the key needed to ack it.
#[derive(Debug)]
pub struct QueuedTask {
    pub key: sled::IVec,
    pub task: MirrorTask,
}

/// Per-replica backlog counters ("locked storages"): incremented on
/// enqueue, decremented when a task is acknowledged or poisoned. Operators
/// watch these through the structured logs.
#[derive(Debug, Default)]
pub struct LockedStorages {
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl LockedStorages {
    fn counter(&self, bucket: &str, replica: &str) -> Arc<AtomicU64> {
        let key = format!("{bucket}/{replica}");
        let mut counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        counters.entry(key).or_default().clone()
    }

    pub fn lock(&self, bucket: &str, replica: &str) {
        let count = self.counter(bucket, replica).fetch_add(1, Ordering::SeqCst) + 1;
        info!(bucket, replica, backlog = count, "mirror backlog grew");
    }

    pub fn unlock(&self, bucket: &str, replica: &str) {
        let counter = self.counter(bucket, replica);
        let prev = counter.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            // never go negative on replayed acks
            counter.store(0, Ordering::SeqCst);
        }
        info!(bucket, replica, backlog = prev.saturating_sub(1), "mirror backlog shrank");
    }

    #[must_use]
    pub fn backlog(&self, bucket: &str, replica: &str) -> u64 {
        self.counter(bucket, replica).load(Ordering::SeqCst)
    }
}

pub struct MirrorQueue {
    db: sled::Db,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
    locked: LockedStorages,
}

fn convert_sled_error(err: sled::Error) -> S3Error {
    s3_error!(err, InternalError, "mirror queue storage failure")
}

impl MirrorQueue {
    pub fn open(path: &Path) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            notifiers: Mutex::new(HashMap::new()),
            locked: LockedStorages::default(),
        })
    }

    fn tree(&self, bucket: &str) -> S3Result<sled::Tree> {
        self.db.open_tree(format!("{bucket}_mirror_tasks")).map_err(convert_sled_error)
    }

    /// Wake-up handle for the bucket's consumer.
    #[must_use]
    pub fn notifier(&self, bucket: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        notifiers.entry(bucket.to_owned()).or_default().clone()
    }

    #[must_use]
    pub fn locked_storages(&self) -> &LockedStorages {
        &self.locked
    }

    /// Appends a task to the bucket's FIFO and wakes the consumer.
    pub fn push(&self, bucket: &str, task: &MirrorTask) -> S3Result<()> {
        let tree = self.tree(bucket)?;
        let id = self.db.generate_id().map_err(convert_sled_error)?;
        let value = serde_json::to_vec(task).map_err(|e| s3_error!(e, InternalError, "task encode failure"))?;
        tree.insert(id.to_be_bytes(), value).map_err(convert_sled_error)?;
        tree.flush().map_err(convert_sled_error)?;
        self.locked.lock(bucket, &task.replica_name);
        debug!(bucket, nonce = %task.nonce, command = ?task.command, "enqueued mirror task");
        self.notifier(bucket).notify_one();
        Ok(())
    }

    /// Returns the head of the FIFO without removing it.
    pub fn peek(&self, bucket: &str) -> S3Result<Option<QueuedTask>> {
        let tree = self.tree(bucket)?;
        let Some((key, value)) = tree.first().map_err(convert_sled_error)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<MirrorTask>(&value) {
            Ok(task) => Ok(Some(QueuedTask { key, task })),
            Err(e) => {
                // an undecodable record can only wedge the queue; drop it
                tree.remove(&key).map_err(convert_sled_error)?;
                Err(s3_error!(e, InternalError, "dropped undecodable mirror task"))
            }
        }
    }

    /// Acknowledges (removes) a previously peeked task.
    pub fn ack(&self, bucket: &str, key: &sled::IVec) -> S3Result<()> {
        let tree = self.tree(bucket)?;
        tree.remove(key).map_err(convert_sled_error)?;
        tree.flush().map_err(convert_sled_error)?;
        Ok(())
    }

    /// Number of pending tasks for the bucket.
    pub fn len(&self, bucket: &str) -> S3Result<usize> {
        Ok(self.tree(bucket)?.len())
    }

    pub fn is_empty(&self, bucket: &str) -> S3Result<bool> {
        Ok(self.len(bucket)? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{BackendConfig, S3Config, S3Credentials};
    use crate::mirror::{MirrorCommand, SerializedRequest};

    fn backend() -> BackendConfig {
        BackendConfig::S3(S3Config {
            endpoint: "http://127.0.0.1:9000".to_owned(),
            region: "us-east-1".to_owned(),
            credentials: S3Credentials {
                access_key_id: "k".to_owned(),
                secret_access_key: "s".to_owned(),
            },
            force_path_style: true,
            bucket: "up".to_owned(),
        })
    }

    fn task(nonce: &str) -> MirrorTask {
        MirrorTask {
            nonce: nonce.to_owned(),
            bucket_name: "b".to_owned(),
            main_config: backend(),
            replica_name: "r1".to_owned(),
            backup_config: backend(),
            command: MirrorCommand::PutObject,
            original: SerializedRequest {
                method: "PUT".to_owned(),
                uri: "http://localhost/b/k".to_owned(),
                headers: vec![("host".to_owned(), "localhost".to_owned())],
                body: Vec::new(),
            },
            retry_count: 0,
        }
    }

    #[test]
    fn fifo_order_and_ack() {
        let dir = tempfile::tempdir().unwrap();
        let queue = MirrorQueue::open(dir.path()).unwrap();

        queue.push("b", &task("n1")).unwrap();
        queue.push("b", &task("n2")).unwrap();
        queue.push("b", &task("n3")).unwrap();
        assert_eq!(queue.len("b").unwrap(), 3);
        assert_eq!(queue.locked_storages().backlog("b", "r1"), 3);

        // peek does not consume
        let head = queue.peek("b").unwrap().unwrap();
        assert_eq!(head.task.nonce, "n1");
        let again = queue.peek("b").unwrap().unwrap();
        assert_eq!(again.task.nonce, "n1");

        queue.ack("b", &head.key).unwrap();
        let next = queue.peek("b").unwrap().unwrap();
        assert_eq!(next.task.nonce, "n2");
        assert_eq!(queue.len("b").unwrap(), 2);
    }

    #[test]
    fn queues_are_isolated_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let queue = MirrorQueue::open(dir.path()).unwrap();
        queue.push("a", &task("na")).unwrap();
        queue.push("b", &task("nb")).unwrap();
        assert_eq!(queue.len("a").unwrap(), 1);
        assert_eq!(queue.len("b").unwrap(), 1);
        assert_eq!(queue.peek("a").unwrap().unwrap().task.nonce, "na");
    }

    #[test]
    fn tasks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = MirrorQueue::open(dir.path()).unwrap();
            queue.push("b", &task("persisted")).unwrap();
        }
        let queue = MirrorQueue::open(dir.path()).unwrap();
        let head = queue.peek("b").unwrap().unwrap();
        assert_eq!(head.task.nonce, "persisted");
        assert_eq!(head.task.command, MirrorCommand::PutObject);
    }
}
