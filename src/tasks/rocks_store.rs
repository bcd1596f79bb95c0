//! RocksDB-backed task store
//!
//! Key layout:
//!   task:record:<id be>   -> JSON task
//!   task:pending:<id be>  -> empty marker, present while the task is pending
//!   task:meta:next_id     -> next id (be)
//!   payout:<duel id>      -> JSON payout record
//!
//! Big-endian ids keep the pending index in creation order. Completion updates
//! the record and drops the marker in one write batch, so a crash leaves the
//! task either fully pending or fully completed. Payout records share the
//! database so a payout reservation and the task that settles it survive a
//! restart together.

use super::store::TaskStore;
use super::types::{Task, TaskId, TaskPayload, TaskStatus};
use crate::errors::StorageError;
use crate::settlement::{PayoutRequest, PayoutStore};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

const RECORD_PREFIX: &[u8] = b"task:record:";
const PENDING_PREFIX: &[u8] = b"task:pending:";
const NEXT_ID_KEY: &[u8] = b"task:meta:next_id";
const PAYOUT_PREFIX: &[u8] = b"payout:";

fn record_key(id: TaskId) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECORD_PREFIX.len() + 8);
    key.extend_from_slice(RECORD_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn pending_key(id: TaskId) -> Vec<u8> {
    let mut key = Vec::with_capacity(PENDING_PREFIX.len() + 8);
    key.extend_from_slice(PENDING_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn payout_key(duel_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PAYOUT_PREFIX.len() + duel_id.len());
    key.extend_from_slice(PAYOUT_PREFIX);
    key.extend_from_slice(duel_id.as_bytes());
    key
}

fn id_from_pending_key(key: &[u8]) -> Option<TaskId> {
    let raw = key.strip_prefix(PENDING_PREFIX)?;
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[derive(Clone)]
pub struct RocksTaskStore {
    db: Arc<DB>,
    /// Serialises id allocation with the write that persists the counter
    next_id: Arc<Mutex<TaskId>>,
    /// Makes the payout check-then-put in `reserve` atomic
    payout_writes: Arc<Mutex<()>>,
}

impl RocksTaskStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;

        let next_id = match db.get(NEXT_ID_KEY)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptedData("task id counter is not 8 bytes".to_string())
                })?;
                u64::from_be_bytes(bytes)
            }
            None => 1,
        };
        debug!(next_id, "Opened task store");

        Ok(Self {
            db: Arc::new(db),
            next_id: Arc::new(Mutex::new(next_id)),
            payout_writes: Arc::new(Mutex::new(())),
        })
    }

    fn load(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        match self
            .db
            .get(record_key(id))
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_payout(&self, duel_id: &str) -> Result<Option<PayoutRequest>, StorageError> {
        match self
            .db
            .get(payout_key(duel_id))
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TaskStore for RocksTaskStore {
    async fn enqueue(&self, payload: TaskPayload) -> Result<Task, StorageError> {
        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| StorageError::WriteFailed("task id counter lock poisoned".to_string()))?;

        let task = Task::new(*next_id, payload);
        let mut batch = WriteBatch::default();
        batch.put(record_key(task.id), serde_json::to_vec(&task)?);
        batch.put(pending_key(task.id), []);
        batch.put(NEXT_ID_KEY, (task.id + 1).to_be_bytes());
        self.db.write(batch)?;

        *next_id = task.id + 1;
        Ok(task)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StorageError> {
        let mut tasks = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(PENDING_PREFIX, Direction::Forward));

        for item in iter {
            if tasks.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(PENDING_PREFIX) {
                break;
            }
            let id = id_from_pending_key(&key).ok_or_else(|| {
                StorageError::CorruptedData(format!("bad pending key {}", hex::encode(&key)))
            })?;
            match self.load(id)? {
                Some(task) if task.is_pending() => tasks.push(task),
                Some(_) => {}
                None => {
                    return Err(StorageError::CorruptedData(format!(
                        "pending marker without record for task {}",
                        id
                    )))
                }
            }
        }
        Ok(tasks)
    }

    async fn mark_completed(&self, id: TaskId) -> Result<(), StorageError> {
        let mut task = self
            .load(id)?
            .ok_or_else(|| StorageError::NotFound(format!("task {}", id)))?;
        if task.status == TaskStatus::Completed {
            return Ok(());
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());

        let mut batch = WriteBatch::default();
        batch.put(record_key(id), serde_json::to_vec(&task)?);
        batch.delete(pending_key(id));
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        self.load(id)
    }
}

#[async_trait]
impl PayoutStore for RocksTaskStore {
    async fn reserve_payout(&self, request: &PayoutRequest) -> Result<Option<PayoutRequest>, StorageError> {
        let _writes = self
            .payout_writes
            .lock()
            .map_err(|_| StorageError::WriteFailed("payout lock poisoned".to_string()))?;

        if let Some(existing) = self.load_payout(&request.duel_id)? {
            return Ok(Some(existing));
        }
        self.db
            .put(payout_key(&request.duel_id), serde_json::to_vec(request)?)?;
        Ok(None)
    }

    async fn update_payout(&self, request: &PayoutRequest) -> Result<(), StorageError> {
        let _writes = self
            .payout_writes
            .lock()
            .map_err(|_| StorageError::WriteFailed("payout lock poisoned".to_string()))?;
        self.db
            .put(payout_key(&request.duel_id), serde_json::to_vec(request)?)?;
        Ok(())
    }

    async fn release_payout(&self, duel_id: &str) -> Result<(), StorageError> {
        let _writes = self
            .payout_writes
            .lock()
            .map_err(|_| StorageError::WriteFailed("payout lock poisoned".to_string()))?;
        self.db.delete(payout_key(duel_id))?;
        Ok(())
    }

    async fn find_payout(&self, duel_id: &str) -> Result<Option<PayoutRequest>, StorageError> {
        self.load_payout(duel_id)
    }

    async fn list_payouts(&self) -> Result<Vec<PayoutRequest>, StorageError> {
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(PAYOUT_PREFIX, Direction::Forward));
        for item in iter {
            let (key, raw) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(PAYOUT_PREFIX) {
                break;
            }
            records.push(serde_json::from_slice::<PayoutRequest>(&raw)?);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
