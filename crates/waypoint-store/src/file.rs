use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::checkpoint::new_checkpoint_id;
use crate::models::{AppendRequest, Checkpoint, CheckpointMeta, SearchHit, ThreadRecord};
use crate::store::{
    search_transcripts, validate_parent, CheckpointStore, ThreadIndex, MAX_HISTORY_PAGE,
};
use crate::DEFAULT_NAMESPACE;

const THREAD_FILE: &str = "thread.json";
const CHECKPOINT_FILE: &str = "checkpoints.jsonl";

/// One checkpoint line in a thread's JSONL file.
///
/// The state blob is versioned JSON, so it is stored as a string column
/// rather than a byte array.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    thread_id: String,
    namespace: String,
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    state: String,
    meta: CheckpointMeta,
    created_at: DateTime<Utc>,
}

impl StoredCheckpoint {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let state = String::from_utf8(checkpoint.state.clone())
            .map_err(|_| StoreError::Persistence("state blob is not valid UTF-8".to_string()))?;
        Ok(Self {
            thread_id: checkpoint.thread_id.clone(),
            namespace: checkpoint.namespace.clone(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            parent_checkpoint_id: checkpoint.parent_checkpoint_id.clone(),
            state,
            meta: checkpoint.meta.clone(),
            created_at: checkpoint.created_at,
        })
    }

    fn into_checkpoint(self) -> Checkpoint {
        Checkpoint {
            thread_id: self.thread_id,
            namespace: self.namespace,
            checkpoint_id: self.checkpoint_id,
            parent_checkpoint_id: self.parent_checkpoint_id,
            state: self.state.into_bytes(),
            meta: self.meta,
            created_at: self.created_at,
        }
    }
}

struct ThreadSlot {
    record: ThreadRecord,
    chains: HashMap<String, Vec<Checkpoint>>,
}

/// Durable file-backed store engine.
///
/// Layout: one directory per thread under the root, holding `thread.json`
/// (the index record) and `checkpoints.jsonl` (one appended line per
/// checkpoint). Appends are synced to disk before the index record is
/// swapped in via a temp-file rename, so a crash between the two writes
/// leaves the index pointing at an older checkpoint that still exists.
pub struct FileStore {
    root: PathBuf,
    inner: RwLock<HashMap<String, ThreadSlot>>,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`, loading every thread
    /// found on disk.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut threads = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::load_thread(&entry.path()).await {
                Ok(Some(slot)) => {
                    threads.insert(slot.record.thread_id.clone(), slot);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable thread directory");
                }
            }
        }

        tracing::info!(root = %root.display(), threads = threads.len(), "opened file store");
        Ok(Self {
            root,
            inner: RwLock::new(threads),
        })
    }

    async fn load_thread(dir: &Path) -> Result<Option<ThreadSlot>> {
        let record_path = dir.join(THREAD_FILE);
        let record_bytes = match tokio::fs::read(&record_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ThreadRecord = serde_json::from_slice(&record_bytes)?;

        let mut chains: HashMap<String, Vec<Checkpoint>> = HashMap::new();
        match tokio::fs::read_to_string(dir.join(CHECKPOINT_FILE)).await {
            Ok(content) => {
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoredCheckpoint>(line) {
                        Ok(stored) => {
                            let checkpoint = stored.into_checkpoint();
                            chains
                                .entry(checkpoint.namespace.clone())
                                .or_default()
                                .push(checkpoint);
                        }
                        Err(e) => {
                            // A torn final write leaves a partial line; keep
                            // the intact prefix.
                            tracing::warn!(
                                thread_id = %record.thread_id,
                                error = %e,
                                "dropping trailing unparsable checkpoint line"
                            );
                            break;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Some(ThreadSlot { record, chains }))
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.root.join(thread_id)
    }

    async fn append_line(&self, thread_id: &str, line: &[u8]) -> Result<()> {
        let path = self.thread_dir(thread_id).join(CHECKPOINT_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn persist_record(&self, record: &ThreadRecord) -> Result<()> {
        let dir = self.thread_dir(&record.thread_id);
        tokio::fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        Self::write_atomic(&dir.join(THREAD_FILE), &bytes).await
    }

    /// Rewrite the whole checkpoint file from the in-memory chains; used by
    /// the wipe paths, which are rare and may pay the full rewrite.
    async fn persist_chains(&self, slot: &ThreadSlot) -> Result<()> {
        let mut buffer = Vec::new();
        let mut namespaces: Vec<&String> = slot.chains.keys().collect();
        namespaces.sort();
        for namespace in namespaces {
            for checkpoint in &slot.chains[namespace] {
                let stored = StoredCheckpoint::from_checkpoint(checkpoint)?;
                buffer.extend(serde_json::to_vec(&stored)?);
                buffer.push(b'\n');
            }
        }
        let path = self.thread_dir(&slot.record.thread_id).join(CHECKPOINT_FILE);
        Self::write_atomic(&path, &buffer).await
    }
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn append(&self, request: AppendRequest) -> Result<Checkpoint> {
        let blob = request.state.to_bytes()?;

        let mut inner = self.inner.write().await;
        let slot = inner
            .get_mut(&request.thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", request.thread_id)))?;

        let chain = slot.chains.entry(request.namespace.clone()).or_default();
        validate_parent(chain, request.parent_checkpoint_id.as_deref())?;

        let checkpoint = Checkpoint {
            thread_id: request.thread_id.clone(),
            namespace: request.namespace,
            checkpoint_id: new_checkpoint_id(),
            parent_checkpoint_id: request.parent_checkpoint_id,
            state: blob,
            meta: request.meta,
            created_at: Utc::now(),
        };

        let stored = StoredCheckpoint::from_checkpoint(&checkpoint)?;
        let mut line = serde_json::to_vec(&stored)?;
        line.push(b'\n');
        self.append_line(&request.thread_id, &line).await?;

        chain.push(checkpoint.clone());
        slot.record.latest_checkpoint_id = Some(checkpoint.checkpoint_id.clone());
        slot.record.updated_at = checkpoint.created_at;
        self.persist_record(&slot.record).await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            step = checkpoint.meta.step,
            "appended checkpoint"
        );
        Ok(checkpoint)
    }

    async fn latest(&self, thread_id: &str, namespace: &str) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(thread_id)
            .and_then(|slot| slot.chains.get(namespace))
            .and_then(|chain| chain.last())
            .cloned())
    }

    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(thread_id)
            .and_then(|slot| slot.chains.get(namespace))
            .and_then(|chain| chain.iter().find(|c| c.checkpoint_id == checkpoint_id))
            .cloned())
    }

    async fn history(
        &self,
        thread_id: &str,
        namespace: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>> {
        let limit = limit.min(MAX_HISTORY_PAGE);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let Some(chain) = inner.get(thread_id).and_then(|slot| slot.chains.get(namespace)) else {
            return Ok(Vec::new());
        };

        let newest_first = chain.iter().rev();
        let page = match before {
            Some(cursor) => newest_first
                .skip_while(|c| c.checkpoint_id != cursor)
                .skip(1)
                .take(limit)
                .cloned()
                .collect(),
            None => newest_first.take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn namespaces(&self, thread_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut namespaces: Vec<String> = inner
            .get(thread_id)
            .map(|slot| {
                slot.chains
                    .iter()
                    .filter(|(_, chain)| !chain.is_empty())
                    .map(|(ns, _)| ns.clone())
                    .collect()
            })
            .unwrap_or_default();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn wipe(&self, thread_id: &str, namespace: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(slot) = inner.get_mut(thread_id) else {
            return Ok(());
        };
        if slot.chains.remove(namespace).is_none() {
            return Ok(());
        }

        slot.record.latest_checkpoint_id = slot
            .chains
            .values()
            .filter_map(|chain| chain.last())
            .max_by(|a, b| a.checkpoint_id.cmp(&b.checkpoint_id))
            .map(|c| c.checkpoint_id.clone());
        slot.record.updated_at = Utc::now();

        self.persist_chains(slot).await?;
        self.persist_record(&slot.record).await?;
        tracing::info!(thread_id, namespace, "wiped checkpoint namespace");
        Ok(())
    }

    async fn wipe_thread(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(slot) = inner.get_mut(thread_id) else {
            return Ok(());
        };
        slot.chains.clear();
        slot.record.latest_checkpoint_id = None;
        slot.record.updated_at = Utc::now();

        self.persist_chains(slot).await?;
        self.persist_record(&slot.record).await?;
        tracing::info!(thread_id, "wiped all checkpoints for thread");
        Ok(())
    }
}

#[async_trait]
impl ThreadIndex for FileStore {
    async fn create_thread(&self, owner_id: &str, title: &str) -> Result<ThreadRecord> {
        let record = ThreadRecord::new(owner_id, title);
        let mut inner = self.inner.write().await;
        self.persist_record(&record).await?;
        inner.insert(
            record.thread_id.clone(),
            ThreadSlot {
                record: record.clone(),
                chains: HashMap::new(),
            },
        );
        tracing::info!(thread_id = %record.thread_id, owner_id, "created thread");
        Ok(record)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.get(thread_id).map(|slot| slot.record.clone()))
    }

    async fn list_threads(
        &self,
        owner_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ThreadRecord>> {
        let inner = self.inner.read().await;
        let mut threads: Vec<ThreadRecord> = inner
            .values()
            .filter(|slot| slot.record.owner_id == owner_id && !slot.record.deleted)
            .map(|slot| slot.record.clone())
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads.into_iter().skip(skip).take(limit).collect())
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        slot.record.title = title.to_string();
        slot.record.updated_at = Utc::now();
        self.persist_record(&slot.record).await
    }

    async fn mark_deleted(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        slot.record.deleted = true;
        slot.record.updated_at = Utc::now();
        self.persist_record(&slot.record).await
    }

    async fn remove_thread(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove(thread_id);
        match tokio::fs::remove_dir_all(self.thread_dir(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn search_threads(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut snapshot: Vec<(ThreadRecord, Option<Checkpoint>)> = inner
            .values()
            .filter(|slot| slot.record.owner_id == owner_id && !slot.record.deleted)
            .map(|slot| {
                let latest = slot
                    .chains
                    .get(DEFAULT_NAMESPACE)
                    .and_then(|chain| chain.last())
                    .cloned();
                (slot.record.clone(), latest)
            })
            .collect();
        snapshot.sort_by(|a, b| b.0.updated_at.cmp(&a.0.updated_at));

        Ok(search_transcripts(snapshot, query, limit))
    }
}
