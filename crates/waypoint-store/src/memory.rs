use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::checkpoint::new_checkpoint_id;
use crate::models::{AppendRequest, Checkpoint, SearchHit, ThreadRecord};
use crate::store::{
    search_transcripts, validate_parent, CheckpointStore, ThreadIndex, MAX_HISTORY_PAGE,
};
use crate::DEFAULT_NAMESPACE;

struct ThreadSlot {
    record: ThreadRecord,
    chains: HashMap<String, Vec<Checkpoint>>,
}

/// In-memory store engine.
///
/// Used by tests and embedders that do not need durability; shares all
/// chain and index semantics with [`crate::FileStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, ThreadSlot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn append(&self, request: AppendRequest) -> Result<Checkpoint> {
        let blob = request.state.to_bytes()?;

        let mut inner = self.inner.write().await;
        let slot = inner
            .get_mut(&request.thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", request.thread_id)))?;

        let chain = slot.chains.entry(request.namespace.clone()).or_default();
        validate_parent(chain, request.parent_checkpoint_id.as_deref())?;

        let checkpoint = Checkpoint {
            thread_id: request.thread_id,
            namespace: request.namespace,
            checkpoint_id: new_checkpoint_id(),
            parent_checkpoint_id: request.parent_checkpoint_id,
            state: blob,
            meta: request.meta,
            created_at: Utc::now(),
        };

        chain.push(checkpoint.clone());
        slot.record.latest_checkpoint_id = Some(checkpoint.checkpoint_id.clone());
        slot.record.updated_at = checkpoint.created_at;

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
        if let Some(slot) = inner.get_mut(thread_id) {
            if slot.chains.remove(namespace).is_some() {
                refresh_latest(slot);
                slot.record.updated_at = Utc::now();
                tracing::info!(thread_id, namespace, "wiped checkpoint namespace");
            }
        }
        Ok(())
    }

    async fn wipe_thread(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(slot) = inner.get_mut(thread_id) {
            slot.chains.clear();
            slot.record.latest_checkpoint_id = None;
            slot.record.updated_at = Utc::now();
            tracing::info!(thread_id, "wiped all checkpoints for thread");
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadIndex for MemoryStore {
    async fn create_thread(&self, owner_id: &str, title: &str) -> Result<ThreadRecord> {
        let record = ThreadRecord::new(owner_id, title);
        let mut inner = self.inner.write().await;
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
        Ok(())
    }

    async fn mark_deleted(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        slot.record.deleted = true;
        slot.record.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_thread(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove(thread_id);
        Ok(())
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

fn refresh_latest(slot: &mut ThreadSlot) {
    slot.record.latest_checkpoint_id = slot
        .chains
        .values()
        .filter_map(|chain| chain.last())
        .max_by(|a, b| a.checkpoint_id.cmp(&b.checkpoint_id))
        .map(|c| c.checkpoint_id.clone());
}
