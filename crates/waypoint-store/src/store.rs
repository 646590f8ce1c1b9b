use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::models::{AppendRequest, Checkpoint, SearchHit, ThreadRecord};

/// Append-only checkpoint storage keyed by (thread, namespace).
///
/// Implementations must make `append` durable before returning and must
/// update the thread index's latest pointer in the same critical section,
/// so a reader never observes a pointer to a missing checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to the chain.
    ///
    /// Fails with [`StoreError::ParentNotFound`] when the parent id does
    /// not exist in the same (thread, namespace), and with
    /// [`StoreError::Conflict`] when the parent exists but is not the
    /// chain head (the chain never forks).
    async fn append(&self, request: AppendRequest) -> Result<Checkpoint>;

    async fn latest(&self, thread_id: &str, namespace: &str) -> Result<Option<Checkpoint>>;

    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>>;

    /// Checkpoints newest first, restartable via the `before` cursor.
    async fn history(
        &self,
        thread_id: &str,
        namespace: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>>;

    /// Namespaces of the thread that currently hold checkpoints.
    async fn namespaces(&self, thread_id: &str) -> Result<Vec<String>>;

    /// Delete every checkpoint in the namespace. Idempotent.
    async fn wipe(&self, thread_id: &str, namespace: &str) -> Result<()>;

    /// Delete every namespace of the thread. Idempotent.
    async fn wipe_thread(&self, thread_id: &str) -> Result<()>;
}

/// Thread metadata index backing listing and search.
#[async_trait]
pub trait ThreadIndex: Send + Sync {
    async fn create_thread(&self, owner_id: &str, title: &str) -> Result<ThreadRecord>;

    async fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>>;

    /// Threads for the owner, most recently updated first, soft-deleted
    /// records excluded.
    async fn list_threads(
        &self,
        owner_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ThreadRecord>>;

    async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<()>;

    /// Soft delete: hide the thread from listings, keep all data.
    async fn mark_deleted(&self, thread_id: &str) -> Result<()>;

    /// Drop the index record. Callers pair this with
    /// [`CheckpointStore::wipe_thread`] for a hard delete.
    async fn remove_thread(&self, thread_id: &str) -> Result<()>;

    /// Case-insensitive substring search over the derived transcript of
    /// each thread's latest checkpoint.
    async fn search_threads(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Cap on a single `history` page.
pub(crate) const MAX_HISTORY_PAGE: usize = 1000;

/// The full storage surface the orchestrator depends on.
pub trait ConversationStore: CheckpointStore + ThreadIndex {}

impl<T: CheckpointStore + ThreadIndex + ?Sized> ConversationStore for T {}

/// Validate an append against the current chain.
///
/// The chain per (thread, namespace) is a simple linked list: the parent
/// must be the current head, and a second root is a conflict.
pub(crate) fn validate_parent(chain: &[Checkpoint], parent: Option<&str>) -> Result<()> {
    match parent {
        None if chain.is_empty() => Ok(()),
        None => Err(StoreError::Conflict(
            "namespace already has a root checkpoint".to_string(),
        )),
        Some(parent_id) => match chain.last() {
            Some(head) if head.checkpoint_id == parent_id => Ok(()),
            _ if chain.iter().any(|c| c.checkpoint_id == parent_id) => Err(StoreError::Conflict(
                format!("checkpoint {parent_id} is not the chain head"),
            )),
            _ => Err(StoreError::ParentNotFound(parent_id.to_string())),
        },
    }
}

/// Shared search walk over an owner's threads; both engines call this with
/// a snapshot of (record, latest default-namespace checkpoint).
pub(crate) fn search_transcripts(
    threads: Vec<(ThreadRecord, Option<Checkpoint>)>,
    query: &str,
    limit: usize,
) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    let mut hits = Vec::new();

    for (record, latest) in threads {
        let Some(checkpoint) = latest else { continue };
        let state = match checkpoint.channel_state() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(thread_id = %record.thread_id, error = %e, "skipping undecodable state during search");
                continue;
            }
        };
        for message in &state.messages {
            if message.content.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    thread_id: record.thread_id.clone(),
                    title: record.title.clone(),
                    role: message.role,
                    snippet: snippet_of(&message.content),
                });
                if hits.len() >= limit {
                    return hits;
                }
            }
        }
    }

    hits
}

fn snippet_of(content: &str) -> String {
    const MAX_CHARS: usize = 120;
    match content.char_indices().nth(MAX_CHARS) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}
