use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_types::ChannelState;

use crate::error::{Result, StoreError};
use crate::models::CheckpointMeta;
use crate::store::{CheckpointStore, ConversationStore, ThreadIndex};

/// Current bundle format version.
pub const BUNDLE_VERSION: u16 = 1;

/// Portable snapshot of one thread: metadata plus every checkpoint chain,
/// each ordered root first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadBundle {
    pub version: u16,
    pub title: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub chains: Vec<ChainExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExport {
    pub namespace: String,
    pub checkpoints: Vec<CheckpointExport>,
}

/// One exported checkpoint. Parent linkage is implied by position: each
/// entry's parent is the previous entry, and the first is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointExport {
    pub state: String,
    pub meta: CheckpointMeta,
}

/// Walk every chain of the thread from latest to root and serialize it.
pub async fn export_thread(store: &dyn ConversationStore, thread_id: &str) -> Result<ThreadBundle> {
    let record = store
        .get_thread(thread_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;

    let mut chains = Vec::new();
    for namespace in store.namespaces(thread_id).await? {
        let mut ordered = Vec::new();
        let mut cursor = store.latest(thread_id, &namespace).await?;
        while let Some(checkpoint) = cursor {
            let parent = checkpoint.parent_checkpoint_id.clone();
            let state = String::from_utf8(checkpoint.state).map_err(|_| {
                StoreError::Persistence("state blob is not valid UTF-8".to_string())
            })?;
            ordered.push(CheckpointExport {
                state,
                meta: checkpoint.meta,
            });
            cursor = match parent {
                Some(parent_id) => Some(
                    store
                        .get(thread_id, &namespace, &parent_id)
                        .await?
                        .ok_or(StoreError::ParentNotFound(parent_id))?,
                ),
                None => None,
            };
        }
        ordered.reverse();
        chains.push(ChainExport {
            namespace,
            checkpoints: ordered,
        });
    }

    tracing::info!(
        thread_id,
        chains = chains.len(),
        checkpoints = chains.iter().map(|c| c.checkpoints.len()).sum::<usize>(),
        "exported thread"
    );
    Ok(ThreadBundle {
        version: BUNDLE_VERSION,
        title: record.title,
        owner_id: record.owner_id,
        created_at: record.created_at,
        exported_at: Utc::now(),
        chains,
    })
}

/// Recreate a bundle as a fresh thread, replaying each chain through
/// `append` so checkpoint ids are re-derived while parent ordering and
/// message content are preserved.
pub async fn import_thread(
    store: &dyn ConversationStore,
    bundle: &ThreadBundle,
    owner_id: &str,
) -> Result<String> {
    if bundle.version != BUNDLE_VERSION {
        return Err(StoreError::Persistence(format!(
            "unsupported bundle version: {}",
            bundle.version
        )));
    }

    let record = store.create_thread(owner_id, &bundle.title).await?;

    for chain in &bundle.chains {
        let mut parent: Option<String> = None;
        for export in &chain.checkpoints {
            let state = ChannelState::from_bytes(export.state.as_bytes())?;
            let appended = store
                .append(crate::models::AppendRequest {
                    thread_id: record.thread_id.clone(),
                    namespace: chain.namespace.clone(),
                    parent_checkpoint_id: parent.take(),
                    state,
                    meta: export.meta.clone(),
                })
                .await?;
            parent = Some(appended.checkpoint_id);
        }
    }

    tracing::info!(thread_id = %record.thread_id, "imported thread");
    Ok(record.thread_id)
}
