use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_types::Role;

/// Thread index record.
///
/// `latest_checkpoint_id` always references an existing checkpoint (or is
/// `None` for an empty thread); the store updates it in the same critical
/// section as the checkpoint write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    pub latest_checkpoint_id: Option<String>,
}

impl ThreadRecord {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            deleted: false,
            latest_checkpoint_id: None,
        }
    }
}

/// One message-level match from [`crate::ThreadIndex::search_threads`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub thread_id: String,
    pub title: String,
    pub role: Role,
    pub snippet: String,
}
