use std::sync::Arc;

use tokio::sync::mpsc;
use waypoint_store::{
    export_thread, import_thread, Checkpoint, CheckpointStore, ConversationStore, SearchHit,
    StoreError, ThreadBundle, ThreadIndex, ThreadRecord, DEFAULT_NAMESPACE,
};
use waypoint_types::{ChatMessage, StreamFrame};

use crate::broker::StreamBroker;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::producer::EventProducer;
use crate::registry::SessionRegistry;
use crate::session::GenerationSession;

/// A started turn: the thread it runs on and the ordered frame stream.
#[derive(Debug)]
pub struct Turn {
    pub thread_id: String,
    pub frames: mpsc::Receiver<StreamFrame>,
}

/// Control surface over the store and the session machinery.
///
/// Every operation verifies thread ownership; a foreign or missing thread
/// is reported as not found.
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    producer: Arc<dyn EventProducer>,
    registry: SessionRegistry,
    config: SessionConfig,
}

impl ConversationService {
    pub fn builder() -> ConversationServiceBuilder {
        ConversationServiceBuilder::new()
    }

    /// Start one generation turn, creating the thread when none is given.
    ///
    /// Fails with [`SessionError::ThreadBusy`] while another turn is active
    /// on the thread. The returned receiver yields frames in producer order
    /// and ends with exactly one terminal frame.
    pub async fn start_turn(
        &self,
        owner_id: &str,
        thread_id: Option<&str>,
        user_text: impl Into<String>,
    ) -> Result<Turn> {
        let user_text = user_text.into();

        let record = match thread_id {
            Some(id) => {
                let record = self.owned_thread(owner_id, id).await?;
                if record.deleted {
                    return Err(StoreError::NotFound(format!("thread {id}")).into());
                }
                record
            }
            None => {
                let title = derive_title(&user_text, self.config.title_max_chars);
                self.store.create_thread(owner_id, &title).await?
            }
        };

        let guard = self.registry.register(&record.thread_id)?;
        let (broker, frames) = StreamBroker::channel(self.config.channel_capacity);
        let session = GenerationSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.producer),
            self.config.clone(),
            record.thread_id.clone(),
            DEFAULT_NAMESPACE,
            guard.cancel_token(),
        );

        let thread_id = record.thread_id.clone();
        tokio::spawn(async move {
            // Hold the registry claim for the whole turn; dropping it on any
            // exit path frees the thread for the next request.
            let _guard = guard;
            if let Err(e) = session.run(user_text, broker).await {
                tracing::error!(error = %e, "generation session aborted");
            }
        });

        Ok(Turn { thread_id, frames })
    }

    /// Request cancellation of the thread's active turn.
    pub fn stop(&self, thread_id: &str) -> bool {
        self.registry.cancel(thread_id)
    }

    pub fn is_generating(&self, thread_id: &str) -> bool {
        self.registry.is_active(thread_id)
    }

    /// Wipe every checkpoint namespace, keeping the thread record.
    pub async fn reset(&self, owner_id: &str, thread_id: &str) -> Result<()> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        for namespace in self.store.namespaces(&record.thread_id).await? {
            self.store.wipe(&record.thread_id, &namespace).await?;
        }
        Ok(())
    }

    /// Soft-mark the thread deleted, or physically remove it and all of its
    /// checkpoints when `hard` is set.
    pub async fn delete(&self, owner_id: &str, thread_id: &str, hard: bool) -> Result<()> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        if hard {
            self.store.wipe_thread(&record.thread_id).await?;
            self.store.remove_thread(&record.thread_id).await?;
        } else {
            self.store.mark_deleted(&record.thread_id).await?;
        }
        Ok(())
    }

    /// Checkpoints newest first; pass the last id of a page as `before` to
    /// continue.
    pub async fn history(
        &self,
        owner_id: &str,
        thread_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        Ok(self
            .store
            .history(&record.thread_id, DEFAULT_NAMESPACE, limit, before)
            .await?)
    }

    /// The message sequence derived from the latest checkpoint.
    pub async fn transcript(&self, owner_id: &str, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        match self.store.latest(&record.thread_id, DEFAULT_NAMESPACE).await? {
            Some(checkpoint) => Ok(checkpoint
                .channel_state()
                .map_err(StoreError::from)?
                .messages),
            None => Ok(Vec::new()),
        }
    }

    /// Time-travel view: the message sequence at an ancestor checkpoint.
    pub async fn transcript_at(
        &self,
        owner_id: &str,
        thread_id: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        let checkpoint = self
            .store
            .get(&record.thread_id, DEFAULT_NAMESPACE, checkpoint_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {checkpoint_id}")))?;
        Ok(checkpoint
            .channel_state()
            .map_err(StoreError::from)?
            .messages)
    }

    pub async fn list(
        &self,
        owner_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ThreadRecord>> {
        Ok(self.store.list_threads(owner_id, limit, skip).await?)
    }

    pub async fn rename(&self, owner_id: &str, thread_id: &str, title: &str) -> Result<()> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        Ok(self.store.rename_thread(&record.thread_id, title).await?)
    }

    pub async fn search(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.store.search_threads(owner_id, query, limit).await?)
    }

    pub async fn export(&self, owner_id: &str, thread_id: &str) -> Result<ThreadBundle> {
        let record = self.owned_thread(owner_id, thread_id).await?;
        Ok(export_thread(self.store.as_ref(), &record.thread_id).await?)
    }

    /// Import a bundle as a fresh thread owned by `owner_id`.
    pub async fn import(&self, owner_id: &str, bundle: &ThreadBundle) -> Result<String> {
        Ok(import_thread(self.store.as_ref(), bundle, owner_id).await?)
    }

    async fn owned_thread(&self, owner_id: &str, thread_id: &str) -> Result<ThreadRecord> {
        let record = self
            .store
            .get_thread(thread_id)
            .await?
            .filter(|record| record.owner_id == owner_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        Ok(record)
    }
}

/// Fluent construction for [`ConversationService`].
pub struct ConversationServiceBuilder {
    store: Option<Arc<dyn ConversationStore>>,
    producer: Option<Arc<dyn EventProducer>>,
    config: SessionConfig,
}

impl ConversationServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            producer: None,
            config: SessionConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn producer(mut self, producer: Arc<dyn EventProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ConversationService> {
        let store = self
            .store
            .ok_or_else(|| SessionError::Config("store is required".to_string()))?;
        let producer = self
            .producer
            .ok_or_else(|| SessionError::Config("producer is required".to_string()))?;
        Ok(ConversationService {
            store,
            producer,
            registry: SessionRegistry::new(),
            config: self.config,
        })
    }
}

impl Default for ConversationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a thread title from the first user message.
fn derive_title(user_text: &str, max_chars: usize) -> String {
    let first_line = user_text.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "New conversation".to_string();
    }
    match first_line.char_indices().nth(max_chars) {
        Some((idx, _)) => first_line[..idx].to_string(),
        None => first_line.to_string(),
    }
}
