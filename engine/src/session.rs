//! Classification sessions: batch lifecycle over one taxonomy.
//!
//! A session pulls a batch of unclassified items, walks them through the
//! tree concurrently (capped by `batch_size`), and reports progress through
//! the event channel. One session per taxonomy at a time, enforced by the
//! run lock; the lock is released however the run ends. A failed item is
//! absorbed and the batch continues; only a store outage or a lost lock
//! aborts the whole session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use futures_util::stream;
use taxa_types::{Item, ItemId, ItemOutcome, NodeId, SessionEvent, SessionId, Taxonomy, TaxonomyId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, DispatcherConfig, VoteClient};
use crate::error::EngineError;
use crate::health::{ExaminationPass, HealthConfig, Selection};
use crate::locks::{RunGuard, RunLocks};
use crate::store::TaxonomyStore;
use crate::walker::{ItemEvents, Walker};

pub struct SessionManager<S, V> {
    store: Arc<S>,
    client: Arc<V>,
    locks: RunLocks,
    events: mpsc::Sender<SessionEvent>,
    dispatcher_config: DispatcherConfig,
    health_config: HealthConfig,
}

impl<S, V> SessionManager<S, V>
where
    S: TaxonomyStore + 'static,
    V: VoteClient + 'static,
{
    pub fn new(
        store: Arc<S>,
        client: Arc<V>,
        locks: RunLocks,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            client,
            locks,
            events,
            dispatcher_config: DispatcherConfig::default(),
            health_config: HealthConfig::default(),
        }
    }

    #[must_use]
    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    #[must_use]
    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    #[must_use]
    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Starts a classification run for the taxonomy and returns immediately
    /// with a handle; the batch runs on a background task.
    ///
    /// # Errors
    ///
    /// Fails synchronously, with no session created, when the taxonomy is
    /// missing, its classifier config is invalid, or another run holds the
    /// taxonomy's lock.
    pub async fn start_run(&self, taxonomy_id: &TaxonomyId) -> Result<RunHandle, EngineError> {
        let taxonomy = self.store.get_taxonomy(taxonomy_id).await?;
        taxonomy.classifier.validate()?;
        let session_id = SessionId::generate();
        let guard = self.locks.try_acquire(taxonomy_id, &session_id)?;
        let batch = self
            .store
            .unclassified_items(taxonomy_id, taxonomy.classifier.batch_size)
            .await?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::new(
            taxonomy.classifier.models.clone(),
            self.dispatcher_config.clone(),
        );
        let run = RunContext {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            events: self.events.clone(),
            taxonomy,
            session_id: session_id.clone(),
            guard,
            cancelled: Arc::clone(&cancelled),
            dispatcher,
            health_config: self.health_config.clone(),
        };
        let task = tokio::spawn(run.execute(batch));
        Ok(RunHandle {
            session_id,
            cancelled,
            task,
        })
    }
}

/// Handle to one in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    session_id: SessionId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RunHandle {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Requests cancellation: items not yet started are skipped, in-flight
    /// items finish and their results are kept.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Waits for the run's background task to finish.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            error!(error = %err, "run task aborted");
        }
    }
}

enum ItemCompletion {
    Done(Vec<NodeId>),
    Failed,
    Skipped,
    Fatal(EngineError),
}

struct RunContext<S, V> {
    store: Arc<S>,
    client: Arc<V>,
    events: mpsc::Sender<SessionEvent>,
    taxonomy: Taxonomy,
    session_id: SessionId,
    guard: RunGuard,
    cancelled: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    health_config: HealthConfig,
}

impl<S: TaxonomyStore, V: VoteClient> RunContext<S, V> {
    async fn execute(self, batch: Vec<Item>) {
        let item_ids: Vec<ItemId> = batch.iter().map(|i| i.id.clone()).collect();
        info!(
            taxonomy_id = %self.taxonomy.id,
            session_id = %self.session_id,
            items = batch.len(),
            "classification run started"
        );
        let _ = self
            .events
            .send(SessionEvent::SessionStarted {
                taxonomy_id: self.taxonomy.id.clone(),
                session_id: self.session_id.clone(),
                item_ids,
            })
            .await;

        let mut items_processed = 0usize;
        let mut items_failed = 0usize;
        let mut touched: Vec<NodeId> = Vec::new();
        let mut fatal: Option<EngineError> = None;

        {
            let walker = Walker {
                store: self.store.as_ref(),
                client: self.client.as_ref(),
                dispatcher: &self.dispatcher,
                taxonomy: &self.taxonomy,
            };
            let walker = &walker;
            let cancelled = &self.cancelled;
            let guard = &self.guard;
            let events = &self.events;
            let session_id = &self.session_id;
            let taxonomy_id = &self.taxonomy.id;

            let mut completions = stream::iter(batch.into_iter().map(|item| async move {
                if cancelled.load(Ordering::Relaxed) {
                    return ItemCompletion::Skipped;
                }
                if let Err(err) = guard.ensure_held() {
                    return ItemCompletion::Fatal(err);
                }
                let mut item_events = ItemEvents::new(
                    events.clone(),
                    taxonomy_id.clone(),
                    session_id.clone(),
                    item.id.clone(),
                );
                match walker.walk_item(&item, &mut item_events).await {
                    Ok(report) => {
                        item_events.done(report.outcome, report.diagnostics).await;
                        ItemCompletion::Done(report.accepted_nodes)
                    }
                    Err(err) if err.is_fatal() => ItemCompletion::Fatal(err),
                    Err(err) => {
                        warn!(item_id = %item.id, error = %err, "item walk failed");
                        item_events
                            .done(ItemOutcome::Failed, vec![err.to_string()])
                            .await;
                        ItemCompletion::Failed
                    }
                }
            }))
            .buffer_unordered(self.taxonomy.classifier.batch_size);

            while let Some(completion) = completions.next().await {
                match completion {
                    ItemCompletion::Done(nodes) => {
                        items_processed += 1;
                        touched.extend(nodes);
                    }
                    ItemCompletion::Failed => {
                        items_processed += 1;
                        items_failed += 1;
                    }
                    ItemCompletion::Skipped => {}
                    ItemCompletion::Fatal(err) => {
                        fatal = Some(err);
                        break;
                    }
                }
            }
        }

        if let Some(err) = fatal {
            error!(
                taxonomy_id = %self.taxonomy.id,
                session_id = %self.session_id,
                error = %err,
                "classification run failed"
            );
            let _ = self
                .events
                .send(SessionEvent::SessionFailed {
                    taxonomy_id: self.taxonomy.id.clone(),
                    session_id: self.session_id.clone(),
                    error: err.to_string(),
                })
                .await;
            return;
        }

        if self.taxonomy.classifier.auto_examine
            && !touched.is_empty()
            && !self.cancelled.load(Ordering::Relaxed)
        {
            touched.sort();
            touched.dedup();
            let mut taxonomy = self.taxonomy.clone();
            let pass = ExaminationPass {
                store: self.store.as_ref(),
                client: self.client.as_ref(),
                dispatcher: &self.dispatcher,
                events: &self.events,
                config: &self.health_config,
            };
            if let Err(err) = pass
                .run(&mut taxonomy, Selection::WeakWithin(&touched), &self.guard)
                .await
            {
                // The batch itself succeeded; examination can rerun later.
                warn!(error = %err, "post-batch examination failed");
            }
        }

        info!(
            taxonomy_id = %self.taxonomy.id,
            session_id = %self.session_id,
            items_processed,
            items_failed,
            "classification run complete"
        );
        let _ = self
            .events
            .send(SessionEvent::SessionDone {
                taxonomy_id: self.taxonomy.id.clone(),
                session_id: self.session_id.clone(),
                items_processed,
                items_failed,
            })
            .await;
    }
}
