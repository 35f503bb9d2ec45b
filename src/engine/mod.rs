mod archive;
mod conflict;
mod error;
mod lifecycle;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard,
};
use tracing::debug;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedItemState = Arc<RwLock<ItemState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before compacting or reporting.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Send one event to the WAL writer and wait until it is durable.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(format!("WAL append failed: {e}")))
}

/// Apply an event directly to an ItemState (no locking, caller holds the lock).
fn apply_to_item(item: &mut ItemState, event: &Event, request_index: &DashMap<RequestId, ItemId>) {
    match event {
        Event::RequestSubmitted {
            id,
            item_id,
            user_id,
            span,
        } => {
            item.insert_request(BorrowRequest {
                id: *id,
                item_id: *item_id,
                user_id: *user_id,
                span: *span,
                status: RequestStatus::Pending,
            });
            request_index.insert(*id, *item_id);
        }
        Event::RequestApproved { id, .. } => {
            if let Some(r) = item.request_mut(id) {
                r.status = RequestStatus::Approved;
            }
        }
        Event::RequestDenied { id, .. } => {
            if let Some(r) = item.request_mut(id) {
                r.status = RequestStatus::Denied;
            }
        }
        Event::HistoryArchived {
            request_id,
            item_id,
            user_id,
            span,
        } => {
            if item.history_for(request_id).is_none() {
                item.history.push(BorrowHistory {
                    request_id: *request_id,
                    item_id: *item_id,
                    user_id: *user_id,
                    span: *span,
                });
            }
        }
    }
}

pub struct Engine {
    pub state: DashMap<ItemId, SharedItemState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: request id → item id
    pub(super) request_to_item: Arc<DashMap<RequestId, ItemId>>,
    /// Submits hold this shared; compaction holds it exclusively so no item
    /// can appear between its snapshot and the WAL swap.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) config: EngineConfig,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            request_to_item: Arc::new(DashMap::new()),
            compaction_gate: RwLock::new(()),
            config,
        };

        // The engine is not shared yet, so try_write cannot fail. blocking_write
        // would panic here when a tenant is opened from inside the runtime.
        for event in &events {
            let item = engine.get_or_create_item(event.item_id());
            let mut guard = item
                .try_write()
                .map_err(|_| io::Error::other("replay: item lock contended"))?;
            apply_to_item(&mut guard, event, &engine.request_to_item);
        }
        debug!(events = events.len(), items = engine.state.len(), "WAL replayed");

        Ok(engine)
    }

    pub fn get_item(&self, id: &ItemId) -> Option<SharedItemState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Items are created on first use. The catalog that owns them is external.
    pub(super) fn get_or_create_item(&self, id: ItemId) -> SharedItemState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(ItemState::new(id))))
            .value()
            .clone()
    }

    pub fn get_item_for_request(&self, request_id: &RequestId) -> Option<ItemId> {
        self.request_to_item.get(request_id).map(|e| *e.value())
    }

    /// Shared hold on the compaction gate, needed by anything that may create
    /// an item. Bounded by the lock timeout like item locks.
    pub(super) async fn enter_submit(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, self.compaction_gate.read())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Storage("timed out waiting for WAL compaction".into())
            })
    }

    /// Acquire the item's exclusive scope, giving up after the configured timeout.
    pub(super) async fn lock_item(
        &self,
        item: SharedItemState,
    ) -> Result<OwnedRwLockWriteGuard<ItemState>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, item.write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Storage("timed out waiting for item lock".into())
            })
    }

    pub(super) async fn read_item(
        &self,
        item: SharedItemState,
    ) -> Result<OwnedRwLockReadGuard<ItemState>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, item.read_owned())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Storage("timed out waiting for item lock".into())
            })
    }

    /// Lookup request → item, then acquire that item's exclusive scope.
    pub(super) async fn resolve_request_write(
        &self,
        request_id: &RequestId,
    ) -> Result<OwnedRwLockWriteGuard<ItemState>, EngineError> {
        let item_id = self
            .get_item_for_request(request_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        let item = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        self.lock_item(item).await
    }

    /// Decide, persist and apply one event while holding the item's write guard.
    ///
    /// The guard moves into a spawned task, so once the scope has been entered
    /// a dropped caller cannot interrupt it between the WAL append and the
    /// in-memory apply. Notification happens after the guard is released.
    pub(super) async fn commit_exclusive<F, T>(
        &self,
        guard: OwnedRwLockWriteGuard<ItemState>,
        decide: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(&ItemState) -> Result<(Event, T), EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        let index = self.request_to_item.clone();
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let (event, out) = decide(&*guard)?;
            wal_append(&wal_tx, &event).await?;
            apply_to_item(&mut *guard, &event, &index);
            Ok::<_, EngineError>((event, out))
        });
        let (event, out) = task
            .await
            .map_err(|e| EngineError::Storage(format!("commit task failed: {e}")))??;

        metrics::counter!(observability::TRANSITIONS_TOTAL, "event" => event.kind()).increment(1);
        self.notify.send(event.item_id(), &event);
        Ok(out)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No submit is in flight past this point, so the item list below is
        // complete until the swap.
        let gate = self.compaction_gate.write().await;
        let items = self.item_handles();
        // Read guards stay held until the swap is done, so no commit can land
        // in the old file after its item has been snapshotted.
        let mut guards = Vec::with_capacity(items.len());
        for item in items {
            guards.push(self.read_item(item).await?);
        }
        let mut events = Vec::new();
        for guard in &guards {
            for r in &guard.requests {
                events.push(Event::RequestSubmitted {
                    id: r.id,
                    item_id: r.item_id,
                    user_id: r.user_id,
                    span: r.span,
                });
                match r.status {
                    RequestStatus::Pending => {}
                    RequestStatus::Approved => events.push(Event::RequestApproved {
                        id: r.id,
                        item_id: r.item_id,
                    }),
                    RequestStatus::Denied => events.push(Event::RequestDenied {
                        id: r.id,
                        item_id: r.item_id,
                    }),
                }
            }
            for h in &guard.history {
                events.push(Event::HistoryArchived {
                    request_id: h.request_id,
                    item_id: h.item_id,
                    user_id: h.user_id,
                    span: h.span,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(format!("WAL compaction failed: {e}")));
        drop(guards);
        drop(gate);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
