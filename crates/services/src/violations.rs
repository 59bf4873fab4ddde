use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use exam_core::model::{SessionId, Violation, ViolationKind, ViolationLedger};
use storage::repository::StorageError;
use storage::session_store::SessionStore;

use crate::collaborators::{CheatEvent, CheatEventSink};

/// Appends violations to the session ledger, persists it, and forwards each
/// one to the audit sink.
pub struct ViolationRecorder {
    store: SessionStore,
    sink: Arc<dyn CheatEventSink>,
    ledger: Mutex<ViolationLedger>,
}

impl ViolationRecorder {
    /// Load the persisted ledger, or start an empty one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn restore(
        store: SessionStore,
        sink: Arc<dyn CheatEventSink>,
    ) -> Result<Self, StorageError> {
        let ledger = store.load_violations().await?.unwrap_or_default();
        Ok(Self {
            store,
            sink,
            ledger: Mutex::new(ledger),
        })
    }

    /// Record one violation and return the new warning count.
    ///
    /// The ledger stays locked until the write completes so persisted
    /// snapshots land in append order. The audit call runs on its own task.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the ledger cannot be persisted; the
    /// in-memory ledger keeps the entry.
    pub async fn add_warning(
        &self,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut ledger = self.ledger.lock().await;
        let warning_count = ledger.append(Violation::new(kind.clone(), now));

        tracing::warn!(
            session_id = %self.store.session_id(),
            reason = kind.reason(),
            warning_count,
            "integrity violation recorded"
        );

        self.forward(CheatEvent {
            session_id: self.store.session_id().clone(),
            reason: kind.reason().to_owned(),
            warning_count,
            timestamp: now,
        });

        self.store.save_violations(&ledger).await?;
        Ok(warning_count)
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.store.session_id()
    }

    pub async fn warning_count(&self) -> usize {
        self.ledger.lock().await.warning_count()
    }

    pub async fn ledger(&self) -> ViolationLedger {
        self.ledger.lock().await.clone()
    }

    fn forward(&self, event: CheatEvent) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(err) = sink.record(&event).await {
                tracing::warn!(
                    session_id = %event.session_id,
                    reason = %event.reason,
                    error = %err,
                    "failed to forward cheat event"
                );
            }
        });
    }
}
