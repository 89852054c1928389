//! Serialized access to one device-local log.
//!
//! All mutations of a store go through a [`LogHandle`]. The handle owns the
//! log lock, so a rebase never interleaves with a local commit or an import
//! from the exchange.

use crate::error::{Result, SdkError};
use basalt_core::{DeviceId, GlobalSequence, SchemaFingerprint};
use basalt_rebase::{RebaseConfig, RebaseOutcome, Rebaser};
use basalt_store::ChangeStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

/// Receives the single result of a background rebase.
pub type RebaseCompletion = oneshot::Receiver<Result<RebaseOutcome>>;

/// Running totals over every rebase run through a handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebaseStats {
    pub rebases: u64,
    pub no_ops: u64,
    pub failures: u64,
    pub events_merged: u64,
    pub identifiers_collected: u64,
    pub last_boundary: Option<GlobalSequence>,
}

impl RebaseStats {
    fn record(&mut self, result: &Result<RebaseOutcome>) {
        match result {
            Ok(RebaseOutcome::NoOp) => self.no_ops += 1,
            Ok(RebaseOutcome::Rebased(report)) => {
                self.rebases += 1;
                self.events_merged += report.merge.events_merged as u64;
                self.identifiers_collected += report.identifiers_collected as u64;
                self.last_boundary = Some(report.boundary);
            }
            Err(_) => self.failures += 1,
        }
    }
}

/// Shared handle to a device-local store.
pub struct LogHandle<S> {
    device_id: DeviceId,
    schema: SchemaFingerprint,
    config: RebaseConfig,
    store: Arc<Mutex<S>>,
    stats: Arc<RwLock<RebaseStats>>,
}

impl<S> Clone for LogHandle<S> {
    fn clone(&self) -> Self {
        Self {
            device_id: self.device_id.clone(),
            schema: self.schema,
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: ChangeStore + Send + 'static> LogHandle<S> {
    pub fn new(store: S, device_id: DeviceId, schema: SchemaFingerprint) -> Self {
        Self {
            device_id,
            schema,
            config: RebaseConfig::default(),
            store: Arc::new(Mutex::new(store)),
            stats: Arc::new(RwLock::new(RebaseStats::default())),
        }
    }

    pub fn with_config(mut self, config: RebaseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn schema(&self) -> SchemaFingerprint {
        self.schema
    }

    pub fn config(&self) -> &RebaseConfig {
        &self.config
    }

    /// Snapshot of the cumulative rebase statistics.
    pub fn stats(&self) -> RebaseStats {
        self.stats.read().clone()
    }

    /// Run `f` with exclusive access to the store.
    pub async fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut store = self.store.lock().await;
        f(&mut store)
    }

    pub async fn should_rebase(&self) -> Result<bool> {
        let mut store = self.store.lock().await;
        let rebaser = self.rebaser(&mut *store);
        Ok(rebaser.should_rebase()?)
    }

    pub async fn estimated_compaction_ratio(&self) -> Result<f64> {
        let mut store = self.store.lock().await;
        let rebaser = self.rebaser(&mut *store);
        Ok(rebaser.estimated_compaction_ratio()?)
    }

    /// Start a rebase on the runtime and return the receiver for its result.
    ///
    /// The spawned task always runs to commit or rollback, even when the
    /// receiver is dropped. Must be called from within a tokio runtime.
    pub fn start_rebase(&self) -> RebaseCompletion {
        let (tx, rx) = oneshot::channel();
        let handle = self.clone();

        tokio::spawn(async move {
            let result = {
                let mut store = handle.store.lock().await;
                handle.rebaser(&mut *store).rebase().map_err(SdkError::from)
            };
            handle.stats.write().record(&result);
            if tx.send(result).is_err() {
                debug!(device = %handle.device_id, "rebase finished with no one waiting");
            }
        });

        rx
    }

    /// Rebase the log and wait for the outcome.
    pub async fn rebase(&self) -> Result<RebaseOutcome> {
        self.start_rebase()
            .await
            .unwrap_or(Err(SdkError::TaskDropped))
    }

    /// Rebase in the background and invoke `on_complete` exactly once.
    pub fn rebase_with_completion<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<RebaseOutcome>) + Send + 'static,
    {
        let completion = self.start_rebase();
        tokio::spawn(async move {
            on_complete(completion.await.unwrap_or(Err(SdkError::TaskDropped)));
        });
    }

    /// Rebase only if the trigger says it is worthwhile. The check and the
    /// rebase happen under one hold of the log lock.
    pub async fn maintain(&self) -> Result<Option<RebaseOutcome>> {
        let mut store = self.store.lock().await;
        let mut rebaser = self.rebaser(&mut *store);
        if !rebaser.should_rebase()? {
            return Ok(None);
        }

        let result = rebaser.rebase().map_err(SdkError::from);
        drop(store);

        self.stats.write().record(&result);
        if let Ok(RebaseOutcome::Rebased(report)) = &result {
            info!(
                device = %self.device_id,
                boundary = report.boundary,
                merged = report.merge.events_merged,
                "maintenance rebase completed"
            );
        }
        result.map(Some)
    }

    fn rebaser<'a>(&self, store: &'a mut S) -> Rebaser<'a, S> {
        Rebaser::new(store, self.device_id.clone(), self.schema).with_config(self.config.clone())
    }
}
