//! A simulated device writing to its own log.
//!
//! A device commits local changes as events, imports whatever other devices
//! left on the exchange and offers its own events back. Every step runs
//! through the device's [`LogHandle`], so it is serialized with rebases.

use crate::error::Result;
use crate::exchange::EventExchange;
use crate::handle::LogHandle;
use basalt_core::{
    ChangeRecord, ChangeType, DeviceId, Event, GlobalIdentifier, GlobalSequence, Revision,
    RevisionSet, SchemaFingerprint,
};
use basalt_rebase::{latest_revision_set, RebaseConfig, RebaseOutcome};
use basalt_store::{ChangeStore, MemoryChangeStore, StoreError};
use std::collections::BTreeMap;
use tracing::debug;

/// What a sync moved in each direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub imported: usize,
    pub skipped: usize,
    pub exported: usize,
}

/// A device with a device-local store.
pub struct Device<S = MemoryChangeStore> {
    log: LogHandle<S>,
}

impl Device<MemoryChangeStore> {
    /// Create a device backed by an empty in-memory store.
    pub fn new(id: impl Into<String>, schema: SchemaFingerprint) -> Self {
        Self::from_store(id, MemoryChangeStore::new(), schema)
    }
}

impl<S: ChangeStore + Send + 'static> Device<S> {
    pub fn from_store(id: impl Into<String>, store: S, schema: SchemaFingerprint) -> Self {
        Self {
            log: LogHandle::new(store, DeviceId::new(id), schema),
        }
    }

    pub fn with_config(mut self, config: RebaseConfig) -> Self {
        self.log = self.log.with_config(config);
        self
    }

    pub fn id(&self) -> &DeviceId {
        self.log.device_id()
    }

    pub fn log(&self) -> &LogHandle<S> {
        &self.log
    }

    /// Commit `changes` as one new local event and return it.
    pub async fn commit(&self, changes: Vec<ChangeRecord>) -> Result<Event> {
        let device_id = self.id().clone();
        let schema = self.log.schema();
        self.log
            .with_store(move |store| -> Result<Event> {
                let event = next_event(&*store, device_id, schema, changes)?;
                store.save_event(event.clone())?;
                if let Err(error) = store.commit() {
                    store.rollback();
                    return Err(error.into());
                }
                Ok(event)
            })
            .await
    }

    pub async fn insert(&self, id: GlobalIdentifier, attributes: &[(&str, serde_json::Value)]) -> Result<Event> {
        let record = attributes
            .iter()
            .fold(ChangeRecord::insert(id), |record, (name, value)| {
                record.with_attribute(*name, value.clone())
            });
        self.commit(vec![record]).await
    }

    pub async fn update(&self, id: GlobalIdentifier, attributes: &[(&str, serde_json::Value)]) -> Result<Event> {
        let record = attributes
            .iter()
            .fold(ChangeRecord::update(id), |record, (name, value)| {
                record.with_attribute(*name, value.clone())
            });
        self.commit(vec![record]).await
    }

    pub async fn delete(&self, id: GlobalIdentifier) -> Result<Event> {
        self.commit(vec![ChangeRecord::delete(id)]).await
    }

    /// Import events from the exchange that this device has not seen yet.
    pub async fn pull<E: EventExchange + ?Sized>(&self, exchange: &E) -> Result<SyncSummary> {
        let remote = exchange.download().await?;
        let summary = self
            .log
            .with_store(|store| -> std::result::Result<SyncSummary, StoreError> {
                let summary = import(store, remote)?;
                if let Err(error) = store.commit() {
                    store.rollback();
                    return Err(error);
                }
                Ok(summary)
            })
            .await?;
        debug!(device = %self.id(), imported = summary.imported, skipped = summary.skipped, "pulled events");
        Ok(summary)
    }

    /// Offer every local event, the baseline included, to the exchange.
    pub async fn push<E: EventExchange + ?Sized>(&self, exchange: &E) -> Result<usize> {
        let local = self
            .log
            .with_store(|store| all_events(&*store))
            .await?;
        let exported = exchange.upload(local).await?;
        debug!(device = %self.id(), exported, "pushed events");
        Ok(exported)
    }

    /// Pull, then push.
    pub async fn sync<E: EventExchange + ?Sized>(&self, exchange: &E) -> Result<SyncSummary> {
        let mut summary = self.pull(exchange).await?;
        summary.exported = self.push(exchange).await?;
        Ok(summary)
    }

    /// Join the exchange: import what is there, fold everything into a
    /// baseline and publish it.
    pub async fn leech<E: EventExchange + ?Sized>(&self, exchange: &E) -> Result<RebaseOutcome> {
        self.pull(exchange).await?;
        let outcome = self.log.rebase().await?;
        self.push(exchange).await?;
        Ok(outcome)
    }

    pub async fn rebase(&self) -> Result<RebaseOutcome> {
        self.log.rebase().await
    }

    /// The single baseline, if there is exactly one.
    pub async fn baseline(&self) -> Result<Option<Event>> {
        Ok(self.log.with_store(|store| store.fetch_baseline()).await?)
    }

    /// Current state of every object, rebuilt by replaying the baseline and
    /// the remaining events in order.
    pub async fn objects(&self) -> Result<Vec<ChangeRecord>> {
        let events = self
            .log
            .with_store(|store| all_events(&*store))
            .await?;
        Ok(replay(events))
    }
}

/// Build the next local event. The revision number continues the device's
/// own history and the global sequence lands after everything it has seen.
fn next_event<S: ChangeStore + ?Sized>(
    store: &S,
    device_id: DeviceId,
    schema: SchemaFingerprint,
    changes: Vec<ChangeRecord>,
) -> std::result::Result<Event, StoreError> {
    let mut known = RevisionSet::new();
    for baseline in store.fetch_baselines()? {
        known.merge(&baseline.revision_set);
    }
    known.merge(&latest_revision_set(store.fetch_event_revisions()?));

    let revision_number = known
        .get(&device_id)
        .map(|revision| revision.revision_number)
        .unwrap_or(0)
        + 1;
    let global_sequence = store
        .max_global_sequence()?
        .max(known.max_global_sequence().unwrap_or(0))
        + 1;

    Ok(Event::normal(
        Revision::new(device_id, revision_number, global_sequence),
        known,
        schema,
        changes,
    ))
}

fn all_events<S: ChangeStore + ?Sized>(store: &S) -> std::result::Result<Vec<Event>, StoreError> {
    let mut events = store.fetch_baselines()?;
    events.extend(store.fetch_events(GlobalSequence::MAX)?);
    Ok(events)
}

/// Save the remote events this store should hold.
fn import<S: ChangeStore + ?Sized>(
    store: &mut S,
    remote: Vec<Event>,
) -> std::result::Result<SyncSummary, StoreError> {
    let mut summary = SyncSummary::default();
    let baselines = store.fetch_baselines()?;

    for event in remote {
        let skip = if store.contains_event(&event.id)? {
            true
        } else if event.is_baseline() {
            baselines
                .iter()
                .any(|local| local.revision_set.dominates(&event.revision_set))
        } else {
            event
                .own_revision()
                .map(|revision| baselines.iter().any(|local| local.revision_set.covers(revision)))
                .unwrap_or(false)
        };

        if skip {
            summary.skipped += 1;
        } else {
            store.save_event(event)?;
            summary.imported += 1;
        }
    }
    Ok(summary)
}

fn replay(mut events: Vec<Event>) -> Vec<ChangeRecord> {
    events.sort_by(|a, b| {
        b.is_baseline()
            .cmp(&a.is_baseline())
            .then_with(|| a.ordering_key().cmp(&b.ordering_key()))
    });

    let mut objects: BTreeMap<GlobalIdentifier, ChangeRecord> = BTreeMap::new();
    for change in events.into_iter().flat_map(|event| event.changes) {
        let id = change.global_identifier.clone();
        match change.change_type {
            ChangeType::Delete => {
                objects.remove(&id);
            }
            ChangeType::Insert => {
                let record = match objects.remove(&id) {
                    Some(existing) => change.merged_over(&existing),
                    None => change,
                };
                objects.insert(id, record.into_snapshot());
            }
            ChangeType::Update => {
                if let Some(existing) = objects.remove(&id) {
                    objects.insert(id, change.merged_over(&existing).into_snapshot());
                }
            }
        }
    }
    objects.into_values().collect()
}
