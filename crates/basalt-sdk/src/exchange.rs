//! Event exchange abstractions.
//!
//! An exchange is the shared place devices push their events to and pull
//! everyone else's from. It only stores events; ordering and merging are
//! left to each device.

use crate::error::Result;
use async_trait::async_trait;
use basalt_core::{Event, EventId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Abstract event exchange.
#[async_trait]
pub trait EventExchange: Send + Sync + 'static {
    /// Offer events to the exchange. Events it already holds, or that a
    /// held baseline supersedes, are ignored.
    async fn upload(&self, events: Vec<Event>) -> Result<usize>;

    /// Every event the exchange currently holds.
    async fn download(&self) -> Result<Vec<Event>>;
}

/// In-memory exchange for testing and simulation.
#[derive(Clone, Default)]
pub struct MemoryExchange {
    events: Arc<RwLock<HashMap<EventId, Event>>>,
}

impl MemoryExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn baseline_count(&self) -> usize {
        self.events.read().values().filter(|e| e.is_baseline()).count()
    }

    fn accept(events: &mut HashMap<EventId, Event>, event: Event) -> bool {
        if events.contains_key(&event.id) {
            return false;
        }

        if event.is_baseline() {
            let superseded = events.values().any(|held| {
                held.is_baseline() && held.revision_set.dominates(&event.revision_set)
            });
            if superseded {
                return false;
            }

            // The new baseline makes older baselines and folded events redundant.
            events.retain(|_, held| {
                if held.is_baseline() {
                    !event.revision_set.dominates(&held.revision_set)
                } else {
                    !held
                        .own_revision()
                        .map(|revision| event.revision_set.covers(revision))
                        .unwrap_or(false)
                }
            });
        } else {
            let folded = events.values().any(|held| {
                held.is_baseline()
                    && event
                        .own_revision()
                        .map(|revision| held.revision_set.covers(revision))
                        .unwrap_or(false)
            });
            if folded {
                return false;
            }
        }

        events.insert(event.id, event);
        true
    }
}

#[async_trait]
impl EventExchange for MemoryExchange {
    async fn upload(&self, events: Vec<Event>) -> Result<usize> {
        let mut held = self.events.write();
        let offered = events.len();
        let mut accepted = 0;
        for event in events {
            if Self::accept(&mut held, event) {
                accepted += 1;
            }
        }
        debug!(offered, accepted, held = held.len(), "exchange upload");
        Ok(accepted)
    }

    async fn download(&self) -> Result<Vec<Event>> {
        Ok(self.events.read().values().cloned().collect())
    }
}
