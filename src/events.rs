//! Post-commit change notification.
//!
//! Transactions queue [`CaseEvent`]s as they mutate the case; the events are
//! published only after the transaction commits and are discarded on
//! rollback. Publishing never blocks the committer: a subscriber whose buffer
//! is full misses the event (counted in [`EventBus::dropped_events`]) and a
//! disconnected subscriber is forgotten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ids::{AccountId, HostId, RealmId};
use crate::scoring::ScoreChange;
use crate::storage::StorageError;

/// A committed change to the case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEvent {
    /// An aggregate score changed value.
    ScoreChanged(ScoreChange),
    /// A new OS account was created.
    AccountAdded(AccountId),
    /// Mutable fields of an OS account were updated.
    AccountUpdated(AccountId),
    /// `source` was folded into `destination` and tombstoned.
    AccountsMerged {
        /// The tombstoned account.
        source: AccountId,
        /// The surviving account.
        destination: AccountId,
    },
    /// `source` was folded into `destination` and tombstoned.
    RealmsMerged {
        /// The tombstoned realm.
        source: RealmId,
        /// The surviving realm.
        destination: RealmId,
    },
    /// `source` was folded into `destination` and tombstoned.
    HostsMerged {
        /// The tombstoned host.
        source: HostId,
        /// The surviving host.
        destination: HostId,
    },
}

/// Fan-out of committed events to bounded subscriber channels.
#[derive(Debug)]
pub(crate) struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<CaseEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> Result<Receiver<CaseEvent>, StorageError> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers
            .lock()
            .map_err(|_| StorageError::LockPoisoned("event subscribers"))?
            .push(tx);
        Ok(rx)
    }

    pub(crate) fn publish(&self, events: Vec<CaseEvent>) {
        if events.is_empty() {
            return;
        }
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!(count = events.len(), "event subscriber list poisoned; dropping events");
            return;
        };

        for event in events {
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }

    /// Events a full subscriber buffer could not take.
    pub(crate) fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe().unwrap();
        bus.publish(vec![CaseEvent::AccountAdded(AccountId::new(3))]);
        assert_eq!(rx.try_recv().unwrap(), CaseEvent::AccountAdded(AccountId::new(3)));
    }

    #[test]
    fn test_full_subscriber_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let _rx = bus.subscribe().unwrap();
        bus.publish(vec![
            CaseEvent::AccountAdded(AccountId::new(1)),
            CaseEvent::AccountAdded(AccountId::new(2)),
        ]);
        assert_eq!(bus.dropped_events(), 1);
    }

    #[test]
    fn test_disconnected_subscriber_is_forgotten() {
        let bus = EventBus::new(1);
        drop(bus.subscribe().unwrap());
        bus.publish(vec![CaseEvent::AccountUpdated(AccountId::new(1))]);
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
