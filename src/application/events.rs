//! Notifications for the UI layer.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::domain::{NodeId, NodeState};

/// Change notification emitted by the population writer.
///
/// `ModelReset` is sent from the thread that installed or reset the table,
/// while row and state events come from the writer. A `RowsInserted` or
/// `NodeStateChanged` of the previous generation can therefore still arrive
/// after the `ModelReset` that replaced it. Consumers compare the carried
/// `generation` against the last reset and drop older events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// Every previously issued index is invalid
    ModelReset { generation: u64 },
    /// Rows `first..=last` appeared below `parent`
    RowsInserted {
        generation: u64,
        parent: NodeId,
        first: usize,
        last: usize,
    },
    NodeStateChanged {
        generation: u64,
        node: NodeId,
        state: NodeState,
    },
    RequestStarted { request: u64 },
    RequestFinished { request: u64, cancelled: bool },
    TreeNameResolved { generation: u64, name: String },
}

/// Fan-out of events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<TreeEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TreeEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub fn emit(&self, event: TreeEvent) {
        trace!(?event, "emit");
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = TreeEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Coalesce successive single-row insertions into contiguous ranges.
///
/// Rows are positions at the time of each insertion, so a run only
/// continues while each row directly follows the previous one.
pub(crate) fn row_ranges(rows: &[usize]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &row in rows {
        match ranges.last_mut() {
            Some((_, last)) if *last + 1 == row => *last = row,
            _ => ranges.push((row, row)),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_appended_rows_when_coalescing_then_single_range() {
        assert_eq!(row_ranges(&[3, 4, 5]), vec![(3, 5)]);
    }

    #[test]
    fn given_sorted_insertions_when_coalescing_then_breaks_runs() {
        assert_eq!(row_ranges(&[0, 0, 2, 3]), vec![(0, 0), (0, 0), (2, 3)]);
        assert!(row_ranges(&[]).is_empty());
    }

    #[test]
    fn given_dropped_subscriber_when_emitting_then_other_subscribers_still_receive() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(TreeEvent::RequestStarted { request: 1 });

        assert_eq!(kept.try_recv().unwrap(), TreeEvent::RequestStarted { request: 1 });
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
