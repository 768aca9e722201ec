//! Work queue and cycle budget.
//!
//! The queue is materialized once at run start, keeps tracker order, and is
//! drained left to right. [`WorkQueue::next_within`] checks the budget and
//! dequeues under one lock, so an item is only taken when a cycle will
//! actually start for it.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::domain::work_item::WorkItem;

/// Cycle budget: `attempted` only grows and never passes `max_cycles`.
#[derive(Debug)]
pub struct Budget {
    max_cycles: usize,
    attempted: AtomicUsize,
}

impl Budget {
    pub fn new(max_cycles: usize) -> Self {
        Self {
            max_cycles,
            attempted: AtomicUsize::new(0),
        }
    }

    pub fn max_cycles(&self) -> usize {
        self.max_cycles
    }

    pub fn attempted(&self) -> usize {
        self.attempted.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.max_cycles.saturating_sub(self.attempted())
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempted() >= self.max_cycles
    }

    /// Reserve one cycle start. Returns the 1-based attempt number, or
    /// `None` once the budget is spent.
    pub fn try_start(&self) -> Option<usize> {
        self.attempted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_cycles).then_some(n + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }
}

/// Result of asking the queue for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Item { item: WorkItem, attempt: usize },
    Empty,
    BudgetExhausted,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    dispatched: usize,
}

/// Ordered, de-duplicated supply of pending work items.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    skipped: usize,
}

impl WorkQueue {
    /// Build a queue from tracker results, keeping the first occurrence of
    /// each id and only items whose state is in `allowed_states` (empty
    /// accepts all).
    pub fn new(items: Vec<WorkItem>, allowed_states: &[String]) -> Self {
        let total = items.len();
        let mut seen = HashSet::new();
        let pending: VecDeque<WorkItem> = items
            .into_iter()
            .filter(|item| item.state_matches(allowed_states))
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        let skipped = total - pending.len();
        debug!(queued = pending.len(), skipped, "work queue materialized");
        Self {
            state: Mutex::new(QueueState {
                pending,
                dispatched: 0,
            }),
            skipped,
        }
    }

    /// Pop the next item only if `budget` admits another cycle.
    ///
    /// An empty queue is reported before an exhausted budget, and an
    /// exhausted budget leaves the item in the queue.
    pub fn next_within(&self, budget: &Budget) -> Dispatch {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Dispatch::Empty;
        }
        let Some(attempt) = budget.try_start() else {
            return Dispatch::BudgetExhausted;
        };
        match state.pending.pop_front() {
            Some(item) => {
                state.dispatched += 1;
                Dispatch::Item { item, attempt }
            }
            None => Dispatch::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items handed out so far.
    pub fn dispatched(&self) -> usize {
        self.lock().dispatched
    }

    /// Items dropped at construction as duplicates or by state filter.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Ids still waiting, in order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.iter().map(|i| i.id.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn items(specs: &[(&str, &str)]) -> Vec<WorkItem> {
        specs
            .iter()
            .map(|(id, state)| WorkItem::new(*id, format!("title {id}"), *state))
            .collect()
    }

    #[test]
    fn test_keeps_tracker_order_and_dedups() {
        let queue = WorkQueue::new(
            items(&[("A-1", "Todo"), ("A-2", "Todo"), ("A-1", "Todo"), ("A-3", "Todo")]),
            &[],
        );
        assert_eq!(queue.pending_ids(), ["A-1", "A-2", "A-3"]);
        assert_eq!(queue.skipped(), 1);

        let budget = Budget::new(10);
        let mut order = Vec::new();
        while let Dispatch::Item { item, .. } = queue.next_within(&budget) {
            order.push(item.id);
        }
        assert_eq!(order, ["A-1", "A-2", "A-3"]);
        assert_eq!(queue.dispatched(), 3);
    }

    #[test]
    fn test_filters_by_normalized_state() {
        let queue = WorkQueue::new(
            items(&[("A-1", "In Progress"), ("A-2", "Done"), ("A-3", "todo")]),
            &["in-progress".to_string(), "Todo".to_string()],
        );
        assert_eq!(queue.pending_ids(), ["A-1", "A-3"]);
    }

    #[test]
    fn test_budget_never_exceeds_max() {
        let budget = Budget::new(2);
        assert_eq!(budget.try_start(), Some(1));
        assert_eq!(budget.try_start(), Some(2));
        assert_eq!(budget.try_start(), None);
        assert_eq!(budget.attempted(), 2);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_budget_exhaustion_leaves_items_unconsumed() {
        let queue = WorkQueue::new(items(&[("A-1", "Todo"), ("A-2", "Todo"), ("A-3", "Todo")]), &[]);
        let budget = Budget::new(1);

        assert!(matches!(queue.next_within(&budget), Dispatch::Item { ref item, attempt: 1 } if item.id == "A-1"));
        assert_eq!(queue.next_within(&budget), Dispatch::BudgetExhausted);
        assert_eq!(queue.pending_ids(), ["A-2", "A-3"]);
        assert_eq!(budget.attempted(), 1);
    }

    #[test]
    fn test_empty_queue_does_not_spend_budget() {
        let queue = WorkQueue::new(vec![], &[]);
        let budget = Budget::new(5);
        assert_eq!(queue.next_within(&budget), Dispatch::Empty);
        assert_eq!(budget.attempted(), 0);
    }

    #[test]
    fn test_concurrent_callers_get_each_item_once() {
        let specs: Vec<(String, &str)> = (0..200).map(|i| (format!("A-{i}"), "Todo")).collect();
        let queue = Arc::new(WorkQueue::new(
            specs
                .iter()
                .map(|(id, s)| WorkItem::new(id.clone(), "t", *s))
                .collect(),
            &[],
        ));
        let budget = Arc::new(Budget::new(150));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Dispatch::Item { item, .. } = queue.next_within(&budget) {
                        got.push(item.id);
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(all.len(), 150);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 150, "no item may be dispatched twice");
        assert_eq!(budget.attempted(), 150);
        assert_eq!(queue.len(), 50);
    }
}
