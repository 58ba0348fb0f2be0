//! Blocking bounded queue invariants.
//!
//! | Property | Checked when | Description |
//! |----------|--------------|-------------|
//! | BoundedCapacity | always | 0 <= len <= capacity |
//! | PermitAccounting | open, quiescent | occupied == len == capacity - free |
//! | NoLostItems | always | admitted ⊆ taken ∪ contents ∪ reclaimed |
//! | NoDuplicates | always | each item delivered or stored at most once |
//! | NoPhantomItems | always | nothing appears that was not admitted |
//! | PerProducerFifo | always | per-producer sequences strictly increase |
//! | NoAdmissionAfterClose | with history | no put invoked after close returned succeeds |
//!
//! `PerProducerFifo` walks `taken ++ reclaimed ++ contents`. With several
//! consumers the taken order is the order in which `take` calls returned,
//! which can differ from dequeue order, so the check is only exact with one
//! consumer.

use std::collections::{HashMap, HashSet};

use crate::counterexample::{Counterexample, ProtocolIssue, StateSnapshot, ThreadAction};
use crate::property::{PropertyChecker, PropertyResult};
use crate::tag::ItemTag;

/// State a queue implementation exposes for checking.
///
/// Items are `u64` so that producers can tag them with [`ItemTag`].
pub trait QueueProperties {
    /// Items whose `put` returned success, in the order the calls returned.
    fn admitted_items(&self) -> Vec<u64>;

    /// Items returned by `take`, in the order the calls returned.
    fn taken_items(&self) -> Vec<u64>;

    /// Items handed to a cleanup callback when the queue was drained.
    fn reclaimed_items(&self) -> Vec<u64>;

    /// Items currently stored, head to tail.
    fn current_contents(&self) -> Vec<u64>;

    /// Fixed capacity.
    fn capacity(&self) -> usize;

    /// `(free, occupied)` slot permits, when the implementation has them.
    fn slot_permits(&self) -> Option<(usize, usize)>;

    /// Whether the queue still accepts operations.
    fn is_open(&self) -> bool;

    /// Operation history, if recorded.
    fn history(&self) -> QueueHistory {
        QueueHistory::default()
    }
}

/// Kind of a recorded queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOpKind {
    /// `put` admitted the item
    Put,
    /// `put` returned CLOSED
    PutClosed,
    /// `take` returned an item
    Take,
    /// `take` returned CLOSED
    TakeClosed,
    /// `close` returned
    Close,
}

/// A single recorded operation.
#[derive(Debug, Clone)]
pub struct QueueOperation {
    pub thread_id: u64,
    pub kind: QueueOpKind,
    pub item: Option<u64>,
    /// Step at which the call started
    pub invoked_at: u64,
    /// Step at which the call returned
    pub completed_at: u64,
}

/// History of queue operations, in completion order.
#[derive(Debug, Clone, Default)]
pub struct QueueHistory {
    pub operations: Vec<QueueOperation>,
}

impl QueueHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed operation.
    pub fn record(
        &mut self,
        thread_id: u64,
        kind: QueueOpKind,
        item: Option<u64>,
        invoked_at: u64,
        completed_at: u64,
    ) {
        debug_assert!(invoked_at <= completed_at, "operation returned before it started");
        self.operations.push(QueueOperation {
            thread_id,
            kind,
            item,
            invoked_at,
            completed_at,
        });
    }

    /// Step at which the first `close` returned.
    #[must_use]
    pub fn closed_at(&self) -> Option<u64> {
        self.operations
            .iter()
            .filter(|op| op.kind == QueueOpKind::Close)
            .map(|op| op.completed_at)
            .min()
    }

    /// Render the history as a thread interleaving.
    #[must_use]
    pub fn to_actions(&self) -> Vec<ThreadAction> {
        self.operations
            .iter()
            .map(|op| {
                let action = match (op.kind, op.item) {
                    (QueueOpKind::Put | QueueOpKind::PutClosed, Some(item)) => format!("put({})", item),
                    (QueueOpKind::Put | QueueOpKind::PutClosed, None) => "put(?)".to_string(),
                    (QueueOpKind::Take, Some(item)) => format!("take()={}", item),
                    (QueueOpKind::Take | QueueOpKind::TakeClosed, _) => "take()".to_string(),
                    (QueueOpKind::Close, _) => "close()".to_string(),
                };
                ThreadAction {
                    thread_id: op.thread_id,
                    step: op.completed_at,
                    action,
                    success: !matches!(op.kind, QueueOpKind::PutClosed | QueueOpKind::TakeClosed),
                }
            })
            .collect()
    }
}

/// Property checker for blocking bounded queues.
///
/// Meant to run at quiescent points: no `put`, `take` or `close` in flight.
pub struct QueuePropertyChecker<'a, Q: QueueProperties> {
    queue: &'a Q,
    dst_seed: Option<u64>,
}

impl<'a, Q: QueueProperties> QueuePropertyChecker<'a, Q> {
    #[must_use]
    pub fn new(queue: &'a Q) -> Self {
        Self {
            queue,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self, description: String) -> Counterexample {
        let mut ce = Counterexample::for_seed(self.dst_seed).with_description(description);
        for action in self.queue.history().to_actions() {
            ce.add_action(action);
        }
        ce
    }

    fn check_bounded_capacity(&self) -> PropertyResult {
        let len = self.queue.current_contents().len();
        let capacity = self.queue.capacity();

        if len > capacity {
            return PropertyResult::fail(
                "BoundedCapacity",
                format!("Queue holds {} items but capacity is {}", len, capacity),
                None,
            );
        }

        PropertyResult::pass("BoundedCapacity")
    }

    /// Only meaningful while open: close force-releases permits.
    fn check_permit_accounting(&self) -> PropertyResult {
        let Some((free, occupied)) = self.queue.slot_permits() else {
            return PropertyResult::pass("PermitAccounting");
        };
        if !self.queue.is_open() {
            return PropertyResult::pass("PermitAccounting");
        }

        let len = self.queue.current_contents().len();
        let capacity = self.queue.capacity();

        if occupied != len || free + len != capacity {
            let mut ce = self.counterexample(format!(
                "free={} occupied={} len={} capacity={}",
                free, occupied, len, capacity
            ));
            ce.add_state(StateSnapshot {
                step: 1,
                description: "permits disagree with ring length".to_string(),
                variables: vec![
                    ("free".to_string(), free.to_string()),
                    ("occupied".to_string(), occupied.to_string()),
                    ("len".to_string(), len.to_string()),
                ],
            });
            return PropertyResult::fail(
                "PermitAccounting",
                format!(
                    "Expected occupied == len == capacity - free, got free={} occupied={} len={} capacity={}",
                    free, occupied, len, capacity
                ),
                Some(ce),
            );
        }

        PropertyResult::pass("PermitAccounting")
    }

    fn check_no_lost_items(&self) -> PropertyResult {
        let admitted = self.queue.admitted_items();
        let taken: HashSet<u64> = self.queue.taken_items().into_iter().collect();
        let reclaimed: HashSet<u64> = self.queue.reclaimed_items().into_iter().collect();
        let contents: HashSet<u64> = self.queue.current_contents().into_iter().collect();

        for item in &admitted {
            if !taken.contains(item) && !reclaimed.contains(item) && !contents.contains(item) {
                let mut ce = self.counterexample(format!("Item {} lost", item));
                ce.add_state(StateSnapshot {
                    step: 1,
                    description: format!("Item {} lost", item),
                    variables: vec![
                        ("admitted".to_string(), format!("{:?}", admitted)),
                        ("taken".to_string(), format!("{:?}", taken)),
                        ("reclaimed".to_string(), format!("{:?}", reclaimed)),
                        ("contents".to_string(), format!("{:?}", contents)),
                    ],
                });
                ce.add_issue(ProtocolIssue::ItemLost { item: *item });
                return PropertyResult::fail(
                    "NoLostItems",
                    format!(
                        "Item {} was admitted but is neither taken, reclaimed nor stored",
                        item
                    ),
                    Some(ce),
                );
            }
        }

        PropertyResult::pass("NoLostItems")
    }

    fn check_no_duplicates(&self) -> PropertyResult {
        let mut seen: HashMap<u64, usize> = HashMap::new();
        let everywhere = self
            .queue
            .taken_items()
            .into_iter()
            .chain(self.queue.reclaimed_items())
            .chain(self.queue.current_contents());
        for item in everywhere {
            *seen.entry(item).or_insert(0) += 1;
        }

        if let Some((&item, &deliveries)) = seen.iter().find(|(_, &n)| n > 1) {
            let mut ce = self.counterexample(format!("Item {} seen {} times", item, deliveries));
            ce.add_issue(ProtocolIssue::DuplicateDelivery { item, deliveries });
            return PropertyResult::fail(
                "NoDuplicates",
                format!(
                    "Item {} appears {} times across taken, reclaimed and contents",
                    item, deliveries
                ),
                Some(ce),
            );
        }

        PropertyResult::pass("NoDuplicates")
    }

    fn check_no_phantom_items(&self) -> PropertyResult {
        let admitted: HashSet<u64> = self.queue.admitted_items().into_iter().collect();
        let observed = self
            .queue
            .taken_items()
            .into_iter()
            .chain(self.queue.reclaimed_items())
            .chain(self.queue.current_contents());

        for item in observed {
            if !admitted.contains(&item) {
                return PropertyResult::fail(
                    "NoPhantomItems",
                    format!("Item {} was observed but never admitted", item),
                    None,
                );
            }
        }

        PropertyResult::pass("NoPhantomItems")
    }

    fn check_per_producer_fifo(&self) -> PropertyResult {
        let mut last: HashMap<u32, u32> = HashMap::new();
        let order = self
            .queue
            .taken_items()
            .into_iter()
            .chain(self.queue.reclaimed_items())
            .chain(self.queue.current_contents());

        for item in order {
            let tag = ItemTag::from_item(item);
            if let Some(&prev) = last.get(&tag.producer) {
                if tag.sequence <= prev {
                    return PropertyResult::fail(
                        "PerProducerFifo",
                        format!(
                            "Producer {} delivered sequence {} after {}",
                            tag.producer, tag.sequence, prev
                        ),
                        Some(self.counterexample(format!("{} out of order", tag))),
                    );
                }
            }
            last.insert(tag.producer, tag.sequence);
        }

        PropertyResult::pass("PerProducerFifo")
    }

    fn check_no_admission_after_close(&self) -> PropertyResult {
        let history = self.queue.history();
        let Some(closed_at) = history.closed_at() else {
            return PropertyResult::pass("NoAdmissionAfterClose");
        };

        let late = history
            .operations
            .iter()
            .find(|op| op.kind == QueueOpKind::Put && op.invoked_at > closed_at);

        if let Some(op) = late {
            let item = op.item.unwrap_or_default();
            let mut ce = self.counterexample(format!("put({}) admitted after close", item));
            ce.add_issue(ProtocolIssue::AdmissionAfterClose {
                thread_id: op.thread_id,
                item,
                closed_at_step: closed_at,
                admitted_at_step: op.completed_at,
            });
            return PropertyResult::fail(
                "NoAdmissionAfterClose",
                format!(
                    "Thread {} started put({}) at step {} after close returned at step {} and succeeded",
                    op.thread_id, item, op.invoked_at, closed_at
                ),
                Some(ce),
            );
        }

        PropertyResult::pass("NoAdmissionAfterClose")
    }
}

impl<'a, Q: QueueProperties> PropertyChecker for QueuePropertyChecker<'a, Q> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_bounded_capacity(),
            self.check_permit_accounting(),
            self.check_no_lost_items(),
            self.check_no_duplicates(),
            self.check_no_phantom_items(),
            self.check_per_producer_fifo(),
            self.check_no_admission_after_close(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Snapshot {
        admitted: Vec<u64>,
        taken: Vec<u64>,
        reclaimed: Vec<u64>,
        contents: Vec<u64>,
        capacity: usize,
        permits: Option<(usize, usize)>,
        open: bool,
        history: QueueHistory,
    }

    impl QueueProperties for Snapshot {
        fn admitted_items(&self) -> Vec<u64> {
            self.admitted.clone()
        }
        fn taken_items(&self) -> Vec<u64> {
            self.taken.clone()
        }
        fn reclaimed_items(&self) -> Vec<u64> {
            self.reclaimed.clone()
        }
        fn current_contents(&self) -> Vec<u64> {
            self.contents.clone()
        }
        fn capacity(&self) -> usize {
            self.capacity
        }
        fn slot_permits(&self) -> Option<(usize, usize)> {
            self.permits
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn history(&self) -> QueueHistory {
            self.history.clone()
        }
    }

    fn tagged(producer: u32, sequence: u32) -> u64 {
        ItemTag::new(producer, sequence).into_item()
    }

    fn healthy() -> Snapshot {
        Snapshot {
            admitted: vec![tagged(0, 1), tagged(1, 1), tagged(0, 2)],
            taken: vec![tagged(0, 1)],
            contents: vec![tagged(1, 1), tagged(0, 2)],
            capacity: 2,
            permits: Some((0, 2)),
            open: true,
            ..Snapshot::default()
        }
    }

    fn violated(snapshot: &Snapshot) -> Vec<&'static str> {
        QueuePropertyChecker::new(snapshot)
            .violations()
            .into_iter()
            .map(|r| r.property)
            .collect()
    }

    #[test]
    fn test_healthy_snapshot_holds() {
        let snapshot = healthy();
        let checker = QueuePropertyChecker::new(&snapshot);
        assert!(checker.all_hold(), "{:?}", checker.violations());
    }

    #[test]
    fn test_over_capacity() {
        let mut snapshot = healthy();
        snapshot.capacity = 1;
        snapshot.permits = None;
        assert_eq!(violated(&snapshot), vec!["BoundedCapacity"]);
    }

    #[test]
    fn test_permit_mismatch_only_while_open() {
        let mut snapshot = healthy();
        snapshot.permits = Some((1, 2));
        assert_eq!(violated(&snapshot), vec!["PermitAccounting"]);

        snapshot.open = false;
        assert!(violated(&snapshot).is_empty());
    }

    #[test]
    fn test_lost_item() {
        let mut snapshot = healthy();
        snapshot.contents.pop();
        snapshot.permits = Some((1, 1));

        let results = QueuePropertyChecker::new(&snapshot).with_seed(99).violations();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].property, "NoLostItems");
        let ce = results[0].counterexample.as_ref().expect("counterexample");
        assert_eq!(ce.dst_seed, Some(99));
        assert_eq!(ce.issues, vec![ProtocolIssue::ItemLost { item: tagged(0, 2) }]);
    }

    #[test]
    fn test_reclaimed_items_are_not_lost() {
        let mut snapshot = healthy();
        snapshot.reclaimed = std::mem::take(&mut snapshot.contents);
        snapshot.open = false;
        assert!(violated(&snapshot).is_empty());
    }

    #[test]
    fn test_duplicate_and_phantom() {
        let mut snapshot = healthy();
        snapshot.taken.push(tagged(1, 1));
        assert!(violated(&snapshot).contains(&"NoDuplicates"));

        let mut snapshot = healthy();
        snapshot.taken.push(tagged(5, 5));
        assert!(violated(&snapshot).contains(&"NoPhantomItems"));
    }

    #[test]
    fn test_per_producer_reordering() {
        let mut snapshot = healthy();
        snapshot.taken = vec![tagged(0, 2)];
        snapshot.contents = vec![tagged(1, 1), tagged(0, 1)];
        assert_eq!(violated(&snapshot), vec!["PerProducerFifo"]);
    }

    #[test]
    fn test_admission_after_close() {
        let mut snapshot = healthy();
        snapshot.history.record(0, QueueOpKind::Close, None, 1, 2);
        snapshot.history.record(1, QueueOpKind::PutClosed, Some(9), 3, 4);
        assert!(violated(&snapshot).is_empty());

        snapshot.history.record(2, QueueOpKind::Put, Some(10), 5, 6);
        let results = QueuePropertyChecker::new(&snapshot).violations();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].property, "NoAdmissionAfterClose");
        let diagram = results[0]
            .counterexample
            .as_ref()
            .map(Counterexample::render_diagram)
            .unwrap_or_default();
        assert!(diagram.contains("close()"));
        assert!(diagram.contains("put(9) [CLOSED]"));
    }

    #[test]
    fn test_put_racing_close_is_allowed() {
        let mut snapshot = healthy();
        snapshot.history.record(1, QueueOpKind::Put, Some(3), 1, 4);
        snapshot.history.record(0, QueueOpKind::Close, None, 2, 3);
        assert!(violated(&snapshot).is_empty());
    }
}
