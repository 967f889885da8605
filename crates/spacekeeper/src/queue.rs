use crate::workspace::WorkSpace;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deterministic total order over plot jobs, lower sorts first.
///
/// Lower state rank first, then larger bit length (plots with more work
/// outstanding progress first), then smaller ordinal; the work space id
/// breaks remaining ties so the order is total.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct Priority {
    state_rank: u8,
    bit_length_inverted: u8,
    ordinal: u32,
    sid: String,
}

/// One scheduled plot job.
///
/// `would_mine` steers which state the work space lands in once plotting
/// completes; it is shared so action verbs can flip it while the job is in
/// flight.
#[derive(Debug, Clone)]
pub struct QueuedWorkSpace {
    ws: Arc<WorkSpace>,
    would_mine: Arc<AtomicBool>,
    priority: Priority,
}

impl QueuedWorkSpace {
    /// Creates a job for `ws`, capturing its current priority.
    pub fn new(ws: Arc<WorkSpace>, would_mine: bool) -> Self {
        let priority = Priority {
            state_rank: ws.state().rank(),
            bit_length_inverted: !ws.id().bit_length().get(),
            ordinal: ws.id().ordinal(),
            sid: ws.sid(),
        };
        Self {
            ws,
            would_mine: Arc::new(AtomicBool::new(would_mine)),
            priority,
        }
    }

    /// The work space this job plots.
    pub fn work_space(&self) -> &Arc<WorkSpace> {
        &self.ws
    }

    /// Whether completion should land in `mining` instead of `ready`.
    pub fn would_mine(&self) -> bool {
        self.would_mine.load(Ordering::Acquire)
    }

    /// Overrides the landing state of this job, also mid-flight.
    pub fn set_would_mine(&self, would_mine: bool) {
        self.would_mine.store(would_mine, Ordering::Release);
    }

    fn sid(&self) -> &str {
        &self.priority.sid
    }
}

/// Priority queue of pending plot jobs consumed by the plotter loop.
///
/// Also tracks the *popped* job, the single in-flight plot which stays
/// logically at the head of the queue until it finishes.
#[derive(Debug, Default)]
pub struct PlotterQueue {
    pending: BTreeMap<Priority, QueuedWorkSpace>,
    by_sid: HashMap<String, Priority>,
    popped: Option<QueuedWorkSpace>,
}

impl PlotterQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a job; a job for the same work space that is already
    /// pending wins, keeping at most one entry per work space.
    pub fn push(&mut self, qws: QueuedWorkSpace) {
        if self.by_sid.contains_key(qws.sid()) {
            return;
        }
        self.by_sid
            .insert(qws.sid().to_string(), qws.priority.clone());
        self.pending.insert(qws.priority.clone(), qws);
    }

    /// Takes the highest-priority job and records it as the popped head.
    pub fn pop(&mut self) -> Option<QueuedWorkSpace> {
        let key = self.pending.keys().next().cloned()?;
        let qws = self.pending.remove(&key).expect("key taken above; qed");
        self.by_sid.remove(qws.sid());
        self.popped.replace(qws.clone());
        Some(qws)
    }

    /// The in-flight job, if any.
    pub fn popped(&self) -> Option<&QueuedWorkSpace> {
        self.popped.as_ref()
    }

    /// Clears the in-flight job once plotting finished or was abandoned.
    pub fn finish_popped(&mut self) {
        self.popped.take();
    }

    /// Removes the pending job for `sid`, returning whether one was removed.
    /// The popped head is not affected.
    pub fn delete(&mut self, sid: &str) -> bool {
        match self.by_sid.remove(sid) {
            Some(priority) => self.pending.remove(&priority).is_some(),
            None => false,
        }
    }

    /// Drops every pending job, keeping the popped head.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.by_sid.clear();
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlot;
    use crate::space_id::SpaceId;
    use crate::workspace::WorkSpaceState;
    use poc_primitives::{BitLength, PublicKey};
    use std::time::Duration;

    fn work_space(ordinal: u32, bit_length: u8, state: WorkSpaceState) -> Arc<WorkSpace> {
        let id = SpaceId::new(
            ordinal,
            PublicKey::from([ordinal as u8; 32]),
            BitLength::new(bit_length).unwrap(),
        );
        let ws = Arc::new(WorkSpace::new(
            id,
            MockPlot::new(id, Duration::from_millis(1)),
        ));
        ws.set_state(state);
        ws
    }

    #[test]
    fn orders_by_state_then_bit_length_then_ordinal() {
        let mut queue = PlotterQueue::new();
        queue.push(QueuedWorkSpace::new(
            work_space(0, 24, WorkSpaceState::Ready),
            false,
        ));
        queue.push(QueuedWorkSpace::new(
            work_space(3, 24, WorkSpaceState::Registered),
            false,
        ));
        queue.push(QueuedWorkSpace::new(
            work_space(2, 28, WorkSpaceState::Registered),
            false,
        ));
        queue.push(QueuedWorkSpace::new(
            work_space(1, 28, WorkSpaceState::Registered),
            false,
        ));

        let popped_ordinals = std::iter::from_fn(|| queue.pop())
            .map(|qws| qws.work_space().id().ordinal())
            .collect::<Vec<_>>();
        // registered before ready, larger bit length first, then ordinal
        assert_eq!(popped_ordinals, vec![1, 2, 3, 0]);
    }

    #[test]
    fn push_dedups_by_work_space() {
        let mut queue = PlotterQueue::new();
        let ws = work_space(5, 26, WorkSpaceState::Registered);
        queue.push(QueuedWorkSpace::new(ws.clone(), false));
        queue.push(QueuedWorkSpace::new(ws, true));
        assert_eq!(queue.len(), 1);
        // the first job won
        assert!(!queue.pop().unwrap().would_mine());
    }

    #[test]
    fn delete_only_touches_pending_jobs() {
        let mut queue = PlotterQueue::new();
        let first = work_space(1, 24, WorkSpaceState::Registered);
        let second = work_space(2, 24, WorkSpaceState::Registered);
        queue.push(QueuedWorkSpace::new(first.clone(), false));
        queue.push(QueuedWorkSpace::new(second.clone(), false));

        let in_flight = queue.pop().unwrap();
        assert_eq!(in_flight.work_space().id().ordinal(), 1);
        assert!(!queue.delete(&first.sid()));
        assert!(queue.delete(&second.sid()));
        assert!(queue.is_empty());
        assert!(queue.popped().is_some());
    }

    #[test]
    fn would_mine_is_shared_with_the_popped_head() {
        let mut queue = PlotterQueue::new();
        queue.push(QueuedWorkSpace::new(
            work_space(1, 24, WorkSpaceState::Registered),
            false,
        ));
        let job = queue.pop().unwrap();
        queue.popped().unwrap().set_would_mine(true);
        assert!(job.would_mine());
    }

    #[test]
    fn reset_clears_pending_only() {
        let mut queue = PlotterQueue::new();
        queue.push(QueuedWorkSpace::new(
            work_space(1, 24, WorkSpaceState::Registered),
            false,
        ));
        queue.pop();
        queue.push(QueuedWorkSpace::new(
            work_space(2, 24, WorkSpaceState::Registered),
            false,
        ));
        queue.reset();
        assert!(queue.is_empty());
        assert!(queue.popped().is_some());
        queue.finish_popped();
        assert!(queue.popped().is_none());
    }
}
