//! Pending-task store and per-group statistics.

use std::{
    any::Any,
    collections::{BTreeMap, BinaryHeap},
};

use millrace_util::containers::HashMap;

use crate::task::ScheduledTask;

/// Reserved group accounting the time workers spend waiting for work.
pub(crate) const WAIT_GROUP: &str = "__WAIT_FOR_TASKS__";

/// Per-group execution counters.
///
/// At every quiescent point `submitted == completed + queued + cancelled`.
/// A task counts as queued from submission until its closure has returned,
/// so the count covers both pending and currently running tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskStat {
    pub submitted: usize,
    pub queued: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Total wall-clock seconds spent inside closures of this group.
    pub cpu_time: f64,
}

/// Everything guarded by the scheduler's queue lock: the pending heap, the
/// per-group statistics and the per-worker slot labels. User code must
/// never run while this is locked.
#[derive(Debug)]
pub(crate) struct QueueState {
    pending: BinaryHeap<ScheduledTask>,
    stats: HashMap<String, TaskStat>,
    pub(crate) worker_slots: Vec<Option<String>>,
}

impl QueueState {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            pending: BinaryHeap::new(),
            stats: HashMap::default(),
            worker_slots: vec![None; num_workers],
        }
    }

    pub(crate) fn push(&mut self, task: ScheduledTask) {
        let stat = self.stats.entry_ref(task.group.as_str()).or_default();
        stat.submitted += 1;
        stat.queued += 1;
        self.pending.push(task);
    }

    pub(crate) fn pop_top(&mut self) -> Option<ScheduledTask> {
        self.pending.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending task matching the predicate and returns the
    /// number of dropped tasks.
    pub(crate) fn rebuild_filter(
        &mut self,
        pred: &dyn Fn(&str, Option<&(dyn Any + Send)>) -> bool,
    ) -> usize {
        let Self { pending, stats, .. } = self;
        let mut dropped = 0;
        pending.retain(|task| {
            if pred(&task.group, task.param.as_deref()) {
                if let Some(stat) = stats.get_mut(&task.group) {
                    stat.queued -= 1;
                    stat.cancelled += 1;
                }
                dropped += 1;
                false
            } else {
                true
            }
        });
        dropped
    }

    pub(crate) fn record_wait(&mut self, seconds: f64) {
        self.stats.entry_ref(WAIT_GROUP).or_default().cpu_time += seconds;
    }

    /// Returns false when the group has no statistics entry, which would
    /// mean the task was never pushed through this queue.
    pub(crate) fn record_completion(&mut self, group: &str, seconds: f64) -> bool {
        match self.stats.get_mut(group) {
            Some(stat) => {
                stat.queued -= 1;
                stat.completed += 1;
                stat.cpu_time += seconds;
                true
            }
            None => false,
        }
    }

    pub(crate) fn total_queued(&self) -> usize {
        self.stats.values().map(|stat| stat.queued).sum()
    }

    pub(crate) fn group_queued(&self, group: &str) -> usize {
        self.stats.get(group).map_or(0, |stat| stat.queued)
    }

    pub(crate) fn group_stats(&self, group: &str) -> Option<TaskStat> {
        self.stats.get(group).copied()
    }

    pub(crate) fn stats(&self) -> &HashMap<String, TaskStat> {
        &self.stats
    }

    /// Count of busy workers per slot label, name-ordered for reporting.
    pub(crate) fn active_by_group(&self) -> BTreeMap<String, usize> {
        let mut active = BTreeMap::new();
        for slot in self.worker_slots.iter().flatten() {
            *active.entry(slot.clone()).or_insert(0) += 1;
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> QueueState {
        QueueState::new(2)
    }

    #[test]
    fn push_updates_group_counters() {
        let mut state = queue();
        state.push(ScheduledTask::new("a", 1, || Ok(())));
        state.push(ScheduledTask::new("a", 2, || Ok(())));
        state.push(ScheduledTask::new("b", 3, || Ok(())));

        let a = state.group_stats("a").unwrap();
        assert_eq!((a.submitted, a.queued, a.completed), (2, 2, 0));
        assert_eq!(state.group_queued("b"), 1);
        assert_eq!(state.total_queued(), 3);
    }

    #[test]
    fn pop_returns_highest_priority_first() {
        let mut state = queue();
        state.push(ScheduledTask::new("a", 1, || Ok(())));
        state.push(ScheduledTask::new("a", 5, || Ok(())));
        state.push(ScheduledTask::new("a", 3, || Ok(())));

        assert_eq!(state.pop_top().unwrap().priority, 5);
        assert_eq!(state.pop_top().unwrap().priority, 3);
        assert_eq!(state.pop_top().unwrap().priority, 1);
        assert!(state.pop_top().is_none());
    }

    #[test]
    fn completion_keeps_the_invariant() {
        let mut state = queue();
        state.push(ScheduledTask::new("a", 1, || Ok(())));
        state.push(ScheduledTask::new("a", 2, || Ok(())));
        let _task = state.pop_top().unwrap();
        assert!(state.record_completion("a", 0.25));

        let stat = state.group_stats("a").unwrap();
        assert_eq!(
            stat.submitted,
            stat.completed + stat.queued + stat.cancelled
        );
        assert_eq!(stat.completed, 1);
        assert_eq!(stat.cpu_time, 0.25);
    }

    #[test]
    fn completion_of_unknown_group_is_reported() {
        let mut state = queue();
        assert!(!state.record_completion("missing", 0.0));
    }

    #[test]
    fn rebuild_filter_drops_matches_and_counts_them() {
        let mut state = queue();
        for idx in 0..10 {
            state.push(ScheduledTask::with_param("a", idx, || Ok(()), idx % 2 == 0));
        }
        let dropped = state.rebuild_filter(&|group, param| {
            group == "a"
                && param
                    .and_then(|param| param.downcast_ref::<bool>())
                    .copied()
                    .unwrap_or(false)
        });
        assert_eq!(dropped, 5);

        let stat = state.group_stats("a").unwrap();
        assert_eq!((stat.queued, stat.cancelled), (5, 5));
        assert_eq!(
            stat.submitted,
            stat.completed + stat.queued + stat.cancelled
        );
        // The survivors still pop in priority order.
        assert_eq!(state.pop_top().unwrap().priority, 9);
    }

    #[test]
    fn rebuild_filter_on_empty_queue_drops_nothing() {
        let mut state = queue();
        assert_eq!(state.rebuild_filter(&|_, _| true), 0);
    }

    #[test]
    fn active_by_group_counts_slot_labels() {
        let mut state = queue();
        state.worker_slots[0] = Some("a".to_owned());
        state.worker_slots[1] = Some("a".to_owned());
        let active = state.active_by_group();
        assert_eq!(active["a"], 2);
    }
}
