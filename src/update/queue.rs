//! Lane-tagged update queues.
//!
//! A queue holds two segments: a `pending` segment with O(1) append from any
//! context, and a linear `base` segment representing work carried over from
//! a previous incomplete pass, folded from `base_state`.
//!
//! The fold contract: every update is applied exactly once, eventually, no
//! matter how often the render that processes it is interrupted and
//! restarted. An update whose lane is not part of the render is skipped but
//! re-recorded into the new base chain — and every update positioned after
//! a skipped one is retained as well (with its lane cleared if it was
//! already applied), because a future pass that redoes the skipped
//! predecessor must also redo everything after it to compute the same
//! result.

use crate::element::Children;
use crate::lanes::{Lane, Lanes};

/// An update that can live in an [`UpdateQueue`].
pub trait QueueUpdate: Clone {
    fn lane(&self) -> Lane;

    /// Clear the lane so the update is included in every later pass.
    /// Applied to already-processed updates that must be retained behind a
    /// skipped one.
    fn clear_lane(&mut self);
}

/// A per-node update queue over state `S` with update type `U`.
#[derive(Clone, Debug, Default)]
pub struct UpdateQueue<S, U> {
    /// State the base segment folds from.
    pub base_state: S,
    base: Vec<U>,
    pending: Vec<U>,
}

impl<S: Clone, U: QueueUpdate> UpdateQueue<S, U> {
    pub fn new(initial: S) -> Self {
        Self {
            base_state: initial,
            base: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Append an update to the pending segment.
    pub fn enqueue(&mut self, update: U) {
        self.pending.push(update);
    }

    pub fn has_work(&self) -> bool {
        !self.base.is_empty() || !self.pending.is_empty()
    }

    /// Move the pending segment onto the end of the base segment.
    ///
    /// Safe to call at any point before processing; an interrupted render
    /// that merged but never processed leaves the queue equivalent.
    pub fn merge_pending(&mut self) {
        self.base.append(&mut self.pending);
    }

    /// Fold the queue over `base_state` for the given render lanes.
    ///
    /// Returns the computed state and the lanes of every skipped update
    /// (the caller records them on the fiber so a later render picks them
    /// up). If nothing was skipped the computed state becomes the new base
    /// state and the base chain is cleared; otherwise the new base chain
    /// preserves the skipped updates and everything after them.
    pub fn process(
        &mut self,
        render_lanes: Lanes,
        mut apply: impl FnMut(&U, S) -> S,
    ) -> (S, Lanes) {
        self.merge_pending();

        if self.base.is_empty() {
            return (self.base_state.clone(), Lanes::NONE);
        }

        let mut new_state = self.base_state.clone();
        let mut new_base: Vec<U> = Vec::new();
        // Base state of the *next* pass: the state just before the first
        // skipped update.
        let mut new_base_state: Option<S> = None;
        let mut skipped_lanes = Lanes::NONE;

        for update in self.base.drain(..) {
            if !render_lanes.is_superset_of(update.lane()) {
                // Not selected for this render: re-record for a later one.
                if new_base.is_empty() {
                    new_base_state = Some(new_state.clone());
                }
                skipped_lanes = skipped_lanes.merge(update.lane());
                new_base.push(update);
            } else {
                if !new_base.is_empty() {
                    // Applied this pass, but positioned after a skipped
                    // update: retain with the lane cleared so the redo pass
                    // cannot skip it.
                    let mut clone = update.clone();
                    clone.clear_lane();
                    new_base.push(clone);
                }
                new_state = apply(&update, new_state);
            }
        }

        self.base_state = match new_base_state {
            Some(state) => state,
            None => new_state.clone(),
        };
        self.base = new_base;

        (new_state, skipped_lanes)
    }
}

// =============================================================================
// Root updates
// =============================================================================

/// A root-level update: render this payload.
#[derive(Clone)]
pub struct RootUpdate {
    pub lane: Lane,
    pub element: Children,
}

impl QueueUpdate for RootUpdate {
    fn lane(&self) -> Lane {
        self.lane
    }

    fn clear_lane(&mut self) {
        self.lane = Lanes::NONE;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Add {
        lane: Lane,
        amount: i64,
    }

    impl QueueUpdate for Add {
        fn lane(&self) -> Lane {
            self.lane
        }

        fn clear_lane(&mut self) {
            self.lane = Lanes::NONE;
        }
    }

    fn apply(u: &Add, s: i64) -> i64 {
        s + u.amount
    }

    #[test]
    fn test_fold_all_included() {
        let mut q: UpdateQueue<i64, Add> = UpdateQueue::new(0);
        for amount in [1, 2, 3] {
            q.enqueue(Add {
                lane: Lanes::SYNC,
                amount,
            });
        }
        let (state, skipped) = q.process(Lanes::SYNC, apply);
        assert_eq!(state, 6);
        assert!(skipped.is_none());
        // Base chain cleared, base state advanced.
        assert_eq!(q.base_state, 6);
        assert!(!q.has_work());
    }

    #[test]
    fn test_skip_retains_tail() {
        let mut q: UpdateQueue<i64, Add> = UpdateQueue::new(0);
        q.enqueue(Add { lane: Lanes::SYNC, amount: 1 });
        q.enqueue(Add { lane: Lanes::DEFAULT, amount: 10 });
        q.enqueue(Add { lane: Lanes::SYNC, amount: 2 });

        // Sync-only pass: the default update is skipped, and the sync
        // update behind it is applied *and* retained.
        let (state, skipped) = q.process(Lanes::SYNC, apply);
        assert_eq!(state, 3);
        assert_eq!(skipped, Lanes::DEFAULT);
        // Base state rolls back to just before the skipped update.
        assert_eq!(q.base_state, 1);

        // Follow-up pass including the default lane replays the tail.
        let (state, skipped) = q.process(Lanes::SYNC.merge(Lanes::DEFAULT), apply);
        assert_eq!(state, 13);
        assert!(skipped.is_none());
        assert_eq!(q.base_state, 13);
    }

    #[test]
    fn test_interrupted_pass_is_redoable() {
        // Simulates interruption: merge happens, processing never does.
        let mut q: UpdateQueue<i64, Add> = UpdateQueue::new(0);
        q.enqueue(Add { lane: Lanes::SYNC, amount: 5 });
        q.merge_pending();
        let (state, _) = q.process(Lanes::SYNC, apply);
        assert_eq!(state, 5);
    }

    #[test]
    fn test_empty_process_returns_base() {
        let mut q: UpdateQueue<i64, Add> = UpdateQueue::new(7);
        let (state, skipped) = q.process(Lanes::SYNC, apply);
        assert_eq!(state, 7);
        assert!(skipped.is_none());
    }
}
