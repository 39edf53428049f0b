//! Commit phase — atomic application of computed mutations.
//!
//! Commit always runs to completion once started: (a) mutation effects in
//! child-then-self order, observing delete-before-insert at each level;
//! (b) layout-class effects synchronously; (c) the atomic swap of the
//! root's current pointer to the finished generation; (d) rescheduling for
//! remaining lanes; (e) a deferred, lower-priority task for passive
//! effects.
//!
//! Teardown-before-setup is a tree-wide guarantee for both effect classes:
//! the mutation pass runs every layout destroy before the layout pass runs
//! any create, and the passive flush is a full unmount sweep followed by a
//! full mount sweep.

use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::fiber::{FiberFlags, FiberId, FiberTag, QueueSlot};
use crate::host::HostConfig;
use crate::lanes::{EventPriority, Lanes};
use crate::sched::{Clock, SchedulerPriority};
use crate::update::{EffectScope, EffectTags};
use crate::work::{Engine, RootPhase, TaskKind};

impl<H: HostConfig, C: Clock> Engine<H, C> {
    // =========================================================================
    // Commit root
    // =========================================================================

    pub(crate) fn commit_root(&mut self) -> Result<()> {
        let finished = self.arena[self.current_root]
            .alternate
            .ok_or(ReconcileError::MissingAlternate)?;
        debug!("commit_root");

        self.phase = RootPhase::Committing;
        // Commit runs at discrete priority: state changes triggered by
        // layout effects inherit maximal urgency.
        let previous_priority = self.current_update_priority;
        self.current_update_priority = EventPriority::Discrete.lane();
        self.batch_depth += 1;

        // Retire the render bookkeeping before effects can schedule.
        self.wip = None;
        self.wip_root_active = false;
        self.wip_render_lanes = Lanes::NONE;
        self.callback_task = None;
        self.callback_priority = Lanes::NONE;
        self.fresh_fibers.clear();

        // Remaining work: skipped-update lanes recorded in the finished
        // tree, plus anything staged since the render started.
        let remaining = self.arena.collect_lanes(finished).merge(self.staged_lanes);
        self.pending_lanes = remaining;
        self.expirations.retain(remaining);
        self.expired_lanes = self.expired_lanes.intersection(remaining);

        let (flags, subtree_flags) = {
            let f = &self.arena[finished];
            (f.flags, f.subtree_flags)
        };

        // Passive effects run strictly after this commit's mutations are
        // visible, as their own lower-priority deferred task — never inline.
        if (flags | subtree_flags).contains(FiberFlags::PASSIVE) && !self.passive_pending {
            self.passive_pending = true;
            let now = self.clock.now();
            self.tasks.push(SchedulerPriority::Normal, TaskKind::FlushPassive, now);
            debug!("scheduled passive effect flush");
        }

        if (flags | subtree_flags).intersects(FiberFlags::MUTATION_MASK) {
            self.commit_mutation_effects(finished);
            self.commit_layout_on_fiber(finished);
        }

        // The atomic act: the finished generation becomes current.
        self.current_root = finished;

        self.current_update_priority = previous_priority;
        self.phase = RootPhase::Idle;

        // Dispatches staged by layout effects feed the next scheduling pass.
        let drained = self.apply_pending_dispatches();
        self.batch_depth -= 1;
        drained?;
        self.ensure_root_is_scheduled(self.clock.now());
        self.maybe_flush_sync()
    }

    // =========================================================================
    // Mutation pass
    // =========================================================================

    fn commit_mutation_effects(&mut self, fiber: FiberId) {
        // Deletions first, so insertions at this level see a consistent
        // partial tree.
        let deletions = std::mem::take(&mut self.arena[fiber].deletions);
        for deleted in deletions {
            self.commit_deletion(fiber, deleted);
        }

        if self.arena[fiber].subtree_flags.intersects(FiberFlags::MUTATION_MASK) {
            let mut child = self.arena[fiber].child;
            while let Some(c) = child {
                self.commit_mutation_effects(c);
                child = self.arena[c].sibling;
            }
        }

        if self.arena[fiber].flags.contains(FiberFlags::PLACEMENT) {
            self.commit_placement(fiber);
            self.arena[fiber].flags -= FiberFlags::PLACEMENT;
        }

        match self.arena[fiber].tag {
            FiberTag::FunctionComponent | FiberTag::Indeterminate => {
                if self.arena[fiber].flags.contains(FiberFlags::UPDATE) {
                    // Layout teardown happens here, during mutation, so
                    // every destroy in the tree precedes any create.
                    self.run_effect_list_unmount(
                        fiber,
                        EffectTags::HAS_EFFECT | EffectTags::LAYOUT,
                    );
                }
            }
            FiberTag::HostComponent => {
                if self.arena[fiber].flags.contains(FiberFlags::UPDATE) {
                    self.commit_host_update(fiber);
                }
            }
            FiberTag::HostText => {
                if self.arena[fiber].flags.contains(FiberFlags::UPDATE) {
                    self.commit_text_update(fiber);
                }
            }
            FiberTag::Root => {}
        }
    }

    fn commit_host_update(&mut self, fiber: FiberId) {
        let payload = match std::mem::take(&mut self.arena[fiber].update_queue) {
            QueueSlot::HostUpdate(payload) => Some(payload),
            other => {
                self.arena[fiber].update_queue = other;
                None
            }
        };
        let (Some(payload), Some(instance)) = (payload, self.arena[fiber].state_node.clone())
        else {
            return;
        };
        let ty = self.host_type_of(fiber);
        let new_props = self.memoized_props_of(fiber);
        let old_props = match self.arena[fiber].alternate {
            Some(alt) => self.arena[alt]
                .memoized_props
                .as_props()
                .cloned()
                .unwrap_or_else(|| new_props.clone()),
            None => new_props.clone(),
        };
        self.host
            .commit_update(&instance, &payload, &ty, &old_props, &new_props);
    }

    fn commit_text_update(&mut self, fiber: FiberId) {
        let Some(instance) = self.arena[fiber].state_node.clone() else {
            return;
        };
        let new_text = self.arena[fiber]
            .memoized_props
            .as_text()
            .unwrap_or_default()
            .to_string();
        let old_text = self.arena[fiber]
            .alternate
            .and_then(|alt| self.arena[alt].memoized_props.as_text().map(String::from))
            .unwrap_or_default();
        self.host.commit_text_update(&instance, &old_text, &new_text);
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Attach an inserted (or moved) node under the nearest ancestor that
    /// owns a real host instance, before the nearest later sibling with a
    /// stable instance, or appended when none exists.
    fn commit_placement(&mut self, fiber: FiberId) {
        let Some(parent_fiber) = self.get_host_parent_fiber(fiber) else {
            return;
        };
        let parent_instance = match self.arena[parent_fiber].tag {
            FiberTag::Root => Some(self.container.clone()),
            _ => self.arena[parent_fiber].state_node.clone(),
        };
        let Some(parent_instance) = parent_instance else {
            return;
        };
        let before = self.get_host_sibling(fiber);
        self.insert_or_append_placement_node(fiber, before.as_ref(), &parent_instance);
    }

    fn get_host_parent_fiber(&self, fiber: FiberId) -> Option<FiberId> {
        let mut node = self.arena[fiber].parent;
        while let Some(n) = node {
            if matches!(self.arena[n].tag, FiberTag::HostComponent | FiberTag::Root) {
                return Some(n);
            }
            node = self.arena[n].parent;
        }
        None
    }

    /// Find the anchor instance: the nearest later sibling that already has
    /// a stable host instance, walking through non-host wrappers. A node
    /// that itself awaits placement is not stable.
    fn get_host_sibling(&self, fiber: FiberId) -> Option<H::Instance> {
        let mut node = fiber;
        'siblings: loop {
            while self.arena[node].sibling.is_none() {
                match self.arena[node].parent {
                    None => return None,
                    Some(p)
                        if matches!(
                            self.arena[p].tag,
                            FiberTag::HostComponent | FiberTag::Root
                        ) =>
                    {
                        return None;
                    }
                    Some(p) => node = p,
                }
            }
            node = self.arena[node].sibling.expect("sibling checked above");

            while !self.arena[node].is_host() {
                if self.arena[node].flags.contains(FiberFlags::PLACEMENT) {
                    continue 'siblings;
                }
                match self.arena[node].child {
                    None => continue 'siblings,
                    Some(child) => node = child,
                }
            }

            if !self.arena[node].flags.contains(FiberFlags::PLACEMENT) {
                return self.arena[node].state_node.clone();
            }
        }
    }

    /// Insert the first layer of real host nodes under `fiber` (which may
    /// itself be a non-host wrapper).
    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        before: Option<&H::Instance>,
        parent: &H::Instance,
    ) {
        if self.arena[fiber].is_host() {
            if let Some(instance) = self.arena[fiber].state_node.clone() {
                match before {
                    Some(anchor) => self.host.insert_before(parent, &instance, anchor),
                    None => self.host.append_child(parent, &instance),
                }
            }
            return;
        }
        let mut child = self.arena[fiber].child;
        while let Some(c) = child {
            self.insert_or_append_placement_node(c, before, parent);
            child = self.arena[c].sibling;
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Tear down a removed subtree: unmount cleanup for every descendant,
    /// then exactly one detach at the subtree's host root. The fibers of
    /// both generations are freed afterwards.
    fn commit_deletion(&mut self, parent: FiberId, deleted: FiberId) {
        let host_parent = self.find_host_parent_instance(parent);
        self.commit_deletion_on_fiber(host_parent, deleted);
        self.arena.free_subtree(deleted);
    }

    fn find_host_parent_instance(&self, from: FiberId) -> Option<H::Instance> {
        let mut node = Some(from);
        while let Some(n) = node {
            match self.arena[n].tag {
                FiberTag::HostComponent => return self.arena[n].state_node.clone(),
                FiberTag::Root => return Some(self.container.clone()),
                _ => node = self.arena[n].parent,
            }
        }
        None
    }

    fn commit_deletion_on_fiber(&mut self, host_parent: Option<H::Instance>, fiber: FiberId) {
        match self.arena[fiber].tag {
            FiberTag::HostComponent | FiberTag::HostText => {
                // Descendants tear down without their own detach (the
                // subtree root's removal takes them along).
                self.traverse_deletion(None, fiber);
                if let Some(parent) = &host_parent {
                    if let Some(instance) = self.arena[fiber].state_node.clone() {
                        self.host.remove_child(parent, &instance);
                    }
                }
            }
            FiberTag::FunctionComponent | FiberTag::Indeterminate => {
                // All effect classes tear down on unmount.
                self.run_unmount_all(fiber);
                self.traverse_deletion(host_parent, fiber);
            }
            FiberTag::Root => {
                self.traverse_deletion(host_parent, fiber);
            }
        }
    }

    fn traverse_deletion(&mut self, host_parent: Option<H::Instance>, parent: FiberId) {
        let mut child = self.arena[parent].child;
        while let Some(c) = child {
            self.commit_deletion_on_fiber(host_parent.clone(), c);
            child = self.arena[c].sibling;
        }
    }

    // =========================================================================
    // Layout effects
    // =========================================================================

    fn commit_layout_on_fiber(&mut self, fiber: FiberId) {
        if self.arena[fiber].subtree_flags.intersects(FiberFlags::LAYOUT_MASK) {
            let mut child = self.arena[fiber].child;
            while let Some(c) = child {
                self.commit_layout_on_fiber(c);
                child = self.arena[c].sibling;
            }
        }
        if self.arena[fiber].tag == FiberTag::FunctionComponent
            && self.arena[fiber].flags.intersects(FiberFlags::LAYOUT_MASK)
        {
            self.run_effect_list_mount(fiber, EffectTags::HAS_EFFECT | EffectTags::LAYOUT);
        }
    }

    // =========================================================================
    // Passive effects
    // =========================================================================

    /// Run the deferred passive flush: a tree-wide destroy sweep, then a
    /// tree-wide create sweep.
    pub fn flush_passive_effects(&mut self) -> Result<()> {
        if !self.passive_pending {
            return Ok(());
        }
        debug!("flush_passive_effects");
        self.passive_pending = false;
        self.batch_depth += 1;
        let root = self.current_root;
        self.commit_passive_unmount_on_fiber(root);
        self.commit_passive_mount_on_fiber(root);
        let drained = self.apply_pending_dispatches();
        self.batch_depth -= 1;
        drained?;
        self.maybe_flush_sync()
    }

    fn commit_passive_unmount_on_fiber(&mut self, fiber: FiberId) {
        if self.arena[fiber].subtree_flags.contains(FiberFlags::PASSIVE) {
            let mut child = self.arena[fiber].child;
            while let Some(c) = child {
                self.commit_passive_unmount_on_fiber(c);
                child = self.arena[c].sibling;
            }
        }
        if self.arena[fiber].tag == FiberTag::FunctionComponent
            && self.arena[fiber].flags.contains(FiberFlags::PASSIVE)
        {
            self.run_effect_list_unmount(fiber, EffectTags::HAS_EFFECT | EffectTags::PASSIVE);
        }
    }

    fn commit_passive_mount_on_fiber(&mut self, fiber: FiberId) {
        if self.arena[fiber].subtree_flags.contains(FiberFlags::PASSIVE) {
            let mut child = self.arena[fiber].child;
            while let Some(c) = child {
                self.commit_passive_mount_on_fiber(c);
                child = self.arena[c].sibling;
            }
        }
        if self.arena[fiber].tag == FiberTag::FunctionComponent
            && self.arena[fiber].flags.contains(FiberFlags::PASSIVE)
        {
            self.run_effect_list_mount(fiber, EffectTags::HAS_EFFECT | EffectTags::PASSIVE);
        }
    }

    // =========================================================================
    // Effect list runners
    // =========================================================================

    /// Run `destroy` for every effect on `fiber` whose tag contains all of
    /// `mask`, in call order. Dispatches staged by the callbacks accumulate
    /// on the engine.
    fn run_effect_list_unmount(&mut self, fiber: FiberId, mask: EffectTags) {
        let count = self.arena[fiber].effects().map(|e| e.len()).unwrap_or(0);
        for i in 0..count {
            let destroy = match self.arena[fiber].effects_mut() {
                Some(effects) if effects[i].tag.contains(mask) => effects[i].destroy.take(),
                _ => None,
            };
            if let Some(destroy) = destroy {
                let mut scope = EffectScope::new();
                destroy(&mut scope);
                self.pending_dispatches.extend(scope.drain());
            }
        }
    }

    /// Run `create` for every matching effect, storing the returned
    /// teardown for the next cycle.
    fn run_effect_list_mount(&mut self, fiber: FiberId, mask: EffectTags) {
        let count = self.arena[fiber].effects().map(|e| e.len()).unwrap_or(0);
        for i in 0..count {
            let create = match self.arena[fiber].effects() {
                Some(effects) if effects[i].tag.contains(mask) => Some(effects[i].create.clone()),
                _ => None,
            };
            if let Some(create) = create {
                let mut scope = EffectScope::new();
                let cleanup = create(&mut scope);
                if let Some(effects) = self.arena[fiber].effects_mut() {
                    effects[i].destroy = cleanup;
                }
                self.pending_dispatches.extend(scope.drain());
            }
        }
    }

    /// Unmount teardown: every effect with a live destroy, regardless of
    /// class or whether it had work this commit.
    fn run_unmount_all(&mut self, fiber: FiberId) {
        let count = self.arena[fiber].effects().map(|e| e.len()).unwrap_or(0);
        for i in 0..count {
            let destroy = self
                .arena[fiber]
                .effects_mut()
                .and_then(|effects| effects[i].destroy.take());
            if let Some(destroy) = destroy {
                let mut scope = EffectScope::new();
                destroy(&mut scope);
                self.pending_dispatches.extend(scope.drain());
            }
        }
    }
}
