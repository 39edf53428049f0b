//! Begin work — the descent step of the depth-first loop.
//!
//! Builds a fiber's child list (diffing against the committed generation's
//! children) and advances into the first child. Each fiber's pending lanes
//! are cleared on entry; whatever its update queues skip is re-recorded by
//! the queue fold.

use tracing::trace;

use crate::element::{Children, ElementType, Props};
use crate::error::{ReconcileError, Result};
use crate::fiber::{FiberId, FiberState, FiberTag, QueueSlot, RootMemo};
use crate::host::HostConfig;
use crate::lanes::Lanes;
use crate::reconcile::ChildReconciler;
use crate::sched::Clock;
use crate::update::{RenderCx, UpdateQueue};

use super::engine::Engine;

impl<H: HostConfig, C: Clock> Engine<H, C> {
    /// Build `unit`'s children; returns the next fiber to descend into.
    pub(crate) fn begin_work(&mut self, unit: FiberId) -> Result<Option<FiberId>> {
        let current = self.arena[unit].alternate;
        // The lanes this render services retire from both generations;
        // whatever a queue fold skips is re-recorded below. Lanes outside
        // the render target stay put on the committed generation.
        self.arena[unit].lanes = Lanes::NONE;
        if let Some(cur) = current {
            let lanes = self.arena[cur].lanes.remove(self.wip_render_lanes);
            self.arena[cur].lanes = lanes;
        }
        let tag = self.arena[unit].tag;
        trace!(?unit, ?tag, "begin_work");

        match tag {
            FiberTag::Root => self.update_host_root(current, unit),
            FiberTag::HostComponent => self.update_host_component(current, unit),
            FiberTag::HostText => Ok(None),
            FiberTag::FunctionComponent | FiberTag::Indeterminate => {
                self.update_function_component(current, unit)
            }
        }
    }

    /// The root folds its update queue to find the render payload, then
    /// reconciles it as its single child list.
    fn update_host_root(&mut self, current: Option<FiberId>, unit: FiberId) -> Result<Option<FiberId>> {
        let current = current.ok_or(ReconcileError::MissingAlternate)?;
        let render_lanes = self.wip_render_lanes;

        let mut queue = match std::mem::take(&mut self.arena[unit].update_queue) {
            QueueSlot::Root(queue) => queue,
            _ => {
                // No update ever enqueued: re-render the committed payload.
                let element = self
                    .arena[unit]
                    .root_memo()
                    .map(|m| m.element.clone())
                    .unwrap_or_default();
                UpdateQueue::new(element)
            }
        };

        let (element, remaining) = queue.process(render_lanes, |update, _state| update.element.clone());
        self.arena[unit].update_queue = QueueSlot::Root(queue);
        self.arena[unit].memoized_state = FiberState::Root(RootMemo {
            element: element.clone(),
        });
        let lanes = self.arena[unit].lanes.merge(remaining);
        self.arena[unit].lanes = lanes;

        let current_first = self.arena[current].child;
        self.reconcile_children(Some(current), unit, current_first, &element);
        Ok(self.arena[unit].child)
    }

    /// Host components reconcile their props' children — unless the host
    /// claims the single text child as direct text content, in which case
    /// no child fiber is materialized at all.
    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        unit: FiberId,
    ) -> Result<Option<FiberId>> {
        let props = self.arena[unit]
            .pending_props
            .as_props()
            .cloned()
            .unwrap_or_default();
        let ty = self.host_type_of(unit);

        let children = if self.host.should_set_text_content(&ty, &props) {
            Children::None
        } else {
            props.children.clone()
        };

        let current_first = current.and_then(|c| self.arena[c].child);
        self.reconcile_children(current, unit, current_first, &children);
        Ok(self.arena[unit].child)
    }

    /// Function components render with hooks; their returned children are
    /// reconciled. An `Indeterminate` fiber resolves to `FunctionComponent`
    /// on its first pass here.
    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        unit: FiberId,
    ) -> Result<Option<FiberId>> {
        let render_lanes = self.wip_render_lanes;
        let props = self.arena[unit]
            .pending_props
            .as_props()
            .cloned()
            .unwrap_or_default();
        let Some(ElementType::Component(component)) = self.arena[unit].ty.clone() else {
            unreachable!("function fiber without a component type")
        };

        let current_data = current.and_then(|c| {
            self.arena[c].hooks().map(|hooks| {
                let effects = self.arena[c].effects().map(|e| e.to_vec()).unwrap_or_default();
                (hooks.to_vec(), effects)
            })
        });

        // Fresh effect list for this render.
        self.arena[unit].update_queue = QueueSlot::None;

        let mut cx = RenderCx::new(unit, render_lanes, current_data);
        let children = (component.render)(&mut cx, &props);
        let output = cx.finish();

        // Write the merged (unprocessed) hook queues back to the committed
        // generation so an interrupted or aborted render redoes the same
        // updates without losing any.
        if let (Some(c), Some(current_hooks)) = (current, output.current_hooks) {
            self.arena[c].memoized_state = FiberState::Hooks(current_hooks);
        }
        if let Some(error) = output.error {
            return Err(error);
        }

        let node = &mut self.arena[unit];
        node.memoized_state = FiberState::Hooks(output.hooks);
        if !output.effects.is_empty() {
            node.update_queue = QueueSlot::Effects(output.effects);
        }
        node.flags |= output.flags;
        node.lanes = node.lanes.merge(output.remaining_lanes);
        if node.tag == FiberTag::Indeterminate {
            node.tag = FiberTag::FunctionComponent;
        }

        let current_first = current.and_then(|c| self.arena[c].child);
        self.reconcile_children(current, unit, current_first, &children);
        Ok(self.arena[unit].child)
    }

    /// Diff the old child chain against the new description. Side-effect
    /// tagging is active only when this position has a committed
    /// counterpart; a first-time subtree is built untagged and appended as
    /// one block at commit.
    fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        unit: FiberId,
        current_first: Option<FiberId>,
        children: &Children,
    ) {
        let track_side_effects = current.is_some();
        let first = ChildReconciler::new(&mut self.arena, &mut self.fresh_fibers, track_side_effects)
            .reconcile(unit, current_first, children);
        self.arena[unit].child = first;
    }

    pub(crate) fn host_type_of(&self, unit: FiberId) -> String {
        match &self.arena[unit].ty {
            Some(ElementType::Host(ty)) => ty.clone(),
            _ => String::new(),
        }
    }

    pub(crate) fn props_of(&self, unit: FiberId) -> Props {
        self.arena[unit]
            .pending_props
            .as_props()
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn memoized_props_of(&self, unit: FiberId) -> Props {
        self.arena[unit]
            .memoized_props
            .as_props()
            .cloned()
            .unwrap_or_default()
    }
}
