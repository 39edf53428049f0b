//! Complete work — the ascent step of the depth-first loop.
//!
//! A fiber completes once it has no unfinished children: host instances
//! are created (mount) or their prop diffs prepared (update), the finished
//! subtree's host nodes are attached beneath the new instance, and child
//! flags bubble into `subtree_flags` so commit can skip clean subtrees.

use tracing::trace;

use crate::error::Result;
use crate::fiber::{FiberFlags, FiberId, FiberTag, QueueSlot};
use crate::host::HostConfig;
use crate::sched::Clock;

use super::engine::Engine;

impl<H: HostConfig, C: Clock> Engine<H, C> {
    pub(crate) fn complete_work(&mut self, unit: FiberId) -> Result<()> {
        let tag = self.arena[unit].tag;
        trace!(?unit, ?tag, "complete_work");

        match tag {
            FiberTag::Root => {}

            FiberTag::HostText => {
                let new_text = self.arena[unit]
                    .pending_props
                    .as_text()
                    .unwrap_or_default()
                    .to_string();
                let current = self.arena[unit].alternate;
                let has_instance = self.arena[unit].state_node.is_some();

                if let (Some(cur), true) = (current, has_instance) {
                    let old_text = self.arena[cur].memoized_props.as_text().unwrap_or_default();
                    if old_text != new_text {
                        self.arena[unit].flags |= FiberFlags::UPDATE;
                    }
                } else {
                    let instance = self.host.create_text_instance(&new_text)?;
                    self.arena[unit].state_node = Some(instance);
                }
            }

            FiberTag::HostComponent => {
                let ty = self.host_type_of(unit);
                let new_props = self.props_of(unit);
                let current = self.arena[unit].alternate;
                let has_instance = self.arena[unit].state_node.is_some();

                if let (Some(cur), true) = (current, has_instance) {
                    // Update path: diff committed props against pending and
                    // stash the payload for commit.
                    let old_props = self.arena[cur]
                        .memoized_props
                        .as_props()
                        .cloned()
                        .unwrap_or_default();
                    let instance = self.arena[unit]
                        .state_node
                        .clone()
                        .expect("update path checked instance");
                    let payload = self.host.prepare_update(&instance, &ty, &old_props, &new_props);
                    if let Some(payload) = payload {
                        self.arena[unit].update_queue = QueueSlot::HostUpdate(payload);
                        self.arena[unit].flags |= FiberFlags::UPDATE;
                    }
                } else {
                    // Mount path: create the instance, hang the finished
                    // subtree's host nodes beneath it, apply initial props.
                    let instance = self.host.create_instance(&ty, &new_props)?;
                    self.append_all_children(&instance, unit);
                    self.arena[unit].state_node = Some(instance.clone());
                    self.host.finalize_initial_children(&instance, &ty, &new_props);
                }
            }

            FiberTag::FunctionComponent | FiberTag::Indeterminate => {}
        }

        self.bubble_properties(unit);
        Ok(())
    }

    /// Attach every host instance in `unit`'s finished subtree directly
    /// under `parent`, walking through non-host wrapper fibers but never
    /// into a host node's own children.
    fn append_all_children(&mut self, parent: &H::Instance, unit: FiberId) {
        let mut node = match self.arena[unit].child {
            Some(c) => c,
            None => return,
        };
        loop {
            if self.arena[node].is_host() {
                if let Some(instance) = self.arena[node].state_node.clone() {
                    self.host.append_initial_child(parent, &instance);
                }
            } else if let Some(child) = self.arena[node].child {
                node = child;
                continue;
            }

            if node == unit {
                return;
            }
            while self.arena[node].sibling.is_none() {
                match self.arena[node].parent {
                    None => return,
                    Some(p) if p == unit => return,
                    Some(p) => node = p,
                }
            }
            node = self.arena[node].sibling.expect("checked in loop");
        }
    }

    /// Accumulate child flags into `subtree_flags` for fast skipping.
    fn bubble_properties(&mut self, unit: FiberId) {
        let mut subtree = FiberFlags::empty();
        let mut child = self.arena[unit].child;
        while let Some(c) = child {
            subtree |= self.arena[c].subtree_flags | self.arena[c].flags;
            child = self.arena[c].sibling;
        }
        self.arena[unit].subtree_flags |= subtree;
    }
}
