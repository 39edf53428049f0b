//! Fiber arena — slotmap-backed storage addressed by opaque handles.
//!
//! All structural edges between fibers are `FiberId` lookups into one arena,
//! so cross-links (`alternate`, `parent`, `sibling`) never need cycle
//! management. The arena also implements the double-buffer pairing:
//! [`FiberArena::clone_for_work`] produces (or refreshes) a node's
//! counterpart in the work-in-progress generation.

use std::ops::{Index, IndexMut};

use slotmap::{new_key_type, SlotMap};

use crate::element::{Element, ElementType};
use crate::lanes::Lanes;

use super::node::{Fiber, FiberFlags, FiberProps, FiberTag};

new_key_type! {
    /// Opaque handle to a fiber in the arena.
    pub struct FiberId;
}

/// Arena of fiber nodes for one root (both buffer generations).
pub struct FiberArena<I> {
    nodes: SlotMap<FiberId, Fiber<I>>,
}

impl<I: Clone> FiberArena<I> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber<I>> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<I>> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn insert(&mut self, fiber: Fiber<I>) -> FiberId {
        self.nodes.insert(fiber)
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create the root fiber for a container.
    pub fn create_host_root(&mut self, container: I) -> FiberId {
        let mut fiber = Fiber::new(FiberTag::Root, FiberProps::None, None);
        fiber.state_node = Some(container);
        self.insert(fiber)
    }

    /// Create a fiber from an element description. Host types become
    /// `HostComponent`; components start `Indeterminate` until first
    /// rendered.
    pub fn create_from_element(&mut self, element: &Element) -> FiberId {
        let tag = match element.ty {
            ElementType::Host(_) => FiberTag::HostComponent,
            ElementType::Component(_) => FiberTag::Indeterminate,
        };
        let mut fiber = Fiber::new(
            tag,
            FiberProps::Element(element.props.clone()),
            element.key.clone(),
        );
        fiber.ty = Some(element.ty.clone());
        self.insert(fiber)
    }

    /// Create a text fiber.
    pub fn create_from_text(&mut self, content: &str) -> FiberId {
        self.insert(Fiber::new(
            FiberTag::HostText,
            FiberProps::Text(content.to_string()),
            None,
        ))
    }

    // =========================================================================
    // Double buffer
    // =========================================================================

    /// Produce the work-in-progress counterpart of `current` with new props.
    ///
    /// Reuses `current.alternate` when one exists (refreshed in place: new
    /// props, flags cleared, deletions dropped), otherwise allocates a node
    /// and cross-links the pair. Either way the structural fields — child,
    /// sibling, index, memoized props/state, update queue, lanes — are
    /// copied over from `current`, which is what gives untouched subtrees
    /// structural sharing: they are revisited, never reallocated.
    pub fn clone_for_work(&mut self, current: FiberId, pending_props: FiberProps) -> FiberId {
        let wip = match self.nodes[current].alternate {
            Some(wip) => {
                let node = &mut self.nodes[wip];
                node.pending_props = pending_props;
                node.flags = FiberFlags::empty();
                node.subtree_flags = FiberFlags::empty();
                node.deletions.clear();
                wip
            }
            None => {
                let cur = &self.nodes[current];
                let mut node = Fiber::new(cur.tag, pending_props, cur.key.clone());
                node.state_node = cur.state_node.clone();
                node.alternate = Some(current);
                let wip = self.insert(node);
                self.nodes[current].alternate = Some(wip);
                wip
            }
        };

        let (tag, ty, child, sibling, index, memoized_props, memoized_state, update_queue, lanes) = {
            let cur = &self.nodes[current];
            (
                cur.tag,
                cur.ty.clone(),
                cur.child,
                cur.sibling,
                cur.index,
                cur.memoized_props.clone(),
                cur.memoized_state.clone(),
                cur.update_queue.clone(),
                cur.lanes,
            )
        };

        let node = &mut self.nodes[wip];
        node.tag = tag;
        node.ty = ty;
        node.child = child;
        node.sibling = sibling;
        node.index = index;
        node.memoized_props = memoized_props;
        node.memoized_state = memoized_state;
        node.update_queue = update_queue;
        node.lanes = lanes;
        node.parent = None;
        wip
    }

    // =========================================================================
    // Freeing
    // =========================================================================

    /// Free one fiber, detaching its alternate's back-link.
    pub fn free(&mut self, id: FiberId) {
        if let Some(fiber) = self.nodes.remove(id) {
            if let Some(alt) = fiber.alternate {
                if let Some(alt_fiber) = self.nodes.get_mut(alt) {
                    alt_fiber.alternate = None;
                }
            }
        }
    }

    /// Free a whole subtree in both generations: every fiber reachable
    /// through child/sibling links from `root`, plus each one's alternate.
    pub fn free_subtree(&mut self, root: FiberId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.nodes.remove(id) else {
                continue;
            };
            if let Some(alt) = fiber.alternate {
                if let Some(alt_fiber) = self.nodes.remove(alt) {
                    let mut child = alt_fiber.child;
                    while let Some(c) = child {
                        stack.push(c);
                        child = self.nodes.get(c).and_then(|f| f.sibling);
                    }
                }
            }
            let mut child = fiber.child;
            while let Some(c) = child {
                stack.push(c);
                child = self.nodes.get(c).and_then(|f| f.sibling);
            }
        }
    }

    /// Accumulate every pending lane in the subtree rooted at `root`
    /// (inclusive). Used after commit to recompute the root's remaining
    /// work.
    pub fn collect_lanes(&self, root: FiberId) -> Lanes {
        let mut lanes = Lanes::NONE;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.nodes.get(id) else {
                continue;
            };
            lanes = lanes.merge(fiber.lanes);
            let mut child = fiber.child;
            while let Some(c) = child {
                stack.push(c);
                child = self.nodes.get(c).and_then(|f| f.sibling);
            }
        }
        lanes
    }
}

impl<I: Clone> Default for FiberArena<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone> Index<FiberId> for FiberArena<I> {
    type Output = Fiber<I>;

    fn index(&self, id: FiberId) -> &Fiber<I> {
        &self.nodes[id]
    }
}

impl<I: Clone> IndexMut<FiberId> for FiberArena<I> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<I> {
        &mut self.nodes[id]
    }
}

// =============================================================================
// Tests
// =============================================================================
