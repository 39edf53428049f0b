//! Child reconciler.
//!
//! Builds a parent's new child-fiber chain from the old chain (the
//! committed generation's children) and a new-children description,
//! producing the minimal set of placement/update/deletion tags for commit
//! to act on.
//!
//! Side-effect tagging is only active when the parent generation already
//! has a committed counterpart: during first-time construction of a subtree
//! no fine-grained tags are produced, because the whole subtree is appended
//! as one block at commit.
//!
//! The list path runs in three passes:
//! 1. walk old and new in lockstep while keys align at each position;
//! 2. fast exits when either side is exhausted;
//! 3. index the remaining old fibers by key (or position when keyless) and
//!    resolve the remaining new items against the lookup, tagging moves by
//!    comparing each reused fiber's prior index against a monotonically
//!    advancing "last placed index" cursor.

use rustc_hash::FxHashMap;

use crate::element::{Children, Element, ElementType, Node};
use crate::fiber::{FiberArena, FiberFlags, FiberId, FiberProps, FiberTag};

/// Lookup key for pass 3: explicit key, or old-list position for keyless
/// items.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum MapKey {
    Key(String),
    Index(u32),
}

/// One reconciliation of one parent's children.
pub struct ChildReconciler<'a, I> {
    arena: &'a mut FiberArena<I>,
    /// Log of freshly allocated (alternate-less) fibers, owned by the
    /// engine so a discarded render can free them.
    fresh: &'a mut Vec<FiberId>,
    track_side_effects: bool,
}

impl<'a, I: Clone> ChildReconciler<'a, I> {
    pub fn new(
        arena: &'a mut FiberArena<I>,
        fresh: &'a mut Vec<FiberId>,
        track_side_effects: bool,
    ) -> Self {
        Self {
            arena,
            fresh,
            track_side_effects,
        }
    }

    /// Reconcile `new_children` against the old chain starting at
    /// `current_first`. Returns the head of the new sibling chain.
    pub fn reconcile(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        new_children: &Children,
    ) -> Option<FiberId> {
        match new_children {
            Children::None => {
                self.delete_remaining_children(parent, current_first);
                None
            }
            Children::One(node) => match node.as_ref() {
                Node::Element(el) => {
                    let fiber = self.reconcile_single_element(parent, current_first, el);
                    Some(self.place_single_child(fiber))
                }
                Node::Text(text) => {
                    let fiber = self.reconcile_single_text(parent, current_first, text);
                    Some(self.place_single_child(fiber))
                }
            },
            Children::Many(nodes) => self.reconcile_array(parent, current_first, nodes),
        }
    }

    // =========================================================================
    // Single-child paths
    // =========================================================================

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let mut child = current_first;
        while let Some(c) = child {
            let sibling = self.arena[c].sibling;
            if self.arena[c].key.as_deref() == element.key.as_deref() {
                if self.fiber_matches_type(c, &element.ty) {
                    // Match found: everything after it is outdated.
                    self.delete_remaining_children(parent, sibling);
                    let existing =
                        self.use_fiber(c, FiberProps::Element(element.props.clone()));
                    self.arena[existing].parent = Some(parent);
                    return existing;
                }
                // Same key, different type: the old node and the rest of
                // the chain go, a fresh fiber replaces it.
                self.delete_remaining_children(parent, Some(c));
                break;
            }
            self.delete_child(parent, c);
            child = sibling;
        }

        let created = self.create_fiber_from_element(element);
        self.arena[created].parent = Some(parent);
        created
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        text: &str,
    ) -> FiberId {
        if let Some(c) = current_first {
            if self.arena[c].tag == FiberTag::HostText {
                let sibling = self.arena[c].sibling;
                self.delete_remaining_children(parent, sibling);
                let existing = self.use_fiber(c, FiberProps::Text(text.to_string()));
                self.arena[existing].parent = Some(parent);
                return existing;
            }
        }
        self.delete_remaining_children(parent, current_first);
        let created = self.create_fiber_from_text(text);
        self.arena[created].parent = Some(parent);
        created
    }

    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if self.track_side_effects && self.arena[fiber].alternate.is_none() {
            self.arena[fiber].flags |= FiberFlags::PLACEMENT;
        }
        fiber
    }

    // =========================================================================
    // List path
    // =========================================================================

    fn reconcile_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        nodes: &[Node],
    ) -> Option<FiberId> {
        let mut result_first: Option<FiberId> = None;
        let mut prev: Option<FiberId> = None;
        let mut old_fiber = current_first;
        let mut last_placed: u32 = 0;
        let mut new_idx: usize = 0;

        // Pass 1: lockstep while keys align at each position.
        while new_idx < nodes.len() {
            let Some(old) = old_fiber else { break };

            // A hole in the old list (index jumped ahead) means there is no
            // candidate at this position.
            let (candidate, next_old) = if self.arena[old].index as usize > new_idx {
                (None, Some(old))
            } else {
                (Some(old), self.arena[old].sibling)
            };

            let Some(new_fiber) = self.update_slot(parent, candidate, new_idx, &nodes[new_idx])
            else {
                // First key mismatch ends this pass.
                if candidate.is_none() {
                    old_fiber = next_old;
                }
                break;
            };

            if self.track_side_effects {
                if let Some(c) = candidate {
                    if self.arena[new_fiber].alternate.is_none() {
                        // Same key, different type: the replacement did not
                        // reuse the old fiber.
                        self.delete_child(parent, c);
                    }
                }
            }

            last_placed = self.place_child(new_fiber, last_placed, new_idx);
            self.link(&mut result_first, &mut prev, new_fiber);
            old_fiber = next_old;
            new_idx += 1;
        }

        // Pass 2a: new list exhausted — everything old that remains goes.
        if new_idx == nodes.len() {
            self.delete_remaining_children(parent, old_fiber);
            return result_first;
        }

        // Pass 2b: old list exhausted — everything new that remains is an
        // insertion.
        if old_fiber.is_none() {
            while new_idx < nodes.len() {
                let created = self.create_child(parent, &nodes[new_idx]);
                last_placed = self.place_child(created, last_placed, new_idx);
                self.link(&mut result_first, &mut prev, created);
                new_idx += 1;
            }
            return result_first;
        }

        // Pass 3: index the remaining old fibers, resolve the remaining new
        // items against the lookup.
        let mut existing = self.map_remaining_children(old_fiber);

        while new_idx < nodes.len() {
            let new_fiber =
                self.update_from_map(&mut existing, parent, new_idx, &nodes[new_idx]);
            if self.track_side_effects && self.arena[new_fiber].alternate.is_some() {
                // Reused: consume from the lookup so it is not swept below.
                let key = match &self.arena[new_fiber].key {
                    Some(k) => MapKey::Key(k.clone()),
                    None => MapKey::Index(new_idx as u32),
                };
                existing.remove(&key);
            }
            last_placed = self.place_child(new_fiber, last_placed, new_idx);
            self.link(&mut result_first, &mut prev, new_fiber);
            new_idx += 1;
        }

        // Any old fiber never consumed from the lookup is outdated.
        if self.track_side_effects {
            for (_, child) in existing {
                self.delete_child(parent, child);
            }
        }

        result_first
    }

    fn link(
        &mut self,
        result_first: &mut Option<FiberId>,
        prev: &mut Option<FiberId>,
        fiber: FiberId,
    ) {
        self.arena[fiber].sibling = None;
        match prev {
            Some(p) => self.arena[*p].sibling = Some(fiber),
            None => *result_first = Some(fiber),
        }
        *prev = Some(fiber);
    }

    /// Reuse-or-create for pass 1. `None` means the keys differ and the
    /// lockstep walk must stop.
    fn update_slot(
        &mut self,
        parent: FiberId,
        candidate: Option<FiberId>,
        _new_idx: usize,
        node: &Node,
    ) -> Option<FiberId> {
        let old_key = candidate.and_then(|c| self.arena[c].key.clone());
        match node {
            Node::Text(text) => {
                if old_key.is_some() {
                    // A keyed old node never matches a keyless text run.
                    None
                } else {
                    Some(self.update_text_node(parent, candidate, text))
                }
            }
            Node::Element(el) => {
                if el.key.as_deref() == old_key.as_deref() {
                    Some(self.update_element(parent, candidate, el))
                } else {
                    None
                }
            }
        }
    }

    /// Reuse-or-create for pass 3.
    fn update_from_map(
        &mut self,
        existing: &mut FxHashMap<MapKey, FiberId>,
        parent: FiberId,
        new_idx: usize,
        node: &Node,
    ) -> FiberId {
        match node {
            Node::Text(text) => {
                let matched = existing.get(&MapKey::Index(new_idx as u32)).copied();
                self.update_text_node(parent, matched, text)
            }
            Node::Element(el) => {
                let key = match &el.key {
                    Some(k) => MapKey::Key(k.clone()),
                    None => MapKey::Index(new_idx as u32),
                };
                let matched = existing.get(&key).copied();
                self.update_element(parent, matched, el)
            }
        }
    }

    fn update_element(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        if let Some(cur) = current {
            if self.fiber_matches_type(cur, &element.ty) {
                let existing = self.use_fiber(cur, FiberProps::Element(element.props.clone()));
                self.arena[existing].parent = Some(parent);
                return existing;
            }
        }
        let created = self.create_fiber_from_element(element);
        self.arena[created].parent = Some(parent);
        created
    }

    fn update_text_node(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        text: &str,
    ) -> FiberId {
        if let Some(cur) = current {
            if self.arena[cur].tag == FiberTag::HostText {
                let existing = self.use_fiber(cur, FiberProps::Text(text.to_string()));
                self.arena[existing].parent = Some(parent);
                return existing;
            }
        }
        let created = self.create_fiber_from_text(text);
        self.arena[created].parent = Some(parent);
        created
    }

    fn create_child(&mut self, parent: FiberId, node: &Node) -> FiberId {
        let created = match node {
            Node::Element(el) => self.create_fiber_from_element(el),
            Node::Text(text) => self.create_fiber_from_text(text),
        };
        self.arena[created].parent = Some(parent);
        created
    }

    fn map_remaining_children(&self, first: Option<FiberId>) -> FxHashMap<MapKey, FiberId> {
        let mut map = FxHashMap::default();
        let mut child = first;
        while let Some(c) = child {
            let fiber = &self.arena[c];
            let key = match &fiber.key {
                Some(k) => MapKey::Key(k.clone()),
                None => MapKey::Index(fiber.index),
            };
            map.insert(key, c);
            child = fiber.sibling;
        }
        map
    }

    /// Stamp the new position and decide move-tagging against the advancing
    /// "last placed index" cursor: a reused fiber whose prior index is
    /// smaller than the cursor sits later than before and must be tagged
    /// as moved; otherwise the cursor advances to its prior index.
    fn place_child(&mut self, fiber: FiberId, last_placed: u32, new_idx: usize) -> u32 {
        self.arena[fiber].index = new_idx as u32;
        if !self.track_side_effects {
            return last_placed;
        }
        match self.arena[fiber].alternate {
            Some(current) => {
                let old_index = self.arena[current].index;
                if old_index < last_placed {
                    self.arena[fiber].flags |= FiberFlags::PLACEMENT;
                    last_placed
                } else {
                    old_index
                }
            }
            None => {
                // Brand new: insertion.
                self.arena[fiber].flags |= FiberFlags::PLACEMENT;
                last_placed
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn fiber_matches_type(&self, fiber: FiberId, ty: &ElementType) -> bool {
        self.arena[fiber].ty.as_ref() == Some(ty)
    }

    fn use_fiber(&mut self, fiber: FiberId, props: FiberProps) -> FiberId {
        let clone = self.arena.clone_for_work(fiber, props);
        self.arena[clone].index = 0;
        self.arena[clone].sibling = None;
        clone
    }

    fn create_fiber_from_element(&mut self, element: &Element) -> FiberId {
        let created = self.arena.create_from_element(element);
        self.fresh.push(created);
        created
    }

    fn create_fiber_from_text(&mut self, text: &str) -> FiberId {
        let created = self.arena.create_from_text(text);
        self.fresh.push(created);
        created
    }

    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        self.arena[parent].deletions.push(child);
        self.arena[parent].flags |= FiberFlags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, parent: FiberId, first: Option<FiberId>) {
        if !self.track_side_effects {
            return;
        }
        let mut child = first;
        while let Some(c) = child {
            self.delete_child(parent, c);
            child = self.arena[c].sibling;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
