//! The fiber node: one unit of work per rendered-tree position, per buffer
//! generation.
//!
//! Structural links (`parent`, `child`, `sibling`, `alternate`) are arena
//! handles, not pointers; only the `child` edge is owning in lifecycle terms
//! (freeing a subtree walks child links). `alternate` pairs a node with its
//! counterpart in the other buffer generation.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::element::{Children, ElementType, Props};
use crate::lanes::Lanes;
use crate::types::UpdatePayload;
use crate::update::{Effect, Hook, RootUpdate, UpdateQueue};

use super::arena::FiberId;

bitflags! {
    /// Pending side-effect flags, bubbled into `subtree_flags` for fast
    /// skipping during commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FiberFlags: u32 {
        /// Node (or its moved position) must be attached in the host tree.
        const PLACEMENT      = 1 << 1;
        /// Host props / text / layout-class effects need committing.
        const UPDATE         = 1 << 2;
        /// One or more children were removed; see `Fiber::deletions`.
        const CHILD_DELETION = 1 << 4;
        /// Passive-class effects need the deferred flush.
        const PASSIVE        = 1 << 10;
    }
}

impl FiberFlags {
    /// Everything the mutation pass acts on.
    pub const MUTATION_MASK: FiberFlags = FiberFlags::PLACEMENT
        .union(FiberFlags::UPDATE)
        .union(FiberFlags::CHILD_DELETION);

    /// Everything the layout pass acts on.
    pub const LAYOUT_MASK: FiberFlags = FiberFlags::UPDATE;
}

/// Closed set of fiber kinds; begin/complete/commit match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberTag {
    /// The tree root; `state_node` holds the host container.
    Root,
    /// A host primitive with a real host instance.
    HostComponent,
    /// A host text run.
    HostText,
    /// A function component with a hook list.
    FunctionComponent,
    /// A component not yet rendered once; resolves to `FunctionComponent`
    /// on first begin-work.
    Indeterminate,
}

/// Props as carried by a fiber. Text fibers carry their content here; the
/// root carries nothing (its render payload arrives through the update
/// queue).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FiberProps {
    #[default]
    None,
    Element(Props),
    Text(String),
}

impl FiberProps {
    pub fn as_props(&self) -> Option<&Props> {
        match self {
            FiberProps::Element(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FiberProps::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Memoized state: the hook list for function components, the last rendered
/// payload for the root.
#[derive(Clone, Default)]
pub enum FiberState {
    #[default]
    None,
    Root(RootMemo),
    Hooks(Vec<Hook>),
}

/// The root fiber's committed render payload.
#[derive(Clone, Default)]
pub struct RootMemo {
    pub element: Children,
}

/// What occupies a fiber's update-queue slot depends on its tag: the root
/// holds the lane-tagged update queue, function components hold their
/// effect list, host components hold the prepared prop payload between
/// complete-work and commit.
#[derive(Clone, Default)]
pub enum QueueSlot {
    #[default]
    None,
    Root(UpdateQueue<Children, RootUpdate>),
    Effects(Vec<Effect>),
    HostUpdate(UpdatePayload),
}

/// One fiber node. `I` is the host instance handle type.
pub struct Fiber<I> {
    pub tag: FiberTag,
    pub key: Option<String>,
    pub ty: Option<ElementType>,
    /// Host-side instance (or the root container for `Root`).
    pub state_node: Option<I>,

    pub pending_props: FiberProps,
    pub memoized_props: FiberProps,
    pub memoized_state: FiberState,
    pub update_queue: QueueSlot,

    pub flags: FiberFlags,
    pub subtree_flags: FiberFlags,
    pub lanes: Lanes,
    /// Position among siblings as of the last reconciliation; drives the
    /// keyed-diff move detection.
    pub index: u32,

    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub alternate: Option<FiberId>,

    /// Child subtrees removed by the last reconciliation of this node.
    pub deletions: SmallVec<[FiberId; 4]>,
}

impl<I> Fiber<I> {
    pub fn new(tag: FiberTag, pending_props: FiberProps, key: Option<String>) -> Self {
        Self {
            tag,
            key,
            ty: None,
            state_node: None,
            pending_props,
            memoized_props: FiberProps::None,
            memoized_state: FiberState::None,
            update_queue: QueueSlot::None,
            flags: FiberFlags::empty(),
            subtree_flags: FiberFlags::empty(),
            lanes: Lanes::NONE,
            index: 0,
            parent: None,
            child: None,
            sibling: None,
            alternate: None,
            deletions: SmallVec::new(),
        }
    }

    /// Whether this fiber owns a real host instance once complete.
    pub fn is_host(&self) -> bool {
        matches!(self.tag, FiberTag::HostComponent | FiberTag::HostText)
    }

    pub fn hooks(&self) -> Option<&[Hook]> {
        match &self.memoized_state {
            FiberState::Hooks(hooks) => Some(hooks.as_slice()),
            _ => None,
        }
    }

    pub fn effects(&self) -> Option<&[Effect]> {
        match &self.update_queue {
            QueueSlot::Effects(effects) => Some(effects.as_slice()),
            _ => None,
        }
    }

    pub fn effects_mut(&mut self) -> Option<&mut Vec<Effect>> {
        match &mut self.update_queue {
            QueueSlot::Effects(effects) => Some(effects),
            _ => None,
        }
    }

    /// The committed render payload (root fibers only).
    pub fn root_memo(&self) -> Option<&RootMemo> {
        match &self.memoized_state {
            FiberState::Root(memo) => Some(memo),
            _ => None,
        }
    }
}
