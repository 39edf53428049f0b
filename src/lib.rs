//! # spark-fiber
//!
//! Incremental fiber-tree reconciliation engine with cooperative priority
//! scheduling.
//!
//! Given the previously rendered tree and a new declarative description,
//! the engine computes a minimal set of structural and attribute mutations,
//! applies them atomically, and lets lower-priority work yield to
//! higher-priority work without losing partial progress.
//!
//! ## Architecture
//!
//! The unit of work is the fiber: one node per rendered-tree position, per
//! buffer generation, held in a slotmap arena and cross-linked to its
//! counterpart in the other generation (`alternate`). A render walks the
//! work-in-progress generation depth-first:
//!
//! ```text
//! update → lane → update queue → scheduler → begin/complete walk → commit
//! ```
//!
//! The render phase is interruptible at fiber boundaries and never touches
//! host state; the commit phase applies mutations and runs effects without
//! yielding, then atomically swaps the root's current pointer.
//!
//! ## Modules
//!
//! - [`types`] - Dynamic values and update payloads
//! - [`element`] - Declarative tree description (elements, props, children)
//! - [`lanes`] - 31-bit priority lane model, expiration, event priorities
//! - [`fiber`] - Fiber nodes, the arena, double-buffer pairing
//! - [`update`] - Update queues, hooks, effects
//! - [`reconcile`] - Keyed child diffing
//! - [`sched`] - Host task queue (priority min-heap) and clocks
//! - [`work`] - The engine: work loop, root scheduling
//! - [`commit`] - Mutation application, layout and passive effects
//! - [`host`] - The host renderer binding and the recording test host

pub mod commit;
pub mod element;
pub mod error;
pub mod fiber;
pub mod host;
pub mod lanes;
pub mod reconcile;
pub mod sched;
pub mod types;
pub mod update;
pub mod work;

// Re-export the working surface.
pub use element::{
    component_el, host_el, keyed_el, node, text, Children, Component, ComponentFn, Element,
    ElementType, Node, Props,
};
pub use error::{HostError, ReconcileError, Result};
pub use host::{diff_props, HostConfig, HostOp, MockInstance, RecordingHost};
pub use lanes::{EventPriority, Lane, Lanes};
pub use sched::{Clock, ManualClock, MonotonicClock, SchedulerPriority};
pub use types::{UpdatePayload, Value, CHILDREN, STYLE};
pub use update::{Action, EffectCleanup, EffectScope, RenderCx, StateHandle};
pub use work::{Engine, RootPhase};
