//! Fiber tree and double buffer.
//!
//! A fiber is a unit-of-work node mirroring one tree position, carrying
//! pending and committed state across buffer generations. The arena owns
//! all nodes; handles are opaque slotmap keys.

mod arena;
mod node;

pub use arena::{FiberArena, FiberId};
pub use node::{Fiber, FiberFlags, FiberProps, FiberState, FiberTag, QueueSlot, RootMemo};
