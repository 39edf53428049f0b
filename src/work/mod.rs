//! Work loop and root scheduling.
//!
//! The render phase walks the tree depth-first — begin builds a node's
//! children and descends, complete finalizes a node and advances to its
//! sibling or parent — with the cursor held on the engine so a yielded
//! concurrent render resumes exactly where it stopped.

mod begin;
mod complete;
mod engine;

pub use engine::{Engine, RootPhase};
pub(crate) use engine::TaskKind;
