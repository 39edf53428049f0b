//! Update queues and hook state.
//!
//! Two layers share one fold algorithm: the root's render-payload queue and
//! each state hook's action queue are both [`UpdateQueue`]s with a pending
//! segment (O(1) append) and a base segment (carry-over from interrupted
//! passes). Hooks add positional matching, effect records, and the dispatch
//! handles external code uses to feed updates in.

mod hooks;
mod queue;

pub use hooks::{
    basic_state_reducer, Action, Effect, EffectCleanup, EffectCreate, EffectScope, EffectTags,
    Hook, HookShared, HookUpdate, Reducer, ReducerHook, RenderCx, SharedHookQueue, StateHandle,
};
pub use queue::{QueueUpdate, RootUpdate, UpdateQueue};
