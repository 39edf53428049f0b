//! Hook state for function components.
//!
//! Hooks are matched between renders purely by call position: a component
//! must call the same hooks, in the same order, the same number of times,
//! every render. [`RenderCx`] is the per-render cursor that enforces this;
//! a violation is latched and surfaced as a fatal
//! [`ReconcileError`](crate::error::ReconcileError) when the render
//! finishes the component.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::ReconcileError;
use crate::fiber::{FiberFlags, FiberId};
use crate::lanes::{Lane, Lanes};
use crate::types::Value;

use super::queue::{QueueUpdate, UpdateQueue};

// =============================================================================
// Actions and reducers
// =============================================================================

/// A state-hook action: replace the state outright, or transform it.
#[derive(Clone)]
pub enum Action {
    Set(Value),
    Apply(Rc<dyn Fn(&Value) -> Value>),
}

impl Action {
    /// Transform action from a plain closure.
    pub fn apply(f: impl Fn(&Value) -> Value + 'static) -> Self {
        Action::Apply(Rc::new(f))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Set(v) => f.debug_tuple("Set").field(v).finish(),
            Action::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

impl From<Value> for Action {
    fn from(v: Value) -> Self {
        Action::Set(v)
    }
}

/// Reducer signature shared by `use_state` and `use_reducer`.
pub type Reducer = Rc<dyn Fn(&Value, &Action) -> Value>;

/// The built-in reducer behind `use_state`: `Set` replaces, `Apply`
/// transforms.
pub fn basic_state_reducer(state: &Value, action: &Action) -> Value {
    match action {
        Action::Set(v) => v.clone(),
        Action::Apply(f) => f(state),
    }
}

// =============================================================================
// Hook updates
// =============================================================================

/// One dispatched state-hook update.
#[derive(Clone, Debug)]
pub struct HookUpdate {
    pub lane: Lane,
    pub action: Action,
    /// Set when the new state was computed eagerly at dispatch time (no
    /// other lane was pending on the fiber, so the fold result is known).
    pub has_eager_state: bool,
    pub eager_state: Option<Value>,
}

impl QueueUpdate for HookUpdate {
    fn lane(&self) -> Lane {
        self.lane
    }

    fn clear_lane(&mut self) {
        self.lane = Lanes::NONE;
    }
}

/// Queue metadata shared between both buffer generations of a hook and its
/// dispatch handles: freshly dispatched updates land in `pending` and are
/// pulled into the per-generation base segment when the hook next renders.
pub struct HookShared {
    pub pending: Vec<HookUpdate>,
    pub last_rendered_reducer: Reducer,
    pub last_rendered_state: Value,
}

pub type SharedHookQueue = Rc<RefCell<HookShared>>;

/// Handle returned by `use_state`/`use_reducer`; dispatch through
/// [`Engine::dispatch_action`](crate::work::Engine::dispatch_action) or an
/// [`EffectScope`].
#[derive(Clone)]
pub struct StateHandle {
    pub(crate) fiber: FiberId,
    pub(crate) shared: SharedHookQueue,
}

impl StateHandle {
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle").field("fiber", &self.fiber).finish()
    }
}

// =============================================================================
// Effects
// =============================================================================

bitflags! {
    /// Effect record tags: which commit sub-phase runs it, and whether it
    /// has work this commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EffectTags: u8 {
        const HAS_EFFECT = 0b0001;
        const LAYOUT     = 0b0100;
        const PASSIVE    = 0b1000;
    }
}

/// Scope handed to effect callbacks. State dispatches made inside an effect
/// are staged here and drained by the engine after the effect pass, so
/// effects never need (or get) a reentrant engine borrow.
#[derive(Default)]
pub struct EffectScope {
    staged: Vec<(StateHandle, Action)>,
}

impl EffectScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a state dispatch; it is applied when the current effect pass
    /// finishes.
    pub fn dispatch(&mut self, handle: &StateHandle, action: impl Into<Action>) {
        self.staged.push((handle.clone(), action.into()));
    }

    pub(crate) fn drain(&mut self) -> Vec<(StateHandle, Action)> {
        std::mem::take(&mut self.staged)
    }
}

/// Effect setup callback; returns an optional teardown.
pub type EffectCreate = Rc<dyn Fn(&mut EffectScope) -> Option<EffectCleanup>>;

/// Effect teardown callback.
pub type EffectCleanup = Rc<dyn Fn(&mut EffectScope)>;

/// One effect record, stored in the owning fiber's update-queue slot in
/// call order.
#[derive(Clone)]
pub struct Effect {
    pub tag: EffectTags,
    pub create: EffectCreate,
    pub destroy: Option<EffectCleanup>,
    pub deps: Option<Vec<Value>>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag)
            .field("has_destroy", &self.destroy.is_some())
            .field("deps", &self.deps)
            .finish()
    }
}

/// Shallow dependency-array compare. `None` (no array supplied) never
/// equals anything, so the effect re-runs every render.
fn hook_inputs_equal(next: &Option<Vec<Value>>, prev: &Option<Vec<Value>>) -> bool {
    match (next, prev) {
        (Some(next), Some(prev)) => next == prev,
        _ => false,
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// One hook in a fiber's positional hook list.
#[derive(Clone)]
pub enum Hook {
    Reducer(ReducerHook),
    /// Index of this hook's record in the fiber's effect list.
    Effect { index: usize },
}

/// A state hook: memoized state plus the per-generation base queue and the
/// shared pending queue.
#[derive(Clone)]
pub struct ReducerHook {
    pub memoized: Value,
    pub queue: UpdateQueue<Value, HookUpdate>,
    pub shared: SharedHookQueue,
}

impl Clone for HookShared {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            last_rendered_reducer: self.last_rendered_reducer.clone(),
            last_rendered_state: self.last_rendered_state.clone(),
        }
    }
}

// =============================================================================
// Render context
// =============================================================================

/// Output of rendering one function component with hooks.
///
/// Carried even when the render violated the hook invariants: the merged
/// current hooks must still be written back so no dispatched update is
/// lost when the render aborts.
pub(crate) struct RenderOutput {
    /// The new hook list for the work-in-progress fiber.
    pub hooks: Vec<Hook>,
    /// The old hook list, with pending updates merged into base segments —
    /// written back to the committed fiber so an interrupted render can be
    /// redone without losing updates.
    pub current_hooks: Option<Vec<Hook>>,
    /// The new effect list for the work-in-progress fiber.
    pub effects: Vec<Effect>,
    /// Flags accumulated by hooks (UPDATE for layout effects, PASSIVE for
    /// passive effects).
    pub flags: FiberFlags,
    /// Lanes of updates skipped during state-hook processing.
    pub remaining_lanes: Lanes,
    /// Fatal hook invariant violation, if any.
    pub error: Option<ReconcileError>,
}

/// The per-render hook cursor passed to every function component.
pub struct RenderCx {
    fiber: FiberId,
    render_lanes: Lanes,
    is_update: bool,
    current_hooks: Vec<Hook>,
    current_effects: Vec<Effect>,
    hook_index: usize,
    next_hooks: Vec<Hook>,
    effects: Vec<Effect>,
    flags: FiberFlags,
    remaining_lanes: Lanes,
    error: Option<ReconcileError>,
}

impl RenderCx {
    pub(crate) fn new(
        fiber: FiberId,
        render_lanes: Lanes,
        current: Option<(Vec<Hook>, Vec<Effect>)>,
    ) -> Self {
        let is_update = current.is_some();
        let (current_hooks, current_effects) = current.unwrap_or_default();
        Self {
            fiber,
            render_lanes,
            is_update,
            current_hooks,
            current_effects,
            hook_index: 0,
            next_hooks: Vec::new(),
            effects: Vec::new(),
            flags: FiberFlags::empty(),
            remaining_lanes: Lanes::NONE,
            error: None,
        }
    }

    /// State hook with the built-in replace/transform reducer.
    pub fn use_state(&mut self, initial: impl Into<Value>) -> (Value, StateHandle) {
        self.use_reducer(Rc::new(basic_state_reducer), initial.into())
    }

    /// State hook with a caller-supplied reducer.
    pub fn use_reducer(&mut self, reducer: Reducer, initial: Value) -> (Value, StateHandle) {
        let index = self.advance();

        if !self.is_update {
            let shared = Rc::new(RefCell::new(HookShared {
                pending: Vec::new(),
                last_rendered_reducer: reducer,
                last_rendered_state: initial.clone(),
            }));
            self.next_hooks.push(Hook::Reducer(ReducerHook {
                memoized: initial.clone(),
                queue: UpdateQueue::new(initial.clone()),
                shared: shared.clone(),
            }));
            return (initial, StateHandle { fiber: self.fiber, shared });
        }

        let Some(Hook::Reducer(old)) = self.current_hooks.get(index) else {
            return self.latch_state_error(index, initial);
        };
        let mut hook = old.clone();

        // Pull freshly dispatched updates into the base segment, and write
        // the merged-but-unprocessed queue back to the committed hook: if
        // this render is discarded, the next one redoes the same work.
        let drained: Vec<HookUpdate> = {
            let mut shared = hook.shared.borrow_mut();
            shared.pending.drain(..).collect()
        };
        for update in drained {
            hook.queue.enqueue(update);
        }
        hook.queue.merge_pending();
        self.current_hooks[index] = Hook::Reducer(hook.clone());

        let fold_reducer = reducer.clone();
        let (new_state, skipped) = hook.queue.process(self.render_lanes, |update, state| {
            if update.has_eager_state {
                update
                    .eager_state
                    .clone()
                    .unwrap_or_else(|| fold_reducer(&state, &update.action))
            } else {
                fold_reducer(&state, &update.action)
            }
        });

        hook.memoized = new_state.clone();
        {
            let mut shared = hook.shared.borrow_mut();
            shared.last_rendered_state = new_state.clone();
            shared.last_rendered_reducer = reducer;
        }
        self.remaining_lanes = self.remaining_lanes.merge(skipped);

        let handle = StateHandle {
            fiber: self.fiber,
            shared: hook.shared.clone(),
        };
        self.next_hooks.push(Hook::Reducer(hook));
        (new_state, handle)
    }

    /// Passive effect: runs after commit in the deferred flush.
    pub fn use_effect(
        &mut self,
        deps: Option<Vec<Value>>,
        create: impl Fn(&mut EffectScope) -> Option<EffectCleanup> + 'static,
    ) {
        self.use_effect_impl(FiberFlags::PASSIVE, EffectTags::PASSIVE, deps, Rc::new(create));
    }

    /// Layout effect: runs synchronously inside the commit.
    pub fn use_layout_effect(
        &mut self,
        deps: Option<Vec<Value>>,
        create: impl Fn(&mut EffectScope) -> Option<EffectCleanup> + 'static,
    ) {
        self.use_effect_impl(FiberFlags::UPDATE, EffectTags::LAYOUT, deps, Rc::new(create));
    }

    fn use_effect_impl(
        &mut self,
        fiber_flag: FiberFlags,
        class: EffectTags,
        deps: Option<Vec<Value>>,
        create: EffectCreate,
    ) {
        let index = self.advance();

        if !self.is_update {
            self.flags |= fiber_flag;
            self.push_effect(EffectTags::HAS_EFFECT | class, create, None, deps);
            return;
        }

        let Some(Hook::Effect { index: old_index }) = self.current_hooks.get(index) else {
            self.latch(index);
            // Keep the list shape consistent so later hooks still line up.
            self.push_effect(class, create, None, deps);
            return;
        };

        let (destroy, prev_deps) = match self.current_effects.get(*old_index) {
            Some(prev) => (prev.destroy.clone(), prev.deps.clone()),
            None => (None, None),
        };

        if hook_inputs_equal(&deps, &prev_deps) {
            // Unchanged deps: carry the effect forward without scheduling
            // teardown/setup.
            self.push_effect(class, create, destroy, deps);
            return;
        }

        self.flags |= fiber_flag;
        self.push_effect(EffectTags::HAS_EFFECT | class, create, destroy, deps);
    }

    fn push_effect(
        &mut self,
        tag: EffectTags,
        create: EffectCreate,
        destroy: Option<EffectCleanup>,
        deps: Option<Vec<Value>>,
    ) {
        let index = self.effects.len();
        self.effects.push(Effect {
            tag,
            create,
            destroy,
            deps,
        });
        self.next_hooks.push(Hook::Effect { index });
    }

    fn advance(&mut self) -> usize {
        let index = self.hook_index;
        self.hook_index += 1;
        index
    }

    /// Latch a positional violation: either the component called more hooks
    /// than last render, or the hook kind changed at this position.
    fn latch(&mut self, index: usize) {
        if self.error.is_some() {
            return;
        }
        self.error = Some(if index >= self.current_hooks.len() {
            ReconcileError::HookOrderMismatch {
                expected: self.current_hooks.len(),
                found: index + 1,
            }
        } else {
            ReconcileError::HookKindMismatch { index }
        });
    }

    fn latch_state_error(&mut self, index: usize, initial: Value) -> (Value, StateHandle) {
        self.latch(index);
        // Return a detached handle so the component body can keep running;
        // the render itself is already doomed.
        let shared = Rc::new(RefCell::new(HookShared {
            pending: Vec::new(),
            last_rendered_reducer: Rc::new(basic_state_reducer),
            last_rendered_state: initial.clone(),
        }));
        self.next_hooks.push(Hook::Reducer(ReducerHook {
            memoized: initial.clone(),
            queue: UpdateQueue::new(initial.clone()),
            shared: shared.clone(),
        }));
        (initial, StateHandle { fiber: self.fiber, shared })
    }

    pub(crate) fn finish(self) -> RenderOutput {
        let mut error = self.error;
        if error.is_none() && self.is_update && self.hook_index != self.current_hooks.len() {
            error = Some(ReconcileError::HookOrderMismatch {
                expected: self.current_hooks.len(),
                found: self.hook_index,
            });
        }
        RenderOutput {
            hooks: self.next_hooks,
            current_hooks: if self.is_update {
                Some(self.current_hooks)
            } else {
                None
            },
            effects: self.effects,
            flags: self.flags,
            remaining_lanes: self.remaining_lanes,
            error,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_cx(update_from: Option<(Vec<Hook>, Vec<Effect>)>) -> RenderCx {
        RenderCx::new(FiberId::default(), Lanes::SYNC, update_from)
    }

    #[test]
    fn test_mount_then_update_preserves_state() {
        let mut cx = manual_cx(None);
        let (v, handle) = cx.use_state(1i64);
        assert_eq!(v, Value::Int(1));
        let out = cx.finish();
        assert_eq!(out.hooks.len(), 1);

        // Dispatch an update, then re-render.
        handle.shared.borrow_mut().pending.push(HookUpdate {
            lane: Lanes::SYNC,
            action: Action::Set(Value::Int(5)),
            has_eager_state: false,
            eager_state: None,
        });

        let mut cx = manual_cx(Some((out.hooks, out.effects)));
        let (v, _) = cx.use_state(1i64);
        assert_eq!(v, Value::Int(5));
        cx.finish();
    }

    #[test]
    fn test_transform_actions_fold_in_order() {
        let mut cx = manual_cx(None);
        let (_, handle) = cx.use_state(0i64);
        let out = cx.finish();

        for _ in 0..3 {
            handle.shared.borrow_mut().pending.push(HookUpdate {
                lane: Lanes::SYNC,
                action: Action::apply(|v| Value::Int(v.as_int().unwrap() * 2 + 1)),
                has_eager_state: false,
                eager_state: None,
            });
        }

        let mut cx = manual_cx(Some((out.hooks, out.effects)));
        let (v, _) = cx.use_state(0i64);
        // 0 -> 1 -> 3 -> 7
        assert_eq!(v, Value::Int(7));
        cx.finish();
    }

    #[test]
    fn test_hook_count_mismatch_is_fatal() {
        let mut cx = manual_cx(None);
        cx.use_state(0i64);
        cx.use_state(0i64);
        let out = cx.finish();

        // Fewer hooks than the previous render.
        let mut cx = manual_cx(Some((out.hooks.clone(), vec![])));
        cx.use_state(0i64);
        assert!(matches!(
            cx.finish().error,
            Some(ReconcileError::HookOrderMismatch { expected: 2, found: 1 })
        ));

        // More hooks than the previous render.
        let mut cx = manual_cx(Some((out.hooks, vec![])));
        cx.use_state(0i64);
        cx.use_state(0i64);
        cx.use_state(0i64);
        assert!(matches!(
            cx.finish().error,
            Some(ReconcileError::HookOrderMismatch { .. })
        ));
    }

    #[test]
    fn test_hook_kind_mismatch_is_fatal() {
        let mut cx = manual_cx(None);
        cx.use_state(0i64);
        let out = cx.finish();

        let mut cx = manual_cx(Some((out.hooks, out.effects)));
        cx.use_effect(Some(vec![]), |_| None);
        assert!(matches!(
            cx.finish().error,
            Some(ReconcileError::HookKindMismatch { index: 0 })
        ));
    }

    #[test]
    fn test_effect_deps_compare() {
        let mut cx = manual_cx(None);
        cx.use_effect(Some(vec![Value::Int(1)]), |_| None);
        let out = cx.finish();
        assert!(out.flags.contains(FiberFlags::PASSIVE));
        assert!(out.effects[0].tag.contains(EffectTags::HAS_EFFECT));

        // Same deps: carried forward, no work flagged.
        let mut cx = manual_cx(Some((out.hooks.clone(), out.effects.clone())));
        cx.use_effect(Some(vec![Value::Int(1)]), |_| None);
        let out2 = cx.finish();
        assert!(!out2.flags.contains(FiberFlags::PASSIVE));
        assert!(!out2.effects[0].tag.contains(EffectTags::HAS_EFFECT));

        // Changed deps: work flagged again.
        let mut cx = manual_cx(Some((out.hooks, out.effects)));
        cx.use_effect(Some(vec![Value::Int(2)]), |_| None);
        let out3 = cx.finish();
        assert!(out3.flags.contains(FiberFlags::PASSIVE));
        assert!(out3.effects[0].tag.contains(EffectTags::HAS_EFFECT));
    }

    #[test]
    fn test_effect_without_deps_always_runs() {
        let mut cx = manual_cx(None);
        cx.use_effect(None, |_| None);
        let out = cx.finish();

        let mut cx = manual_cx(Some((out.hooks, out.effects)));
        cx.use_effect(None, |_| None);
        let out2 = cx.finish();
        assert!(out2.effects[0].tag.contains(EffectTags::HAS_EFFECT));
    }

    #[test]
    fn test_layout_effect_flags_update() {
        let mut cx = manual_cx(None);
        cx.use_layout_effect(Some(vec![]), |_| None);
        let out = cx.finish();
        assert!(out.flags.contains(FiberFlags::UPDATE));
        assert!(out.effects[0].tag.contains(EffectTags::LAYOUT));
    }

    #[test]
    fn test_skipped_lane_redo() {
        // A default-lane update between two sync updates: the sync-only
        // render applies 1 and 2 but must redo 2 after 10 later.
        let mut cx = manual_cx(None);
        let (_, handle) = cx.use_state(0i64);
        let out = cx.finish();

        let updates = [
            (Lanes::SYNC, 1),
            (Lanes::DEFAULT, 10),
            (Lanes::SYNC, 2),
        ];
        for (lane, n) in updates {
            handle.shared.borrow_mut().pending.push(HookUpdate {
                lane,
                action: Action::apply(move |v| Value::Int(v.as_int().unwrap() + n)),
                has_eager_state: false,
                eager_state: None,
            });
        }

        let mut cx = RenderCx::new(
            FiberId::default(),
            Lanes::SYNC,
            Some((out.hooks, out.effects)),
        );
        let (v, _) = cx.use_state(0i64);
        assert_eq!(v, Value::Int(3));
        let out = cx.finish();
        assert_eq!(out.remaining_lanes, Lanes::DEFAULT);

        // Redo pass with every lane: the fold must land on 13, not 11.
        let mut cx = RenderCx::new(
            FiberId::default(),
            Lanes::SYNC.merge(Lanes::DEFAULT),
            Some((out.hooks, out.effects)),
        );
        let (v, _) = cx.use_state(0i64);
        assert_eq!(v, Value::Int(13));
    }
}
