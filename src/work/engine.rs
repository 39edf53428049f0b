//! The engine: root bookkeeping, update intake, and the resumable work
//! loop.
//!
//! One engine serves one root. It owns the fiber arena, the host binding,
//! the task queue and every piece of ambient state the original design kept
//! in globals (current update priority, the work-in-progress cursor), so
//! nothing here outlives a render/commit turn by accident.
//!
//! Scheduling states per root: Idle → Scheduled → Rendering(sync|concurrent)
//! → Committing → Idle, with a Rendering → Rendering restart edge when a
//! higher-priority lane preempts the in-progress target.

use tracing::{debug, trace};

use crate::element::Children;
use crate::error::Result;
use crate::fiber::{FiberArena, FiberId, FiberProps, QueueSlot};
use crate::host::HostConfig;
use crate::lanes::{
    get_next_lanes, lanes_to_event_priority, EventPriority, ExpirationTimes, Lane, Lanes,
};
use crate::sched::{Clock, ManualClock, MonotonicClock, SchedulerPriority, TaskId, TaskQueue};
use crate::update::{Action, HookUpdate, RootUpdate, SharedHookQueue, StateHandle, UpdateQueue};

/// Per-root scheduling state, exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootPhase {
    #[default]
    Idle,
    Scheduled,
    RenderingSync,
    RenderingConcurrent,
    Committing,
}

/// How the render phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ExitStatus {
    #[default]
    InProgress,
    Completed,
}

/// Payload of a host task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    RenderRoot,
    FlushPassive,
}

/// An update staged between dispatch and the next fresh render stack.
///
/// Updates are never pushed into a queue that an in-progress render might
/// be folding; they sit here until `prepare_fresh_stack` drains them.
pub(crate) enum StagedUpdate {
    Root(RootUpdate),
    Hook {
        shared: SharedHookQueue,
        update: HookUpdate,
    },
}

/// Per-slice time budget before the concurrent loop yields, in ms.
const FRAME_BUDGET_MS: u64 = 5;

/// The reconciliation engine for one root.
pub struct Engine<H: HostConfig, C: Clock = MonotonicClock> {
    pub(crate) host: H,
    pub(crate) clock: C,
    pub(crate) arena: FiberArena<H::Instance>,
    pub(crate) container: H::Instance,

    // Root bookkeeping. `current_root` is the committed generation; commit
    // repoints it atomically.
    pub(crate) current_root: FiberId,
    pub(crate) pending_lanes: Lanes,
    pub(crate) expired_lanes: Lanes,
    pub(crate) expirations: ExpirationTimes,
    pub(crate) callback_task: Option<TaskId>,
    pub(crate) callback_priority: Lane,
    pub(crate) phase: RootPhase,

    // Resumable work-loop cursor.
    pub(crate) wip: Option<FiberId>,
    pub(crate) wip_root_active: bool,
    pub(crate) wip_render_lanes: Lanes,
    pub(crate) exit_status: ExitStatus,
    /// Fibers freshly allocated (no alternate) by the in-progress render;
    /// freed wholesale if the render is discarded.
    pub(crate) fresh_fibers: Vec<FiberId>,

    // Ambient priorities.
    pub(crate) current_update_priority: Lane,

    // Update staging.
    pub(crate) staged: Vec<StagedUpdate>,
    /// Lanes of staged updates not yet drained into a queue; folded into
    /// the remaining-work computation at commit.
    pub(crate) staged_lanes: Lanes,

    // Host task queue and sync callback queue.
    pub(crate) tasks: TaskQueue<TaskKind>,
    pub(crate) sync_scheduled: bool,
    pub(crate) flushing_sync: bool,
    pub(crate) batch_depth: u32,
    pub(crate) slice_start: u64,

    // Deferred passive effects.
    pub(crate) passive_pending: bool,
    // Dispatches staged by effect scopes, applied after each effect pass.
    pub(crate) pending_dispatches: Vec<(StateHandle, Action)>,
}

impl<H: HostConfig> Engine<H, MonotonicClock> {
    /// Create an engine rendering into `container`.
    pub fn new(host: H, container: H::Instance) -> Self {
        Self::with_clock(host, container, MonotonicClock::new())
    }
}

impl<H: HostConfig> Engine<H, ManualClock> {
    /// Test constructor with a deterministic clock.
    pub fn with_manual_clock(host: H, container: H::Instance, clock: ManualClock) -> Self {
        Self::with_clock(host, container, clock)
    }
}

impl<H: HostConfig, C: Clock> Engine<H, C> {
    pub fn with_clock(host: H, container: H::Instance, clock: C) -> Self {
        let mut arena = FiberArena::new();
        let current_root = arena.create_host_root(container.clone());
        Self {
            host,
            clock,
            arena,
            container,
            current_root,
            pending_lanes: Lanes::NONE,
            expired_lanes: Lanes::NONE,
            expirations: ExpirationTimes::new(),
            callback_task: None,
            callback_priority: Lanes::NONE,
            phase: RootPhase::Idle,
            wip: None,
            wip_root_active: false,
            wip_render_lanes: Lanes::NONE,
            exit_status: ExitStatus::InProgress,
            fresh_fibers: Vec::new(),
            current_update_priority: Lanes::NONE,
            staged: Vec::new(),
            staged_lanes: Lanes::NONE,
            tasks: TaskQueue::new(),
            sync_scheduled: false,
            flushing_sync: false,
            batch_depth: 0,
            slice_start: 0,
            passive_pending: false,
            pending_dispatches: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn phase(&self) -> RootPhase {
        self.phase
    }

    /// Anything scheduled (tasks, a sync flush, or a dirty root)?
    pub fn has_pending_work(&self) -> bool {
        self.sync_scheduled || !self.tasks.is_empty() || self.pending_lanes.any()
    }

    // =========================================================================
    // Update intake
    // =========================================================================

    /// The lane a new update gets right now: the ambient update priority if
    /// one is set, otherwise the host's current event classification.
    pub fn request_update_lane(&self) -> Lane {
        if self.current_update_priority.any() {
            return self.current_update_priority;
        }
        self.host.get_current_event_priority().lane()
    }

    /// Enqueue a root-level render of `children`.
    pub fn update_container(&mut self, children: Children) -> Result<()> {
        let lane = self.request_update_lane();
        debug!(?lane, "update_container");
        self.staged.push(StagedUpdate::Root(RootUpdate {
            lane,
            element: children,
        }));
        self.staged_lanes = self.staged_lanes.merge(lane);
        self.mark_fiber_lanes(self.current_root, lane);
        self.mark_root_updated(lane);
        self.ensure_root_is_scheduled(self.clock.now());
        self.maybe_flush_sync()
    }

    /// Dispatch a state-hook action through its handle.
    pub fn dispatch_action(
        &mut self,
        handle: &StateHandle,
        action: impl Into<Action>,
    ) -> Result<()> {
        self.dispatch_action_internal(handle, action.into())?;
        self.maybe_flush_sync()
    }

    pub(crate) fn dispatch_action_internal(
        &mut self,
        handle: &StateHandle,
        action: Action,
    ) -> Result<()> {
        if !self.arena.contains(handle.fiber) {
            debug!("dispatch on unmounted fiber dropped");
            return Ok(());
        }
        let lane = self.request_update_lane();
        let mut update = HookUpdate {
            lane,
            action,
            has_eager_state: false,
            eager_state: None,
        };

        // Eager bail-out: with no other lane pending on the fiber (or its
        // alternate), the last rendered state is the fold's input, so the
        // result can be computed now. If it is unchanged, drop the update
        // and schedule nothing.
        let fiber_lanes = self.arena[handle.fiber].lanes;
        let alt_lanes = self.arena[handle.fiber]
            .alternate
            .and_then(|a| self.arena.get(a))
            .map(|f| f.lanes)
            .unwrap_or(Lanes::NONE);
        if fiber_lanes.is_none() && alt_lanes.is_none() {
            let (eager, prev) = {
                let shared = handle.shared.borrow();
                let eager = (shared.last_rendered_reducer)(&shared.last_rendered_state, &update.action);
                (eager, shared.last_rendered_state.clone())
            };
            if eager == prev {
                trace!("eager state unchanged, update dropped");
                return Ok(());
            }
            update.has_eager_state = true;
            update.eager_state = Some(eager);
        }

        self.staged.push(StagedUpdate::Hook {
            shared: handle.shared.clone(),
            update,
        });
        self.staged_lanes = self.staged_lanes.merge(lane);
        self.mark_fiber_lanes(handle.fiber, lane);
        self.mark_root_updated(lane);
        self.ensure_root_is_scheduled(self.clock.now());
        Ok(())
    }

    fn mark_fiber_lanes(&mut self, fiber: FiberId, lane: Lane) {
        let alt = {
            let f = &mut self.arena[fiber];
            f.lanes = f.lanes.merge(lane);
            f.alternate
        };
        if let Some(alt) = alt {
            if let Some(f) = self.arena.get_mut(alt) {
                f.lanes = f.lanes.merge(lane);
            }
        }
    }

    fn mark_root_updated(&mut self, lane: Lane) {
        self.pending_lanes = self.pending_lanes.merge(lane);
    }

    // =========================================================================
    // Batching / event scope
    // =========================================================================

    /// Run `f` as one external callback batch: sync renders triggered inside
    /// it coalesce and flush once at the end.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        self.batch_depth += 1;
        let out = f(self);
        self.batch_depth -= 1;
        self.maybe_flush_sync()?;
        Ok(out)
    }

    /// Run `f` as the synchronous handling of an external event of the given
    /// priority tier: every update issued inside inherits that urgency
    /// through the ambient update priority.
    pub fn dispatch_event<R>(
        &mut self,
        priority: EventPriority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R> {
        let previous = self.current_update_priority;
        self.current_update_priority = priority.lane();
        let out = self.batch(f);
        self.current_update_priority = previous;
        out
    }

    pub(crate) fn maybe_flush_sync(&mut self) -> Result<()> {
        if self.batch_depth == 0 && !self.flushing_sync && self.sync_scheduled {
            self.flush_sync()?;
        }
        Ok(())
    }

    /// Flush the queued sync renders to completion, without yielding.
    pub fn flush_sync(&mut self) -> Result<()> {
        if self.flushing_sync {
            return Ok(());
        }
        self.flushing_sync = true;
        let previous = self.current_update_priority;
        self.current_update_priority = EventPriority::Discrete.lane();

        let result = (|| {
            while self.sync_scheduled {
                self.sync_scheduled = false;
                self.perform_sync_work()?;
            }
            Ok(())
        })();

        self.current_update_priority = previous;
        self.flushing_sync = false;
        if result.is_err() {
            // The aborted render's lanes are still pending; line up a
            // fresh pass from the committed tree.
            self.ensure_root_is_scheduled(self.clock.now());
        }
        result
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Recompute the scheduled target after new work arrived (or old work
    /// retired). Equal callback priority coalesces into the existing task;
    /// a lower-priority scheduled-but-unstarted task is cancelled and
    /// replaced.
    pub(crate) fn ensure_root_is_scheduled(&mut self, now: u64) {
        let newly_expired = self.expirations.mark_starved(self.pending_lanes, now);
        if newly_expired.any() {
            debug!(?newly_expired, "lanes expired");
            self.expired_lanes = self.expired_lanes.merge(newly_expired);
        }

        let wip_lanes = if self.wip_root_active {
            self.wip_render_lanes
        } else {
            Lanes::NONE
        };
        let next_lanes = get_next_lanes(self.pending_lanes, wip_lanes);

        if next_lanes.is_none() {
            if let Some(task) = self.callback_task.take() {
                self.tasks.cancel(task);
            }
            self.callback_priority = Lanes::NONE;
            if self.phase == RootPhase::Scheduled {
                self.phase = RootPhase::Idle;
            }
            return;
        }

        let new_priority = next_lanes.highest_priority();
        if new_priority == self.callback_priority {
            // Updates within one synchronous call stack coalesce into the
            // already-scheduled render.
            trace!("callback priority unchanged, coalescing");
            return;
        }

        if let Some(task) = self.callback_task.take() {
            debug!("superseding scheduled task");
            self.tasks.cancel(task);
        }

        if new_priority == Lanes::SYNC || new_priority == Lanes::SYNC_HYDRATION {
            self.sync_scheduled = true;
        } else {
            let scheduler_priority = match lanes_to_event_priority(next_lanes) {
                EventPriority::Discrete => SchedulerPriority::Immediate,
                EventPriority::Continuous => SchedulerPriority::UserBlocking,
                EventPriority::Default => SchedulerPriority::Normal,
                EventPriority::Idle => SchedulerPriority::Idle,
            };
            let id = self.tasks.push(scheduler_priority, TaskKind::RenderRoot, now);
            self.callback_task = Some(id);
            debug!(?next_lanes, ?scheduler_priority, "scheduled render task");
        }
        self.callback_priority = new_priority;
        if self.phase == RootPhase::Idle {
            self.phase = RootPhase::Scheduled;
        }
    }

    // =========================================================================
    // Host runner
    // =========================================================================

    /// Has the current time slice been used up?
    pub fn should_yield(&self) -> bool {
        self.clock.now().saturating_sub(self.slice_start) >= FRAME_BUDGET_MS
    }

    /// Run queued host tasks until the per-slice budget elapses.
    ///
    /// Returns `true` when more work remains, in which case the host should
    /// arrange a deferred re-invocation (after pending I/O, ahead of the
    /// next paint-adjacent tier).
    pub fn work_until_deadline(&mut self) -> Result<bool> {
        self.slice_start = self.clock.now();
        let mut ran_any = false;

        loop {
            let now = self.clock.now();
            let Some(expiration) = self.tasks.peek_expiration() else {
                break;
            };
            // At least one task runs per invocation; after that, unexpired
            // work yields once the slice is exhausted.
            if ran_any && expiration > now as i64 && self.should_yield() {
                return Ok(true);
            }
            ran_any = true;
            let Some((id, _priority, task_expiration, kind)) = self.tasks.take_top() else {
                break;
            };
            let did_timeout = task_expiration <= now as i64;

            match kind {
                TaskKind::RenderRoot => {
                    if self.callback_task != Some(id) {
                        // Logically cancelled; drop it.
                        self.tasks.finish(id);
                        continue;
                    }
                    match self.perform_concurrent_work(did_timeout) {
                        Ok(()) => {
                            if self.callback_task == Some(id) {
                                // Yielded mid-render: reinsert as its own
                                // continuation.
                                self.tasks.restore(id, TaskKind::RenderRoot);
                                return Ok(true);
                            }
                            self.tasks.finish(id);
                        }
                        Err(e) => {
                            self.tasks.finish(id);
                            if self.callback_task == Some(id) {
                                self.callback_task = None;
                                self.callback_priority = Lanes::NONE;
                            }
                            // Lanes stay pending; reschedule a fresh pass.
                            self.ensure_root_is_scheduled(self.clock.now());
                            return Err(e);
                        }
                    }
                }
                TaskKind::FlushPassive => {
                    self.tasks.finish(id);
                    self.flush_passive_effects()?;
                }
            }
        }

        Ok(!self.tasks.is_empty())
    }

    /// Drive everything — tasks, sync queue, passive effects — until the
    /// engine goes idle. Convenience for hosts without their own loop and
    /// for tests.
    pub fn flush_until_idle(&mut self) -> Result<()> {
        loop {
            self.flush_sync()?;
            if self.tasks.is_empty() {
                if self.sync_scheduled {
                    continue;
                }
                break;
            }
            self.work_until_deadline()?;
        }
        Ok(())
    }

    // =========================================================================
    // Render entry points
    // =========================================================================

    fn perform_sync_work(&mut self) -> Result<()> {
        let lanes = get_next_lanes(self.pending_lanes, Lanes::NONE);
        if lanes.is_none() {
            return Ok(());
        }
        self.render_root_sync(lanes)?;
        self.commit_root()
    }

    /// One concurrent work quantum: render (time-sliced when allowed) and
    /// commit if the render finished.
    pub(crate) fn perform_concurrent_work(&mut self, did_timeout: bool) -> Result<()> {
        if self.passive_pending {
            // Effects from the previous commit must observe the host tree
            // before the next render mutates bookkeeping.
            self.flush_passive_effects()?;
        }

        let wip_lanes = if self.wip_root_active {
            self.wip_render_lanes
        } else {
            Lanes::NONE
        };
        let lanes = get_next_lanes(self.pending_lanes, wip_lanes);
        if lanes.is_none() {
            // Nothing left to do; retire the callback so the runner drops
            // this task instead of reinserting it.
            self.callback_task = None;
            self.callback_priority = Lanes::NONE;
            return Ok(());
        }

        let should_time_slice = !lanes.intersects(Lanes::BLOCKING)
            && !lanes.intersects(self.expired_lanes)
            && !did_timeout;
        trace!(?lanes, should_time_slice, "perform_concurrent_work");

        let exit = if should_time_slice {
            self.render_root_concurrent(lanes)?
        } else {
            self.render_root_sync(lanes)?;
            ExitStatus::Completed
        };

        if exit == ExitStatus::Completed {
            self.commit_root()?;
        }
        Ok(())
    }

    fn render_root_sync(&mut self, lanes: Lanes) -> Result<()> {
        self.phase = RootPhase::RenderingSync;
        if !self.wip_root_active || self.wip_render_lanes != lanes {
            self.prepare_fresh_stack(lanes);
        }
        while let Some(unit) = self.wip {
            if let Err(e) = self.perform_unit_of_work(unit) {
                self.discard_wip();
                return Err(e);
            }
        }
        self.exit_status = ExitStatus::Completed;
        Ok(())
    }

    fn render_root_concurrent(&mut self, lanes: Lanes) -> Result<ExitStatus> {
        self.phase = RootPhase::RenderingConcurrent;
        // Target mismatch discards the generation and rebuilds from the
        // committed tree — no partial cross-priority reuse.
        if !self.wip_root_active || self.wip_render_lanes != lanes {
            self.prepare_fresh_stack(lanes);
        }
        let mut performed = false;
        loop {
            let Some(unit) = self.wip else { break };
            // Guarantee progress: yield only after at least one unit.
            if performed && self.should_yield() {
                trace!("time slice exhausted, yielding");
                return Ok(ExitStatus::InProgress);
            }
            if let Err(e) = self.perform_unit_of_work(unit) {
                self.discard_wip();
                return Err(e);
            }
            performed = true;
        }
        Ok(self.exit_status)
    }

    /// Reset the work-in-progress stack to a fresh render of `lanes`:
    /// drain staged updates into their queues, then clone the committed
    /// root as the new generation's starting point.
    fn prepare_fresh_stack(&mut self, lanes: Lanes) {
        debug!(?lanes, "prepare_fresh_stack");
        self.discard_fresh();
        self.finish_queueing_staged();
        self.wip_root_active = true;
        self.wip_render_lanes = lanes;
        self.exit_status = ExitStatus::InProgress;
        let wip_root = self.arena.clone_for_work(self.current_root, FiberProps::None);
        self.wip = Some(wip_root);
    }

    fn finish_queueing_staged(&mut self) {
        self.staged_lanes = Lanes::NONE;
        let staged = std::mem::take(&mut self.staged);
        for update in staged {
            match update {
                StagedUpdate::Root(u) => {
                    let root = self.current_root;
                    match &mut self.arena[root].update_queue {
                        QueueSlot::Root(queue) => queue.enqueue(u),
                        slot => {
                            let mut queue = UpdateQueue::new(Children::None);
                            queue.enqueue(u);
                            *slot = QueueSlot::Root(queue);
                        }
                    }
                }
                StagedUpdate::Hook { shared, update } => {
                    shared.borrow_mut().pending.push(update);
                }
            }
        }
    }

    /// Abandon the work-in-progress generation entirely.
    pub(crate) fn discard_wip(&mut self) {
        debug!("discarding work-in-progress generation");
        self.discard_fresh();
        self.wip = None;
        self.wip_root_active = false;
        self.wip_render_lanes = Lanes::NONE;
        self.exit_status = ExitStatus::InProgress;
        self.phase = RootPhase::Idle;
        // The scheduled target no longer matches anything in flight.
        if let Some(task) = self.callback_task.take() {
            self.tasks.cancel(task);
        }
        self.callback_priority = Lanes::NONE;
    }

    fn discard_fresh(&mut self) {
        for id in std::mem::take(&mut self.fresh_fibers) {
            let still_fresh = self
                .arena
                .get(id)
                .is_some_and(|f| f.alternate.is_none());
            if still_fresh {
                self.arena.free(id);
            }
        }
    }

    // =========================================================================
    // Depth-first work loop
    // =========================================================================

    /// One unit: begin the fiber (descend) or, if it produced no child,
    /// complete it (ascend). The cursor `self.wip` is the whole resumption
    /// state.
    fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<()> {
        trace!(?unit, "perform_unit_of_work");
        let next = self.begin_work(unit)?;
        let pending = self.arena[unit].pending_props.clone();
        self.arena[unit].memoized_props = pending;
        match next {
            Some(child) => self.wip = Some(child),
            None => self.complete_unit_of_work(unit)?,
        }
        Ok(())
    }

    fn complete_unit_of_work(&mut self, from: FiberId) -> Result<()> {
        let mut completed = from;
        loop {
            self.complete_work(completed)?;

            if let Some(sibling) = self.arena[completed].sibling {
                self.wip = Some(sibling);
                return Ok(());
            }
            match self.arena[completed].parent {
                Some(parent) => {
                    completed = parent;
                    self.wip = Some(parent);
                }
                None => {
                    self.wip = None;
                    if self.exit_status == ExitStatus::InProgress {
                        self.exit_status = ExitStatus::Completed;
                    }
                    return Ok(());
                }
            }
        }
    }

    // =========================================================================
    // Effect dispatch drain
    // =========================================================================

    /// Apply state dispatches staged by effect scopes during the last
    /// effect pass.
    pub(crate) fn apply_pending_dispatches(&mut self) -> Result<()> {
        while !self.pending_dispatches.is_empty() {
            let staged = std::mem::take(&mut self.pending_dispatches);
            for (handle, action) in staged {
                self.dispatch_action_internal(&handle, action)?;
            }
        }
        Ok(())
    }
}
