//! Lane scheduling: coalescing, priority preemption, interruption/resume,
//! restart, and starvation escalation — all on the deterministic clock.

use std::cell::RefCell;
use std::rc::Rc;

use spark_fiber::{
    component_el, host_el, keyed_el, text, Action, Children, Component, Engine, EventPriority,
    HostOp, ManualClock, Node, Props, RecordingHost, StateHandle, Value,
};

type HandleSlot = Rc<RefCell<Option<StateHandle>>>;

fn counter(slot: HandleSlot) -> Component {
    Component::new("Counter", move |cx, _props| {
        let (count, handle) = cx.use_state(0i64);
        *slot.borrow_mut() = Some(handle);
        let label = format!("count:{}", count.as_int().unwrap_or(0));
        Children::from(host_el(
            "label",
            Props::new().children(Children::One(Box::new(text(label)))),
        ))
    })
}

fn add(n: i64) -> Action {
    Action::apply(move |v| Value::Int(v.as_int().unwrap_or(0) + n))
}

fn new_engine(step: u64) -> Engine<RecordingHost, ManualClock> {
    let host = RecordingHost::new();
    let container = host.container();
    Engine::with_manual_clock(host, container, ManualClock::stepping(step))
}

fn mount_counter(engine: &mut Engine<RecordingHost, ManualClock>) -> StateHandle {
    let slot: HandleSlot = Rc::new(RefCell::new(None));
    let comp = counter(slot.clone());
    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();
    let handle = slot.borrow().clone().unwrap();
    engine.host_mut().take_ops();
    handle
}

fn big_list(n: usize, label: &str) -> Children {
    Children::from(host_el(
        "list",
        Props::new().children(Children::Many(
            (0..n)
                .map(|i| {
                    Node::Element(keyed_el(
                        "item",
                        format!("k{i}"),
                        Props::new().attr("id", format!("k{i}")).attr("label", label),
                    ))
                })
                .collect::<Vec<_>>(),
        )),
    ))
}

#[test]
fn test_batch_coalesces_into_one_commit() {
    let mut engine = new_engine(0);
    let handle = mount_counter(&mut engine);

    engine
        .dispatch_event(EventPriority::Discrete, |e| {
            e.dispatch_action(&handle, add(1)).unwrap();
            e.dispatch_action(&handle, add(1)).unwrap();
            e.dispatch_action(&handle, add(1)).unwrap();
        })
        .unwrap();

    // One render+commit reflecting all three updates in submission order.
    let host = engine.host();
    assert_eq!(host.count_ops(|op| matches!(op, HostOp::CommitUpdate { .. })), 1);
    assert_eq!(host.tree(), r#"root[label("count:3")]"#);
    assert!(!engine.has_pending_work());
}

#[test]
fn test_discrete_flushes_synchronously_within_batch_end() {
    let mut engine = new_engine(0);
    let handle = mount_counter(&mut engine);

    // A default-lane update is only scheduled...
    engine.dispatch_action(&handle, add(10)).unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:0")]"#);

    // ...but a discrete event flushes at its batch end, preempting the
    // scheduled default render and servicing only the sync lane.
    engine
        .dispatch_event(EventPriority::Discrete, |e| {
            e.dispatch_action(&handle, add(1)).unwrap();
        })
        .unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:1")]"#);

    // The skipped default update still applies, and the fold re-runs the
    // sync update after it: 0 +10 +1, not 1 +10.
    engine.flush_until_idle().unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:11")]"#);
}

#[test]
fn test_concurrent_render_yields_and_resumes() {
    // Every clock read advances 2ms: the 5ms slice budget drains after a
    // couple of fibers, forcing yields mid-render.
    let mut engine = new_engine(2);
    engine.update_container(big_list(6, "old")).unwrap();
    engine.flush_until_idle().unwrap();
    engine.host_mut().take_ops();

    engine.update_container(big_list(6, "new")).unwrap();

    // First slice: the render starts but yields with work remaining;
    // nothing host-visible happened yet.
    let more = engine.work_until_deadline().unwrap();
    assert!(more);
    assert!(engine.host().ops.is_empty());

    // Resumption picks up the saved cursor and finishes: exactly one
    // commit, all six updates.
    engine.flush_until_idle().unwrap();
    let host = engine.host();
    assert_eq!(host.count_ops(|op| matches!(op, HostOp::CommitUpdate { .. })), 6);
}

#[test]
fn test_sync_preemption_restarts_in_progress_render() {
    let mut engine = new_engine(10);
    let handle = mount_counter(&mut engine);

    // Default-lane update; one slice performs a partial render only.
    engine.dispatch_action(&handle, add(10)).unwrap();
    let more = engine.work_until_deadline().unwrap();
    assert!(more);
    assert!(engine.host().ops.is_empty());

    // Discrete preemption: the in-flight default target is abandoned and
    // the sync lane renders from the committed tree.
    engine
        .dispatch_event(EventPriority::Discrete, |e| {
            e.dispatch_action(&handle, add(1)).unwrap();
        })
        .unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:1")]"#);

    // The discarded default work is redone, preserving fold order.
    engine.flush_until_idle().unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:11")]"#);
}

#[test]
fn test_expired_lane_renders_without_time_slicing() {
    // Step 10 > the 5ms budget: a concurrent render yields after every
    // unit and needs several slices.
    let mut engine = new_engine(10);
    let handle = mount_counter(&mut engine);

    engine.dispatch_action(&handle, Action::Set(Value::Int(5))).unwrap();
    let more = engine.work_until_deadline().unwrap();
    assert!(more);
    assert!(engine.host().ops.is_empty());

    // Let the default lane starve past its expiration, then touch the
    // scheduler so starvation marking runs.
    engine.clock().advance(6_000);
    engine.dispatch_action(&handle, Action::Set(Value::Int(5))).unwrap();

    // The expired lane now renders to completion in a single invocation,
    // ignoring the exhausted time slice.
    engine.work_until_deadline().unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:5")]"#);
}

#[test]
fn test_low_priority_survives_sustained_discrete_traffic() {
    let mut engine = new_engine(10);
    let handle = mount_counter(&mut engine);

    // Pending default-lane update.
    engine.dispatch_action(&handle, add(100)).unwrap();

    // Sustained higher-priority traffic; each burst flushes synchronously
    // and keeps skipping the default lane.
    for _ in 0..5 {
        engine
            .dispatch_event(EventPriority::Discrete, |e| {
                e.dispatch_action(&handle, add(1)).unwrap();
            })
            .unwrap();
        engine.clock().advance(2_000);
    }
    // Five sync commits happened; the default update is still pending.
    assert_eq!(engine.host().tree(), r#"root[label("count:5")]"#);
    assert!(engine.has_pending_work());

    // Its expiration elapsed during the traffic, so the next pass services
    // it to completion regardless of the stepping clock.
    engine.work_until_deadline().unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:105")]"#);
}

#[test]
fn test_idle_lane_runs_when_nothing_else_pends() {
    let mut engine = new_engine(0);
    let handle = mount_counter(&mut engine);

    engine
        .dispatch_event(EventPriority::Idle, |e| {
            e.dispatch_action(&handle, add(7)).unwrap();
        })
        .unwrap();
    // Idle work is never flushed synchronously.
    assert_eq!(engine.host().tree(), r#"root[label("count:0")]"#);

    engine.flush_until_idle().unwrap();
    assert_eq!(engine.host().tree(), r#"root[label("count:7")]"#);
}
