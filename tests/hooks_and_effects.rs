//! Hook state, effect lifecycle, and unmount cleanup driven through the
//! engine.

use std::cell::RefCell;
use std::rc::Rc;

use spark_fiber::{
    component_el, host_el, keyed_el, text, Action, Children, Component, EffectCleanup,
    EffectScope, Engine, HostOp, Node, Props, RecordingHost, ReconcileError, StateHandle, Value,
};

type HandleSlot = Rc<RefCell<Option<StateHandle>>>;
type Log = Rc<RefCell<Vec<String>>>;

fn new_engine() -> Engine<RecordingHost> {
    let host = RecordingHost::new();
    let container = host.container();
    Engine::new(host, container)
}

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

fn logging_effect(name: &'static str, log: Log, layout: bool) -> Component {
    Component::new(name, move |cx, props| {
        let dep = props.get("dep").cloned().unwrap_or(Value::Null);
        let log = log.clone();
        let create = move |_scope: &mut EffectScope| {
            log.borrow_mut().push(format!("{name}:create"));
            let log = log.clone();
            let cleanup: EffectCleanup = Rc::new(move |_scope: &mut EffectScope| {
                log.borrow_mut().push(format!("{name}:destroy"));
            });
            Some(cleanup)
        };
        if layout {
            cx.use_layout_effect(Some(vec![dep]), create);
        } else {
            cx.use_effect(Some(vec![dep]), create);
        }
        Children::None
    })
}

fn mount_counter(engine: &mut Engine<RecordingHost>) -> StateHandle {
    let slot: HandleSlot = Rc::new(RefCell::new(None));
    let comp = counter(slot.clone());
    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();
    let handle = slot.borrow().clone().unwrap();
    handle
}

fn label_text(engine: &Engine<RecordingHost>) -> String {
    engine.host().tree()
}

#[test]
fn test_state_preserved_across_renders() {
    let mut engine = new_engine();
    let handle = mount_counter(&mut engine);
    assert_eq!(label_text(&engine), r#"root[label("count:0")]"#);

    engine
        .dispatch_action(&handle, Action::apply(|v| Value::Int(v.as_int().unwrap() + 1)))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(label_text(&engine), r#"root[label("count:1")]"#);

    engine
        .dispatch_action(&handle, Action::apply(|v| Value::Int(v.as_int().unwrap() + 1)))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(label_text(&engine), r#"root[label("count:2")]"#);
}

#[test]
fn test_eager_bailout_schedules_nothing() {
    let mut engine = new_engine();
    let handle = mount_counter(&mut engine);
    engine.host_mut().take_ops();

    // Setting the state to its current value is dropped outright.
    engine.dispatch_action(&handle, Action::Set(Value::Int(0))).unwrap();
    assert!(!engine.has_pending_work());
    engine.flush_until_idle().unwrap();
    assert!(engine.host().ops.is_empty());
    assert_eq!(label_text(&engine), r#"root[label("count:0")]"#);
}

#[test]
fn test_effect_destroy_before_create_on_dep_change() {
    let mut engine = new_engine();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let comp = logging_effect("eff", log.clone(), false);

    let with_dep = |comp: &Component, dep: i64| {
        Children::from(component_el(comp, Props::new().attr("dep", dep)))
    };

    engine.update_container(with_dep(&comp, 1)).unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["eff:create"]);

    // Unchanged deps: carried forward, nothing runs.
    engine.update_container(with_dep(&comp, 1)).unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["eff:create"]);

    // Changed deps: old destroy strictly before new create.
    engine.update_container(with_dep(&comp, 2)).unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["eff:create", "eff:destroy", "eff:create"]);
}

#[test]
fn test_tree_wide_destroy_before_any_create() {
    let mut engine = new_engine();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let a = logging_effect("a", log.clone(), false);
    let b = logging_effect("b", log.clone(), false);

    let both = |a: &Component, b: &Component, dep: i64| {
        Children::Many(vec![
            Node::Element(component_el(a, Props::new().attr("dep", dep))),
            Node::Element(component_el(b, Props::new().attr("dep", dep))),
        ])
    };

    engine.update_container(both(&a, &b, 1)).unwrap();
    engine.flush_until_idle().unwrap();
    log.borrow_mut().clear();

    engine.update_container(both(&a, &b, 2)).unwrap();
    engine.flush_until_idle().unwrap();

    // Every destroy across the tree precedes every create.
    assert_eq!(
        *log.borrow(),
        vec!["a:destroy", "b:destroy", "a:create", "b:create"]
    );
}

#[test]
fn test_layout_effect_runs_before_passive() {
    let mut engine = new_engine();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let log_l = log.clone();
    let log_p = log.clone();
    let comp = Component::new("both", move |cx, _props| {
        let log = log_l.clone();
        cx.use_layout_effect(Some(vec![]), move |_| {
            log.borrow_mut().push("layout:create".to_string());
            None
        });
        let log = log_p.clone();
        cx.use_effect(Some(vec![]), move |_| {
            log.borrow_mut().push("passive:create".to_string());
            None
        });
        Children::None
    });

    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();

    // Layout effects run inside the commit; passive ones in the deferred
    // flush afterwards.
    assert_eq!(*log.borrow(), vec!["layout:create", "passive:create"]);
}

#[test]
fn test_unmount_runs_cleanup_and_detaches_once() {
    let mut engine = new_engine();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let log_c = log.clone();
    let comp = Component::new("wrapped", move |cx, _props| {
        let log = log_c.clone();
        cx.use_effect(Some(vec![]), move |_| {
            log.borrow_mut().push("create".to_string());
            let log = log.clone();
            let cleanup: EffectCleanup = Rc::new(move |_: &mut EffectScope| {
                log.borrow_mut().push("destroy".to_string());
            });
            Some(cleanup)
        });
        Children::from(host_el(
            "wrap",
            Props::new().children(Children::from(host_el("inner", Props::new()))),
        ))
    });

    let mut comp_el = component_el(&comp, Props::new());
    comp_el.key = Some("a".to_string());
    let keep = keyed_el("box", "b", Props::new().attr("id", "b"));

    engine
        .update_container(Children::Many(vec![
            Node::Element(comp_el),
            Node::Element(keep.clone()),
        ]))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["create"]);
    engine.host_mut().take_ops();

    engine
        .update_container(Children::Many(vec![Node::Element(keep)]))
        .unwrap();
    engine.flush_until_idle().unwrap();

    // The effect tore down, and the host saw exactly one detach: the
    // subtree's root ("wrap"), never "inner".
    assert_eq!(*log.borrow(), vec!["create", "destroy"]);
    let host = engine.host();
    assert_eq!(host.count_ops(|op| matches!(op, HostOp::Remove { .. })), 1);
    assert_eq!(host.tree(), "root[box#b]");
}

#[test]
fn test_effect_scope_dispatch_feeds_new_render() {
    let mut engine = new_engine();
    let slot: HandleSlot = Rc::new(RefCell::new(None));
    let slot_c = slot.clone();
    let comp = Component::new("self_starter", move |cx, _props| {
        let (count, handle) = cx.use_state(0i64);
        *slot_c.borrow_mut() = Some(handle.clone());
        cx.use_effect(Some(vec![]), move |scope| {
            // Mount effect kicks the state once.
            scope.dispatch(&handle, Action::Set(Value::Int(42)));
            None
        });
        let label = format!("count:{}", count.as_int().unwrap_or(0));
        Children::from(host_el(
            "label",
            Props::new().children(Children::One(Box::new(text(label)))),
        ))
    });

    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(label_text(&engine), r#"root[label("count:42")]"#);
}

#[test]
fn test_hook_order_violation_is_fatal() {
    let mut engine = new_engine();
    let comp = Component::new("conditional", |cx, props| {
        if props.get("two").is_some() {
            cx.use_state(0i64);
        }
        cx.use_state(0i64);
        Children::None
    });

    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();

    // Second render calls one extra hook: fatal, render aborted.
    engine
        .update_container(Children::from(component_el(
            &comp,
            Props::new().attr("two", true),
        )))
        .unwrap();
    let err = engine.flush_until_idle().unwrap_err();
    assert!(matches!(err, ReconcileError::HookOrderMismatch { .. }));
}

#[test]
fn test_use_reducer_custom_reducer() {
    let mut engine = new_engine();
    let slot: HandleSlot = Rc::new(RefCell::new(None));
    let slot_c = slot.clone();
    let comp = Component::new("toggler", move |cx, _props| {
        let reducer: spark_fiber::update::Reducer = Rc::new(|state, action| match action {
            Action::Set(Value::Str(s)) if s == "toggle" => {
                Value::Bool(!matches!(state, Value::Bool(true)))
            }
            _ => state.clone(),
        });
        let (on, handle) = cx.use_reducer(reducer, Value::Bool(false));
        *slot_c.borrow_mut() = Some(handle);
        let label = if matches!(on, Value::Bool(true)) { "on" } else { "off" };
        Children::from(host_el(
            "label",
            Props::new().children(Children::One(Box::new(text(label)))),
        ))
    });

    engine
        .update_container(Children::from(component_el(&comp, Props::new())))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(label_text(&engine), r#"root[label("off")]"#);

    let handle = slot.borrow().clone().unwrap();
    engine
        .dispatch_action(&handle, Action::Set(Value::from("toggle")))
        .unwrap();
    engine.flush_until_idle().unwrap();
    assert_eq!(label_text(&engine), r#"root[label("on")]"#);
}
