//! Recording host — the reference `HostConfig` used by the test-suite.
//!
//! Maintains a real mutable node tree (so placement/deletion order and
//! anchors are observable as final structure) and records every host call
//! in submission order (so tests can assert exactly what a commit did).

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;

use crate::element::Props;
use crate::error::HostError;
use crate::lanes::EventPriority;
use crate::types::{UpdatePayload, Value, CHILDREN, STYLE};

use super::HostConfig;

/// One recorded host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    CreateInstance { id: u32, ty: String },
    CreateText { id: u32, text: String },
    AppendInitial { parent: u32, child: u32 },
    Append { parent: u32, child: u32 },
    InsertBefore { parent: u32, child: u32, before: u32 },
    Remove { parent: u32, child: u32 },
    Finalize { id: u32 },
    CommitUpdate { id: u32, payload: UpdatePayload },
    CommitTextUpdate { id: u32, old: String, new: String },
}

struct MockNode {
    id: u32,
    ty: String,
    text: Option<String>,
    props: Props,
    children: Vec<MockInstance>,
}

/// Cloneable handle to a mock host node. Identity is the underlying
/// allocation, as it would be for a real UI handle.
#[derive(Clone)]
pub struct MockInstance(Rc<RefCell<MockNode>>);

impl MockInstance {
    fn new(id: u32, ty: impl Into<String>) -> Self {
        Self(Rc::new(RefCell::new(MockNode {
            id,
            ty: ty.into(),
            text: None,
            props: Props::new(),
            children: Vec::new(),
        })))
    }

    pub fn id(&self) -> u32 {
        self.0.borrow().id
    }

    fn same(&self, other: &MockInstance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Compact structural rendering, e.g. `root[list[item#a, item#b]]`.
    pub fn format(&self) -> String {
        let node = self.0.borrow();
        let mut out = String::new();
        if node.ty == "#text" {
            let _ = write!(out, "\"{}\"", node.text.as_deref().unwrap_or_default());
            return out;
        }
        out.push_str(&node.ty);
        if let Some(Value::Str(key)) = node.props.attrs.get("id") {
            let _ = write!(out, "#{key}");
        }
        if let Some(text) = node.text.as_deref().or_else(|| node.props.text_content()) {
            let _ = write!(out, "(\"{text}\")");
        }
        if !node.children.is_empty() {
            out.push('[');
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&child.format());
            }
            out.push(']');
        }
        out
    }

    pub fn child_ids(&self) -> Vec<u32> {
        self.0.borrow().children.iter().map(|c| c.id()).collect()
    }
}

/// A `HostConfig` over [`MockInstance`] trees with an op log.
pub struct RecordingHost {
    container: MockInstance,
    next_id: Cell<u32>,
    pub ops: Vec<HostOp>,
    pub event_priority: EventPriority,
    fail_next_create: bool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            container: MockInstance::new(0, "root"),
            next_id: Cell::new(1),
            ops: Vec::new(),
            event_priority: EventPriority::Default,
            fail_next_create: false,
        }
    }

    pub fn container(&self) -> MockInstance {
        self.container.clone()
    }

    /// Make the next instance creation fail, for render-abort tests.
    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Count of ops matching a predicate, for compact assertions.
    pub fn count_ops(&self, pred: impl Fn(&HostOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    pub fn tree(&self) -> String {
        self.container.format()
    }

    fn alloc_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostConfig for RecordingHost {
    type Instance = MockInstance;

    fn create_instance(&mut self, ty: &str, props: &Props) -> Result<MockInstance, HostError> {
        if self.fail_next_create {
            self.fail_next_create = false;
            return Err(HostError::new(format!("create_instance({ty}) refused")));
        }
        let instance = MockInstance::new(self.alloc_id(), ty);
        instance.0.borrow_mut().props = props.clone();
        self.ops.push(HostOp::CreateInstance {
            id: instance.id(),
            ty: ty.to_string(),
        });
        Ok(instance)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<MockInstance, HostError> {
        if self.fail_next_create {
            self.fail_next_create = false;
            return Err(HostError::new("create_text_instance refused"));
        }
        let instance = MockInstance::new(self.alloc_id(), "#text");
        instance.0.borrow_mut().text = Some(text.to_string());
        self.ops.push(HostOp::CreateText {
            id: instance.id(),
            text: text.to_string(),
        });
        Ok(instance)
    }

    fn append_initial_child(&mut self, parent: &MockInstance, child: &MockInstance) {
        parent.0.borrow_mut().children.push(child.clone());
        self.ops.push(HostOp::AppendInitial {
            parent: parent.id(),
            child: child.id(),
        });
    }

    fn append_child(&mut self, parent: &MockInstance, child: &MockInstance) {
        // Re-appending an attached child moves it to the end.
        parent.0.borrow_mut().children.retain(|c| !c.same(child));
        parent.0.borrow_mut().children.push(child.clone());
        self.ops.push(HostOp::Append {
            parent: parent.id(),
            child: child.id(),
        });
    }

    fn insert_before(&mut self, parent: &MockInstance, child: &MockInstance, before: &MockInstance) {
        let mut node = parent.0.borrow_mut();
        node.children.retain(|c| !c.same(child));
        let index = node
            .children
            .iter()
            .position(|c| c.same(before))
            .unwrap_or(node.children.len());
        node.children.insert(index, child.clone());
        drop(node);
        self.ops.push(HostOp::InsertBefore {
            parent: parent.id(),
            child: child.id(),
            before: before.id(),
        });
    }

    fn remove_child(&mut self, parent: &MockInstance, child: &MockInstance) {
        parent.0.borrow_mut().children.retain(|c| !c.same(child));
        self.ops.push(HostOp::Remove {
            parent: parent.id(),
            child: child.id(),
        });
    }

    fn finalize_initial_children(&mut self, instance: &MockInstance, _ty: &str, props: &Props) {
        instance.0.borrow_mut().props = props.clone();
        self.ops.push(HostOp::Finalize { id: instance.id() });
    }

    fn commit_update(
        &mut self,
        instance: &MockInstance,
        payload: &UpdatePayload,
        _ty: &str,
        _old_props: &Props,
        new_props: &Props,
    ) {
        // Apply the pairs verbatim, in order.
        {
            let mut node = instance.0.borrow_mut();
            for (key, value) in &payload.pairs {
                if key == STYLE {
                    // Merge the style sub-map; empty string removes.
                    let mut style = node
                        .props
                        .style_map()
                        .cloned()
                        .unwrap_or_default();
                    if let Some(updates) = value.as_map() {
                        for (prop, v) in updates {
                            if v.as_str() == Some("") {
                                style.remove(prop);
                            } else {
                                style.insert(prop.clone(), v.clone());
                            }
                        }
                    }
                    node.props.attrs.insert(STYLE.to_string(), Value::Map(style));
                } else if key == CHILDREN {
                    node.text = value.as_str().filter(|s| !s.is_empty()).map(String::from);
                } else if value.is_null() {
                    node.props.attrs.remove(key);
                } else {
                    node.props.attrs.insert(key.clone(), value.clone());
                }
            }
            node.props.children = new_props.children.clone();
        }
        self.ops.push(HostOp::CommitUpdate {
            id: instance.id(),
            payload: payload.clone(),
        });
    }

    fn commit_text_update(&mut self, instance: &MockInstance, old_text: &str, new_text: &str) {
        instance.0.borrow_mut().text = Some(new_text.to_string());
        self.ops.push(HostOp::CommitTextUpdate {
            id: instance.id(),
            old: old_text.to_string(),
            new: new_text.to_string(),
        });
    }

    fn get_current_event_priority(&self) -> EventPriority {
        self.event_priority
    }
}

// =============================================================================
// Tests
// =============================================================================
