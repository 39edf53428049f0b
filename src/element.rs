//! Declarative tree description.
//!
//! An [`Element`] is the engine-facing shape of "what the UI should look
//! like": a host tag or a function component, an optional reconciliation
//! key, and props. The authoring syntax that produces elements is out of
//! scope; tests and demos build them with the helpers at the bottom of this
//! module.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::types::{Value, CHILDREN, STYLE};
use crate::update::RenderCx;

// =============================================================================
// Component functions
// =============================================================================

/// A function component: renders props to children, calling hooks through
/// the [`RenderCx`] cursor.
pub type ComponentFn = Rc<dyn Fn(&mut RenderCx, &Props) -> Children>;

/// A named function component. Identity (used by the type-equality check in
/// the child reconciler) is pointer identity of the function, not the name.
#[derive(Clone)]
pub struct Component {
    pub name: &'static str,
    pub render: ComponentFn,
}

impl Component {
    pub fn new(name: &'static str, render: impl Fn(&mut RenderCx, &Props) -> Children + 'static) -> Self {
        Self {
            name,
            render: Rc::new(render),
        }
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}

// =============================================================================
// Element types
// =============================================================================

/// What kind of thing an element renders to.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    /// A host primitive, identified by its type string ("box", "text", ...).
    Host(String),
    /// A function component.
    Component(Component),
}

impl ElementType {
    pub fn host_type(&self) -> Option<&str> {
        match self {
            ElementType::Host(t) => Some(t.as_str()),
            ElementType::Component(_) => None,
        }
    }
}

/// One node of the declarative tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<String>,
    pub props: Props,
}

/// A child item: an element or a primitive text run.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn key(&self) -> Option<&str> {
        match self {
            Node::Element(el) => el.key.as_deref(),
            // Text items never carry keys.
            Node::Text(_) => None,
        }
    }
}

/// A new-children description: nothing, a single node, or an ordered
/// sequence. This is what components return and what the child reconciler
/// consumes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Children {
    #[default]
    None,
    One(Box<Node>),
    Many(Vec<Node>),
}

impl Children {
    /// The single text run, if this is exactly one text child.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Children::One(node) => match node.as_ref() {
                Node::Text(s) => Some(s.as_str()),
                Node::Element(_) => None,
            },
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Children::None)
    }
}

impl From<Element> for Children {
    fn from(el: Element) -> Self {
        Children::One(Box::new(Node::Element(el)))
    }
}

impl From<Vec<Node>> for Children {
    fn from(nodes: Vec<Node>) -> Self {
        Children::Many(nodes)
    }
}

// =============================================================================
// Props
// =============================================================================

/// Element properties: a flat attribute map plus typed children.
///
/// Style travels as a `Value::Map` under the [`STYLE`] key; the engine only
/// ever diffs it, the host interprets it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Props {
    pub attrs: BTreeMap<String, Value>,
    pub children: Children,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn style(mut self, entries: &[(&str, &str)]) -> Self {
        let map: BTreeMap<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();
        self.attrs.insert(STYLE.to_string(), Value::Map(map));
        self
    }

    pub fn children(mut self, children: impl Into<Children>) -> Self {
        self.children = children.into();
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// The style sub-map, if present.
    pub fn style_map(&self) -> Option<&BTreeMap<String, Value>> {
        self.attrs.get(STYLE).and_then(Value::as_map)
    }

    /// The single text child, if the children are exactly one text run.
    pub fn text_content(&self) -> Option<&str> {
        self.children.as_text()
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Build a host element.
pub fn host_el(ty: impl Into<String>, props: Props) -> Element {
    Element {
        ty: ElementType::Host(ty.into()),
        key: None,
        props,
    }
}

/// Build a keyed host element.
pub fn keyed_el(ty: impl Into<String>, key: impl Into<String>, props: Props) -> Element {
    Element {
        ty: ElementType::Host(ty.into()),
        key: Some(key.into()),
        props,
    }
}

/// Build a component element.
pub fn component_el(component: &Component, props: Props) -> Element {
    Element {
        ty: ElementType::Component(component.clone()),
        key: None,
        props,
    }
}

/// A bare text child.
pub fn text(content: impl Into<String>) -> Node {
    Node::Text(content.into())
}

/// Wrap an element as a child node.
pub fn node(el: Element) -> Node {
    Node::Element(el)
}

/// Ignore the `CHILDREN` attr key if a caller sets it manually; typed
/// children always win. Kept as a guard for payload round-trips.
pub(crate) fn is_reserved_attr(key: &str) -> bool {
    key == CHILDREN
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_identity() {
        let a = Component::new("A", |_, _| Children::None);
        let b = Component::new("A", |_, _| Children::None);
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_text_content() {
        let props = Props::new().children(Children::One(Box::new(text("hi"))));
        assert_eq!(props.text_content(), Some("hi"));

        let props = Props::new().children(Children::from(host_el("box", Props::new())));
        assert_eq!(props.text_content(), None);
    }

    #[test]
    fn test_style_map() {
        let props = Props::new().style(&[("color", "red")]);
        let style = props.style_map().unwrap();
        assert_eq!(style.get("color"), Some(&Value::from("red")));
    }

    #[test]
    fn test_node_key() {
        let el = keyed_el("item", "k1", Props::new());
        assert_eq!(node(el).key(), Some("k1"));
        assert_eq!(text("t").key(), None);
    }
}
