//! Host renderer binding.
//!
//! The engine never touches real UI nodes; it drives a [`HostConfig`]
//! implementation through a narrow, imperative surface: create instances,
//! splice children, apply precomputed prop payloads. The
//! [`RecordingHost`](recording::RecordingHost) used by the test-suite is the
//! reference implementation.

use std::collections::BTreeMap;

use crate::element::{is_reserved_attr, Props};
use crate::error::HostError;
use crate::lanes::EventPriority;
use crate::types::{UpdatePayload, Value, CHILDREN, STYLE};

pub mod recording;

pub use recording::{HostOp, MockInstance, RecordingHost};

/// The renderer side of the engine boundary.
///
/// `Instance` is an opaque, cloneable handle to a host-side node; the
/// engine stores exactly one per host fiber and hands it back for every
/// mutation. All mutation methods are infallible — by the time commit runs
/// the render phase has already produced every instance — while instance
/// creation, which runs during the render phase, may fail and aborts the
/// render.
pub trait HostConfig {
    type Instance: Clone;

    fn create_instance(&mut self, ty: &str, props: &Props)
        -> Result<Self::Instance, HostError>;

    fn create_text_instance(&mut self, text: &str) -> Result<Self::Instance, HostError>;

    /// Attach a child while the parent is still detached (initial subtree
    /// construction during complete-work).
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    );

    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Apply initial props to a freshly created instance.
    fn finalize_initial_children(&mut self, instance: &Self::Instance, ty: &str, props: &Props);

    /// Diff old against new props into a payload for commit, or `None` when
    /// nothing changed. The default is the engine's [`diff_props`].
    fn prepare_update(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<UpdatePayload> {
        let _ = (instance, ty);
        diff_props(old_props, new_props)
    }

    /// Apply a payload produced by `prepare_update`, verbatim and in order.
    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        payload: &UpdatePayload,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    );

    fn commit_text_update(&mut self, instance: &Self::Instance, old_text: &str, new_text: &str);

    /// Whether `props.children` should be applied as text content of the
    /// instance instead of materializing a child text node.
    fn should_set_text_content(&self, ty: &str, props: &Props) -> bool {
        let _ = ty;
        props.text_content().is_some()
    }

    /// Priority tier of the event the host is currently delivering, if any.
    fn get_current_event_priority(&self) -> EventPriority {
        EventPriority::Default
    }
}

// =============================================================================
// Prop diffing
// =============================================================================

/// Compute the ordered mutation payload turning `old` props into `new`.
///
/// - a removed attribute appears as `(key, Value::Null)`;
/// - style is diffed per property into one `(STYLE, map)` pair at the end
///   of the payload, with removed style properties mapped to the empty
///   string rather than omitted;
/// - a changed single-text child appears as `(CHILDREN, text)`.
///
/// Returns `None` when nothing changed.
pub fn diff_props(old: &Props, new: &Props) -> Option<UpdatePayload> {
    let mut payload = UpdatePayload::new();
    let mut style_updates: BTreeMap<String, Value> = BTreeMap::new();

    // Removed attributes.
    for (key, old_value) in &old.attrs {
        if new.attrs.contains_key(key) || is_reserved_attr(key) {
            continue;
        }
        if key == STYLE {
            if let Some(old_style) = old_value.as_map() {
                for prop in old_style.keys() {
                    style_updates.insert(prop.clone(), Value::Str(String::new()));
                }
            }
        } else {
            payload.push(key.clone(), Value::Null);
        }
    }

    // Added or changed attributes.
    let empty = BTreeMap::new();
    for (key, new_value) in &new.attrs {
        if is_reserved_attr(key) {
            continue;
        }
        let old_value = old.attrs.get(key);
        if old_value == Some(new_value) {
            continue;
        }
        if key == STYLE {
            let old_style = old_value.and_then(Value::as_map).unwrap_or(&empty);
            let new_style = new_value.as_map().unwrap_or(&empty);
            for prop in old_style.keys() {
                if !new_style.contains_key(prop) {
                    style_updates.insert(prop.clone(), Value::Str(String::new()));
                }
            }
            for (prop, value) in new_style {
                if old_style.get(prop) != Some(value) {
                    style_updates.insert(prop.clone(), value.clone());
                }
            }
        } else {
            payload.push(key.clone(), new_value.clone());
        }
    }

    // Direct text content. Dropping it (children became real nodes) is an
    // explicit clear, not an omission.
    match (old.children.as_text(), new.children.as_text()) {
        (old_text, Some(new_text)) if old_text != Some(new_text) => {
            payload.push(CHILDREN, Value::from(new_text));
        }
        (Some(_), None) => {
            payload.push(CHILDREN, Value::Str(String::new()));
        }
        _ => {}
    }

    if !style_updates.is_empty() {
        payload.push(STYLE, Value::Map(style_updates));
    }

    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

// =============================================================================
// Tests
// =============================================================================
