//! Dynamic Value Type
//!
//! Scope state is an open-ended bag of dynamic values. `Value` gives
//! composites (arrays, objects) reference semantics: they are shared
//! mutable references, so cloning a `Value` aliases the same underlying
//! collection and in-place mutation is observable through every handle.
//!
//! # Two Equality Modes
//!
//! The engine decides whether a watched value changed with one of two
//! comparisons, selected per watcher:
//!
//! - **Identity** ([`Value::identical`]): scalars by value, composites by
//!   pointer. Mutating an array in place does not make it non-identical
//!   to itself.
//! - **Structural** (`PartialEq`): recursive comparison by content,
//!   key-order-insensitive for objects.
//!
//! Both modes treat two NaN numbers as equal. NaN is not normally equal
//! to itself, and without this exception a watch whose value is and stays
//! NaN would never stabilize.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A dynamic scope value.
#[derive(Clone)]
pub enum Value {
    /// Absent value; also what reading a missing property yields.
    Undefined,
    /// Explicit null.
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// Shared mutable array.
    Array(Rc<RefCell<Vec<Value>>>),
    /// Shared mutable key/value container, insertion-ordered.
    Object(Rc<RefCell<IndexMap<String, Value>>>),
}

impl Value {
    /// Build an array value from an iterator of elements.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Build an object value from an iterator of entries.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )))
    }

    /// Identity equality: scalars by value, composites by pointer, with
    /// the NaN exception.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Fully independent snapshot: fresh allocations all the way down.
    /// Later in-place mutation of the original is detectable against it.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(Rc::new(RefCell::new(
                items.borrow().iter().map(Value::deep_clone).collect(),
            ))),
            Value::Object(entries) => Value::Object(Rc::new(RefCell::new(
                entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.deep_clone()))
                    .collect(),
            ))),
            other => other.clone(),
        }
    }

    /// One-level copy: a fresh outer collection whose elements still alias
    /// the original's elements.
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(Rc::new(RefCell::new(items.borrow().clone()))),
            Value::Object(entries) => {
                Value::Object(Rc::new(RefCell::new(entries.borrow().clone())))
            }
            other => other.clone(),
        }
    }

    /// Whether this value is an array, or an object that quacks like one
    /// (a non-negative integer `length` with either length 0 or the final
    /// index key present).
    pub fn is_array_like(&self) -> bool {
        match self {
            Value::Array(_) => true,
            Value::Object(entries) => {
                let entries = entries.borrow();
                match entries.get("length") {
                    Some(Value::Number(len)) if *len >= 0.0 && len.fract() == 0.0 => {
                        *len == 0.0 || entries.contains_key(&(*len as usize - 1).to_string())
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// The elements of an array or array-like object, index order.
    /// Missing indices of an array-like read as `Undefined`.
    pub(crate) fn array_like_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.borrow().clone()),
            Value::Object(entries) if self.is_array_like() => {
                let entries = entries.borrow();
                let len = match entries.get("length") {
                    Some(Value::Number(len)) => *len as usize,
                    _ => return None,
                };
                Some(
                    (0..len)
                        .map(|index| {
                            entries
                                .get(&index.to_string())
                                .cloned()
                                .unwrap_or(Value::Undefined)
                        })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a JSON document into a value. `null` maps to [`Value::Null`].
    pub fn from_json(json: &str) -> Result<Value, serde_json::Error> {
        serde_json::from_str::<serde_json::Value>(json).map(Value::from)
    }

    /// Render this value as JSON. `Undefined` and non-finite numbers
    /// render as `null`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("value serialization cannot fail")
    }
}

/// Equality as the digest engine sees it: structural when `deep`, identity
/// otherwise.
pub(crate) fn are_equal(new_value: &Value, old_value: &Value, deep: bool) -> bool {
    if deep {
        new_value == old_value
    } else {
        new_value.identical(old_value)
    }
}

/// The snapshot a watcher keeps as its previous value: a detached deep
/// clone when comparing structurally, a reference alias otherwise.
pub(crate) fn copy_value(value: &Value, deep: bool) -> Value {
    if deep {
        value.deep_clone()
    } else {
        value.clone()
    }
}

/// Structural deep equality with NaN equal to itself.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value == other))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(entries) => f.debug_map().entries(entries.borrow().iter()).finish(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let entries = entries.borrow();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(entries) => {
                Value::object(entries.into_iter().map(|(key, value)| (key, Value::from(value))))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_compares_scalars_by_value() {
        assert!(Value::from(1.0).identical(&Value::from(1.0)));
        assert!(Value::from("a").identical(&Value::from("a")));
        assert!(!Value::from(1.0).identical(&Value::from(2.0)));
        assert!(!Value::from(0.0).identical(&Value::Null));
        assert!(Value::Undefined.identical(&Value::Undefined));
    }

    #[test]
    fn identity_compares_composites_by_pointer() {
        let array = Value::array([Value::from(1)]);
        let alias = array.clone();
        let twin = Value::array([Value::from(1)]);

        assert!(array.identical(&alias));
        assert!(!array.identical(&twin));
        // Structurally the twin is equal.
        assert_eq!(array, twin);
    }

    #[test]
    fn nan_is_identical_to_nan() {
        let nan = Value::from(f64::NAN);
        assert!(nan.identical(&nan.clone()));
        assert_eq!(nan, Value::from(f64::NAN));
    }

    #[test]
    fn structural_equality_recurses_and_ignores_key_order() {
        let a = Value::object([("x", Value::from(1)), ("y", Value::array([Value::from(2)]))]);
        let b = Value::object([("y", Value::array([Value::from(2)])), ("x", Value::from(1))]);
        assert_eq!(a, b);

        let c = Value::object([("x", Value::from(1)), ("y", Value::array([Value::from(3)]))]);
        assert_ne!(a, c);
    }

    #[test]
    fn in_place_mutation_is_visible_structurally_but_not_by_identity() {
        let array = Value::array([Value::from(1)]);
        let snapshot = array.deep_clone();

        if let Value::Array(items) = &array {
            items.borrow_mut().push(Value::from(2));
        }

        assert!(array.identical(&array.clone()));
        assert_ne!(array, snapshot);
    }

    #[test]
    fn shallow_clone_copies_one_level_only() {
        let inner = Value::array([Value::from(1)]);
        let outer = Value::array([inner.clone()]);
        let copy = outer.shallow_clone();

        if let Value::Array(items) = &outer {
            items.borrow_mut().push(Value::from(2));
        }
        // Outer level detached...
        assert_ne!(outer, copy);

        if let Value::Array(items) = &inner {
            items.borrow_mut().push(Value::from(3));
        }
        // ...but elements still aliased.
        if let Value::Array(items) = &copy {
            assert_eq!(items.borrow()[0], inner);
        }
    }

    #[test]
    fn array_like_detection() {
        assert!(Value::array([]).is_array_like());
        assert!(Value::object([("length", Value::from(0))]).is_array_like());
        assert!(Value::object([
            ("length", Value::from(2)),
            ("0", Value::from("a")),
            ("1", Value::from("b")),
        ])
        .is_array_like());
        // The final index must be present.
        assert!(!Value::object([("length", Value::from(2)), ("0", Value::from("a"))])
            .is_array_like());
        assert!(!Value::object([("length", Value::from("2"))]).is_array_like());
        assert!(!Value::from(3).is_array_like());
    }

    #[test]
    fn json_round_trip() {
        let value = Value::from_json(r#"{"a": 1, "b": [true, null, "x"]}"#).unwrap();
        assert_eq!(
            value,
            Value::object([
                ("a", Value::from(1)),
                ("b", Value::array([Value::from(true), Value::Null, Value::from("x")])),
            ])
        );
        assert_eq!(value.to_json(), r#"{"a":1.0,"b":[true,null,"x"]}"#);
    }

    #[test]
    fn undefined_and_nan_serialize_as_null() {
        let value = Value::array([Value::Undefined, Value::from(f64::NAN)]);
        assert_eq!(value.to_json(), "[null,null]");
    }
}
