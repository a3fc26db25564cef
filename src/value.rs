//! The untyped value domain evaluated by the VM.
//!
//! Values form a closed sum over the JSON-flavored categories plus sets and
//! externally-backed objects. Aggregates are reference-counted so a shallow
//! copy is one pointer bump and mutation is copy-on-write.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{EvalError, ExternalError};

mod ast;
pub mod number;
pub mod object;
pub mod set;

pub use ast::{ast_string, from_native, to_native};
pub use number::Number;
pub use object::Object;
pub use set::Set;

/// A value of the policy value domain.
///
/// The *undefined* sentinel of the evaluation model is not part of this
/// type; it exists only as an unset register slot.
#[derive(Debug, Clone)]
pub enum Value {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Arbitrary-precision number.
    Number(Number),
    /// UTF-8 string.
    String(Arc<str>),
    /// Ordered sequence.
    Array(Arc<Vec<Value>>),
    /// Ordered mapping, see [`Object`] for the two physical forms.
    Object(Object),
    /// Unordered unique collection.
    Set(Set),
    /// Host-provided iterable object, treated as read-only.
    External(Arc<dyn ExternalObject>),
}

/// Capability set of a host-provided object-like store.
///
/// The interpreter borrows externals for the duration of one evaluation and
/// never mutates them. Provider errors propagate as fatal evaluation errors.
pub trait ExternalObject: fmt::Debug + Send + Sync {
    /// Look up `key`, returning `None` when absent.
    fn get(&self, key: &Value) -> Result<Option<Value>, ExternalError>;

    /// Iterate entries; the callback returns `true` to stop early.
    fn iter(
        &self,
        f: &mut dyn FnMut(Value, Value) -> Result<bool, ExternalError>,
    ) -> Result<(), ExternalError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, ExternalError>;
}

impl Value {
    /// Empty array with room for `capacity` elements.
    pub fn new_array(capacity: usize) -> Self {
        Self::Array(Arc::new(Vec::with_capacity(capacity)))
    }

    /// Empty mutable object.
    pub fn new_object() -> Self {
        Self::Object(Object::new())
    }

    /// Empty set.
    pub fn new_set() -> Self {
        Self::Set(Set::new())
    }

    /// Variant predicate.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Variant predicate.
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Variant predicate.
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Variant predicate.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Variant predicate.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Variant predicate. Externals count as objects.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_) | Self::External(_))
    }

    /// Variant predicate.
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    /// Category name, as reported by the `type_name` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) | Self::External(_) => "object",
            Self::Set(_) => "set",
        }
    }

    /// Collection length. `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Array(a) => Some(a.len()),
            Self::Object(o) => Some(o.len()),
            Self::Set(s) => Some(s.len()),
            Self::External(x) => x.len().ok(),
            _ => None,
        }
    }

    /// Iterate key/value entries of a collection in natural order: arrays
    /// by index, objects by declared/insertion order, sets by
    /// implementation order (element doubles as key). The callback returns
    /// `true` to stop; the overall result reports whether iteration was
    /// stopped early.
    pub fn iter_entries(
        &self,
        f: &mut dyn FnMut(Value, Value) -> Result<bool, EvalError>,
    ) -> Result<bool, EvalError> {
        match self {
            Self::Array(a) => {
                for (i, v) in a.iter().enumerate() {
                    if f(Value::from(i as i64), v.clone())? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Object(o) => {
                for (k, v) in o.iter() {
                    if f(k, v)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Set(s) => {
                for v in s.iter() {
                    if f(v.clone(), v.clone())? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::External(x) => {
                let mut stopped = false;
                let mut inner: Option<EvalError> = None;
                x.iter(&mut |k, v| match f(k, v) {
                    Ok(stop) => {
                        stopped = stop;
                        Ok(stop)
                    }
                    Err(e) => {
                        inner = Some(e);
                        Ok(true)
                    }
                })?;
                match inner {
                    Some(e) => Err(e),
                    None => Ok(stopped),
                }
            }
            _ => Ok(false),
        }
    }

    /// Single-step subscription used by `dot` and the path builtins.
    pub fn get_key(&self, key: &Value) -> Result<Option<Value>, EvalError> {
        match self {
            Self::Array(a) => {
                let idx = match key {
                    Value::Number(n) => n.as_int(),
                    _ => None,
                };
                Ok(idx
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| a.get(i).cloned()))
            }
            Self::Object(o) => Ok(o.get(key).cloned()),
            Self::Set(s) => Ok(s.contains(key).then(|| key.clone())),
            Self::External(x) => Ok(x.get(key)?),
            _ => Ok(None),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Number(Number::Int(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Number(Number::Float(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(Arc::new(v))
    }
}

/// Hash a value with the canonical hasher. Equal values hash equal across
/// every physical representation.
pub fn hash_value(v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}

pub(crate) fn entry_hash(k: &Value, v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    k.hash(&mut h);
    v.hash(&mut h);
    h.finish()
}

/// Compare an external against any object-shaped value by iteration/get.
fn external_eq(x: &dyn ExternalObject, other: &Value) -> bool {
    let (Ok(xl), Some(ol)) = (x.len(), other.len()) else {
        return false;
    };
    if xl != ol {
        return false;
    }
    let mut equal = true;
    let res = x.iter(&mut |k, v| {
        match other.get_key(&k) {
            Ok(Some(ov)) if ov == v => Ok(false),
            _ => {
                equal = false;
                Ok(true)
            }
        }
    });
    res.is_ok() && equal
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a == b,
            (Self::External(x), other) => external_eq(x.as_ref(), other),
            (this, Self::External(x)) => external_eq(x.as_ref(), this),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Self::Number(n) => {
                state.write_u8(2);
                n.hash(state);
            }
            Self::String(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Self::Array(a) => {
                state.write_u8(4);
                state.write_usize(a.len());
                for v in a.iter() {
                    v.hash(state);
                }
            }
            Self::Object(o) => {
                state.write_u8(5);
                o.hash(state);
            }
            Self::External(x) => {
                // Externals hash as objects so mixed-form equality implies
                // hash equality.
                state.write_u8(5);
                let mut acc = 0u64;
                let _ = x.iter(&mut |k, v| {
                    acc = acc.wrapping_add(entry_hash(&k, &v));
                    Ok(false)
                });
                state.write_u64(acc);
            }
            Self::Set(s) => {
                state.write_u8(6);
                s.hash(state);
            }
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) | Value::External(_) => 5,
        Value::Set(_) => 6,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total value ordering: categories rank null < boolean < number <
    /// string < array < object < set; composites compare lexicographically
    /// over their canonical entry order.
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = type_rank(self).cmp(&type_rank(other));
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.iter().cmp(b.iter()),
            (Self::Set(a), Self::Set(b)) => a.sorted().cmp(&b.sorted()),
            _ => {
                // Objects (including externals) compare by sorted entries.
                sorted_entries(self).cmp(&sorted_entries(other))
            }
        }
    }
}

pub(crate) fn sorted_entries(v: &Value) -> Vec<(Value, Value)> {
    let mut entries = Vec::new();
    let _ = v.iter_entries(&mut |k, val| {
        entries.push((k, val));
        Ok(false)
    });
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StaticStore(Vec<(Value, Value)>);

    impl ExternalObject for StaticStore {
        fn get(&self, key: &Value) -> Result<Option<Value>, ExternalError> {
            Ok(self
                .0
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()))
        }

        fn iter(
            &self,
            f: &mut dyn FnMut(Value, Value) -> Result<bool, ExternalError>,
        ) -> Result<(), ExternalError> {
            for (k, v) in &self.0 {
                if f(k.clone(), v.clone())? {
                    break;
                }
            }
            Ok(())
        }

        fn len(&self) -> Result<usize, ExternalError> {
            Ok(self.0.len())
        }
    }

    #[test]
    fn external_equates_with_objects_by_iteration() {
        let ext = Value::External(Arc::new(StaticStore(vec![
            (Value::from("a"), Value::from(1i64)),
            (Value::from("b"), Value::from(2i64)),
        ])));
        let mut obj = Object::new();
        obj.insert(Value::from("b"), Value::from(2i64));
        obj.insert(Value::from("a"), Value::from(1i64));
        let obj = Value::Object(obj);
        assert_eq!(ext, obj);
        assert_eq!(hash_value(&ext), hash_value(&obj));
    }

    #[test]
    fn get_key_covers_every_collection() {
        let arr = Value::from(vec![Value::from("x"), Value::from("y")]);
        assert_eq!(arr.get_key(&Value::from(1i64)).unwrap(), Some(Value::from("y")));
        assert_eq!(arr.get_key(&Value::from(5i64)).unwrap(), None);
        assert_eq!(arr.get_key(&Value::from(-1i64)).unwrap(), None);

        let mut set = Set::new();
        set.insert(Value::from("x"));
        let set = Value::Set(set);
        assert_eq!(set.get_key(&Value::from("x")).unwrap(), Some(Value::from("x")));
        assert_eq!(set.get_key(&Value::from("z")).unwrap(), None);
    }

    #[test]
    fn value_ordering_ranks_categories() {
        let mut vs = vec![
            Value::from("a"),
            Value::Null,
            Value::from(false),
            Value::from(2i64),
            Value::new_set(),
            Value::new_array(0),
        ];
        vs.sort();
        assert!(vs[0].is_null());
        assert!(vs[1].is_boolean());
        assert!(vs[2].is_number());
        assert!(vs[3].is_string());
        assert!(vs[4].is_array());
        assert!(vs[5].is_set());
    }

    #[test]
    fn shallow_copy_is_cheap_and_detached_on_write() {
        let a = Value::from(vec![Value::from(1i64)]);
        let mut b = a.clone();
        if let Value::Array(elems) = &mut b {
            Arc::make_mut(elems).push(Value::from(2i64));
        }
        assert_eq!(a.len(), Some(1));
        assert_eq!(b.len(), Some(2));
    }
}
