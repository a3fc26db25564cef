//! Object values.
//!
//! Two physical forms share the variant: `Parsed` objects come out of the
//! document converter, are string-keyed, immutable and shared; `Eval`
//! objects are built during evaluation and take arbitrary value keys. All
//! observable behavior is defined on the logical view, so the forms equate
//! and hash identically.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use super::{entry_hash, Value};

/// Ordered mapping from values to values.
#[derive(Debug, Clone)]
pub struct Object {
    repr: Repr,
}

#[derive(Debug, Clone)]
enum Repr {
    Parsed(Arc<ParsedObject>),
    Eval(Arc<IndexMap<Value, Value>>),
}

/// Immutable string-keyed object with ordinal access.
#[derive(Debug)]
pub struct ParsedObject {
    keys: Vec<Arc<str>>,
    values: Vec<Value>,
    /// Permutation of `keys` ordered lexicographically, for binary search.
    sorted: Vec<u32>,
}

impl ParsedObject {
    fn new(pairs: Vec<(Arc<str>, Value)>) -> Self {
        let (keys, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let mut sorted: Vec<u32> = (0..keys.len() as u32).collect();
        sorted.sort_by(|&a, &b| keys[a as usize].cmp(&keys[b as usize]));
        Self {
            keys,
            values,
            sorted,
        }
    }

    fn find(&self, key: &str) -> Option<usize> {
        self.sorted
            .binary_search_by(|&i| self.keys[i as usize].as_ref().cmp(key))
            .ok()
            .map(|pos| self.sorted[pos] as usize)
    }
}

impl Object {
    /// Empty mutable object.
    pub fn new() -> Self {
        Self {
            repr: Repr::Eval(Arc::new(IndexMap::new())),
        }
    }

    /// Immutable parsed object from converter output, keeping declared key
    /// order.
    pub fn from_parsed(pairs: Vec<(Arc<str>, Value)>) -> Self {
        Self {
            repr: Repr::Parsed(Arc::new(ParsedObject::new(pairs))),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Parsed(p) => p.keys.len(),
            Repr::Eval(m) => m.len(),
        }
    }

    /// True when the object has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the immutable parsed form.
    pub fn is_parsed(&self) -> bool {
        matches!(self.repr, Repr::Parsed(_))
    }

    /// Look up `key` by value equality.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match &self.repr {
            Repr::Parsed(p) => match key {
                Value::String(s) => p.find(s).map(|i| &p.values[i]),
                _ => None,
            },
            Repr::Eval(m) => m.get(key),
        }
    }

    /// Look up a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        match &self.repr {
            Repr::Parsed(p) => p.find(key).map(|i| &p.values[i]),
            Repr::Eval(m) => m.get(&Value::from(key)),
        }
    }

    /// Insert `value` at `key`, replacing any equal key. Parsed objects are
    /// first copied into the mutable form.
    pub fn insert(&mut self, key: Value, value: Value) {
        let map = self.promote();
        map.insert(key, value);
    }

    /// Remove `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &Value) {
        let map = self.promote();
        map.shift_remove(key);
    }

    fn promote(&mut self) -> &mut IndexMap<Value, Value> {
        if let Repr::Parsed(p) = &self.repr {
            let mut map = IndexMap::with_capacity(p.keys.len());
            for (k, v) in p.keys.iter().zip(&p.values) {
                map.insert(Value::String(k.clone()), v.clone());
            }
            self.repr = Repr::Eval(Arc::new(map));
        }
        match &mut self.repr {
            Repr::Eval(m) => Arc::make_mut(m),
            Repr::Parsed(_) => unreachable!("promoted above"),
        }
    }

    /// Iterate entries in declared/insertion order. Keys are materialized
    /// values; both are cheap clones.
    pub fn iter(&self) -> ObjectIter<'_> {
        ObjectIter {
            object: self,
            index: 0,
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry iterator over either physical form.
pub struct ObjectIter<'a> {
    object: &'a Object,
    index: usize,
}

impl Iterator for ObjectIter<'_> {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.index;
        self.index += 1;
        match &self.object.repr {
            Repr::Parsed(p) => {
                let key = p.keys.get(i)?;
                Some((Value::String(key.clone()), p.values[i].clone()))
            }
            Repr::Eval(m) => {
                let (k, v) = m.get_index(i)?;
                Some((k.clone(), v.clone()))
            }
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|(k, v)| other.get(&k) == Some(&v))
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Entry order differs between forms and between equal objects, so
        // the digest folds entries commutatively.
        let mut acc = 0u64;
        for (k, v) in self.iter() {
            acc = acc.wrapping_add(entry_hash(&k, &v));
        }
        state.write_u64(acc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::hash_value;

    fn parsed(pairs: &[(&str, Value)]) -> Object {
        Object::from_parsed(
            pairs
                .iter()
                .map(|(k, v)| (Arc::from(*k), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn parsed_and_eval_forms_equate_and_hash_alike() {
        let p = parsed(&[("a", Value::from(1i64)), ("b", Value::from(true))]);
        let mut e = Object::new();
        // Insertion order reversed on purpose.
        e.insert(Value::from("b"), Value::from(true));
        e.insert(Value::from("a"), Value::from(1i64));
        assert_eq!(p, e);
        assert_eq!(
            hash_value(&Value::Object(p)),
            hash_value(&Value::Object(e))
        );
    }

    #[test]
    fn insert_replaces_equal_keys() {
        let mut o = Object::new();
        o.insert(Value::from(1i64), Value::from("a"));
        o.insert(Value::from(1.0f64), Value::from("b"));
        assert_eq!(o.len(), 1);
        assert_eq!(o.get(&Value::from(1i64)), Some(&Value::from("b")));
    }

    #[test]
    fn inserting_into_parsed_form_copies_on_write() {
        let p = parsed(&[("a", Value::from(1i64))]);
        let mut copy = p.clone();
        copy.insert(Value::from("b"), Value::from(2i64));
        assert!(p.is_parsed());
        assert_eq!(p.len(), 1);
        assert_eq!(copy.len(), 2);
        assert!(!copy.is_parsed());
    }

    #[test]
    fn parsed_lookup_uses_sorted_index() {
        let p = parsed(&[
            ("zeta", Value::from(1i64)),
            ("alpha", Value::from(2i64)),
            ("mid", Value::from(3i64)),
        ]);
        assert_eq!(p.get_str("alpha"), Some(&Value::from(2i64)));
        assert_eq!(p.get_str("zeta"), Some(&Value::from(1i64)));
        assert_eq!(p.get_str("nope"), None);
        // Declared order is preserved by iteration.
        let keys: Vec<Value> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![Value::from("zeta"), Value::from("alpha"), Value::from("mid")]
        );
    }
}
