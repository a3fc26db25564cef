//! Set values.
//!
//! Small sets stay in a compact vector; past [`SET_COMPACT_MAX`] entries the
//! representation switches to chained hash buckets. Both forms hold at most
//! one representative per equality class.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::consts::SET_COMPACT_MAX;

use super::{hash_value, Value};

/// Unordered unique-value collection.
#[derive(Debug, Clone)]
pub struct Set {
    repr: Repr,
}

#[derive(Debug, Clone)]
enum Repr {
    Compact(Arc<Vec<Value>>),
    Hashed(Arc<HashedSet>),
}

#[derive(Debug, Clone, Default)]
struct HashedSet {
    buckets: HashMap<u64, Vec<Value>>,
    len: usize,
}

impl HashedSet {
    fn contains(&self, value: &Value) -> bool {
        self.buckets
            .get(&hash_value(value))
            .map(|chain| chain.contains(value))
            .unwrap_or(false)
    }

    fn insert(&mut self, value: Value) {
        let chain = self.buckets.entry(hash_value(&value)).or_default();
        if !chain.contains(&value) {
            chain.push(value);
            self.len += 1;
        }
    }
}

impl Set {
    /// Empty set.
    pub fn new() -> Self {
        Self {
            repr: Repr::Compact(Arc::new(Vec::new())),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Compact(v) => v.len(),
            Repr::Hashed(h) => h.len,
        }
    }

    /// True when the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership by value equality.
    pub fn contains(&self, value: &Value) -> bool {
        match &self.repr {
            Repr::Compact(v) => v.contains(value),
            Repr::Hashed(h) => h.contains(value),
        }
    }

    /// Insert `value` unless an equal element is already present.
    pub fn insert(&mut self, value: Value) {
        match &mut self.repr {
            Repr::Compact(v) => {
                if v.contains(&value) {
                    return;
                }
                if v.len() < SET_COMPACT_MAX {
                    Arc::make_mut(v).push(value);
                    return;
                }
                let mut hashed = HashedSet::default();
                for elem in v.iter() {
                    hashed.insert(elem.clone());
                }
                hashed.insert(value);
                self.repr = Repr::Hashed(Arc::new(hashed));
            }
            Repr::Hashed(h) => Arc::make_mut(h).insert(value),
        }
    }

    /// Iterate elements in implementation order.
    pub fn iter(&self) -> SetIter<'_> {
        match &self.repr {
            Repr::Compact(v) => SetIter::Compact(v.iter()),
            Repr::Hashed(h) => SetIter::Hashed {
                buckets: h.buckets.values(),
                chain: [].iter(),
            },
        }
    }

    /// Elements sorted by value ordering.
    pub fn sorted(&self) -> Vec<Value> {
        let mut elems: Vec<Value> = self.iter().cloned().collect();
        elems.sort();
        elems
    }
}

impl Default for Set {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for Set {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = Set::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

/// Element iterator over either physical form.
pub enum SetIter<'a> {
    /// Compact vector order.
    Compact(std::slice::Iter<'a, Value>),
    /// Bucket-chain order.
    Hashed {
        /// Remaining bucket chains.
        buckets: std::collections::hash_map::Values<'a, u64, Vec<Value>>,
        /// Chain currently drained.
        chain: std::slice::Iter<'a, Value>,
    },
}

impl<'a> Iterator for SetIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SetIter::Compact(it) => it.next(),
            SetIter::Hashed {
                buckets,
                chain,
            } => loop {
                if let Some(v) = chain.next() {
                    return Some(v);
                }
                *chain = buckets.next()?.iter();
            },
        }
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(v))
    }
}

impl Eq for Set {}

impl Hash for Set {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc = 0u64;
        for v in self.iter() {
            acc = acc.wrapping_add(hash_value(v));
        }
        state.write_u64(acc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_representative_per_equality_class() {
        let mut s = Set::new();
        s.insert(Value::from(1i64));
        s.insert(Value::from(1.0f64));
        s.insert(Value::from("1"));
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Value::from(1i64)));
        assert!(s.contains(&Value::from("1")));
    }

    #[test]
    fn compact_form_switches_to_buckets() {
        let mut s = Set::new();
        for i in 0..SET_COMPACT_MAX as i64 {
            s.insert(Value::from(i));
        }
        assert!(matches!(s.repr, Repr::Compact(_)));
        s.insert(Value::from(99i64));
        assert!(matches!(s.repr, Repr::Hashed(_)));
        assert_eq!(s.len(), SET_COMPACT_MAX + 1);
        for i in 0..SET_COMPACT_MAX as i64 {
            assert!(s.contains(&Value::from(i)));
        }
        assert!(s.contains(&Value::from(99i64)));
    }

    #[test]
    fn equality_ignores_representation_and_order() {
        let big = 0..(SET_COMPACT_MAX as i64 + 4);
        let a: Set = big.clone().map(Value::from).collect();
        let b: Set = big.rev().map(Value::from).collect();
        assert_eq!(a, b);
        assert_eq!(
            hash_value(&Value::Set(a)),
            hash_value(&Value::Set(b))
        );
    }
}
