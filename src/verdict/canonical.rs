//! Canonical form of structured answers.
//!
//! Two answers are equal when their canonical forms are: mappings compare
//! key by key, sequences element by element in order, and sequences that
//! stand for sets compare after sorting. Numbers compare by value, so `6`
//! and `6.0` are the same answer.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde_json::{Number, Value};

#[derive(Debug, Clone)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Int(i128),
    /// Only ever holds a finite, non-integral value or one beyond `i128`
    Float(f64),
    String(String),
    List(Vec<CanonicalValue>),
    Map(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::List(_) => 4,
            Self::Map(_) => 5,
        }
    }

    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            return Self::Int(i.into());
        }
        if let Some(u) = n.as_u64() {
            return Self::Int(u.into());
        }
        let f = n.as_f64().unwrap_or(f64::NAN);
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i128::MAX as f64 {
            Self::Int(f as i128)
        } else {
            Self::Float(f)
        }
    }
}

/// Kinds are ordered null < bool < number < string < list < map, which only
/// matters for sorting sets of mixed kinds
impl Ord for CanonicalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use CanonicalValue::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (String(a), String(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl PartialOrd for CanonicalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CanonicalValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CanonicalValue {}

impl From<&CanonicalValue> for Value {
    fn from(value: &CanonicalValue) -> Self {
        match value {
            CanonicalValue::Null => Value::Null,
            CanonicalValue::Bool(b) => Value::Bool(*b),
            CanonicalValue::Int(i) => i64::try_from(*i)
                .map(Value::from)
                .or_else(|_| u64::try_from(*i).map(Value::from))
                .unwrap_or_else(|_| Value::from(*i as f64)),
            CanonicalValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            CanonicalValue::String(s) => Value::String(s.clone()),
            CanonicalValue::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            CanonicalValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Canonicalizes `value`, sorting the sequences found at `set_paths`.
///
/// `set_paths` are JSON pointers (`""` is the root); paths that do not lead
/// to a sequence in `value` are ignored.
pub fn canonicalize(value: &Value, set_paths: &[String]) -> CanonicalValue {
    let sets: HashSet<&str> = set_paths.iter().map(String::as_str).collect();
    let mut path = String::new();
    canonicalize_at(value, &mut path, &sets)
}

fn canonicalize_at(value: &Value, path: &mut String, sets: &HashSet<&str>) -> CanonicalValue {
    match value {
        Value::Null => CanonicalValue::Null,
        Value::Bool(b) => CanonicalValue::Bool(*b),
        Value::Number(n) => CanonicalValue::from_number(n),
        Value::String(s) => CanonicalValue::String(s.clone()),
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                path.push('/');
                path.push_str(&i.to_string());
                list.push(canonicalize_at(item, path, sets));
                path.truncate(len);
            }
            // Children first, so nested set paths still match the incoming order
            if sets.contains(path.as_str()) {
                list.sort();
            }
            CanonicalValue::List(list)
        }
        Value::Object(entries) => {
            let mut map = BTreeMap::new();
            for (key, item) in entries {
                let len = path.len();
                path.push('/');
                path.push_str(&key.replace('~', "~0").replace('/', "~1"));
                map.insert(key.clone(), canonicalize_at(item, path, sets));
                path.truncate(len);
            }
            CanonicalValue::Map(map)
        }
    }
}

/// Deep equality of two answers after canonicalization
pub fn structurally_equal(actual: &Value, expected: &Value, set_paths: &[String]) -> bool {
    canonicalize(actual, set_paths) == canonicalize(expected, set_paths)
}
