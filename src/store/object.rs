//! Stored value variants: string, list and hash

use std::collections::{HashMap, VecDeque};

use crate::value::Value;

/// The typed container behind a keyspace entry. Commands that require a
/// specific variant fail with a wrong-type error on mismatch instead of
/// mutating the key.
#[derive(Debug, Clone)]
pub enum StoredValue {
    Str(Value),
    List(ListObject),
    Hash(HashObject),
}

impl StoredValue {
    pub fn str(v: Value) -> Self {
        Self::Str(v)
    }

    pub fn list() -> Self {
        Self::List(ListObject::new())
    }

    pub fn hash() -> Self {
        Self::Hash(HashObject::new())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Hash(_) => "hash",
        }
    }
}

/// Double-ended ordered sequence of values. The backing ring buffer is an
/// implementation detail; callers only see push/pop/range/get.
#[derive(Debug, Clone, Default)]
pub struct ListObject {
    items: VecDeque<Value>,
}

impl ListObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, front: bool, values: Vec<Value>) -> i64 {
        if values.is_empty() {
            return self.len() as i64;
        }
        let mut rest = values.into_iter();
        if self.items.is_empty() {
            // the first value of a push onto an empty list seeds both ends
            if let Some(first) = rest.next() {
                self.items.push_back(first);
            }
        }
        for value in rest {
            if front {
                self.items.push_front(value);
            } else {
                self.items.push_back(value);
            }
        }
        self.len() as i64
    }

    pub fn lpush(&mut self, values: Vec<Value>) -> i64 {
        self.push(true, values)
    }

    pub fn rpush(&mut self, values: Vec<Value>) -> i64 {
        self.push(false, values)
    }

    pub fn lpop(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    pub fn rpop(&mut self) -> Option<Value> {
        self.items.pop_back()
    }

    /// Inclusive range. Negative indices count from the tail; start clamps
    /// to 0 and stop to the last element; an inverted or out-of-range start
    /// yields an empty sequence.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Value> {
        let len = self.items.len() as i64;

        let mut start = if start < 0 { len + start } else { start };
        if start < 0 {
            start = 0;
        }
        let mut stop = if stop < 0 { len + stop } else { stop };

        if start > stop || start >= len {
            return Vec::new();
        }
        if stop >= len {
            stop = len - 1;
        }

        self.items
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }

    /// Indexed access; out-of-range indices yield an empty value, not an
    /// error.
    pub fn get(&self, index: i64) -> Value {
        if index < 0 {
            return Value::default();
        }
        self.items
            .get(index as usize)
            .cloned()
            .unwrap_or_default()
    }
}

/// Byte-exact mapping from field to value. Insertion order is not
/// observable.
#[derive(Debug, Clone, Default)]
pub struct HashObject {
    fields: HashMap<Value, Value>,
}

impl HashObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns true when the field did not exist before.
    pub fn set(&mut self, field: Value, value: Value) -> bool {
        self.fields.insert(field, value).is_none()
    }

    pub fn get(&self, field: &Value) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn del(&mut self, fields: &[Value]) -> i64 {
        let mut counter = 0;
        for field in fields {
            if self.fields.remove(field).is_some() {
                counter += 1;
            }
        }
        counter
    }

    pub fn keys(&self) -> Vec<Value> {
        self.fields.keys().cloned().collect()
    }
}
