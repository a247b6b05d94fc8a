// Lua table: contiguous array part for small positive integer keys plus a
// hash part for everything else, with the border-based length operator.

use ahash::AHashMap;

use crate::gc::TableId;
use crate::value::{TableKey, Value};

/// Error raised when inserting an illegal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl KeyError {
    pub fn message(&self) -> &'static str {
        match self {
            KeyError::Nil => "table index is nil",
            KeyError::NaN => "table index is NaN",
        }
    }
}

pub struct LuaTable {
    array: Vec<Value>,
    hash: AHashMap<TableKey, Value>,
    pub metatable: Option<TableId>,
}

impl LuaTable {
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_hint),
            hash: if hash_hint > 0 {
                AHashMap::with_capacity(hash_hint)
            } else {
                AHashMap::new()
            },
            metatable: None,
        }
    }

    /// Raw read; absent keys (and nil/NaN) read as nil.
    pub fn get(&self, key: &Value) -> Value {
        if let Value::Integer(i) = key {
            return self.get_int(*i);
        }
        match TableKey::from_value(key) {
            Some(TableKey::Integer(i)) => self.get_int(i),
            Some(k) => self.hash.get(&k).copied().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as usize) <= self.array.len() {
            self.array[i as usize - 1]
        } else {
            self.hash
                .get(&TableKey::Integer(i))
                .copied()
                .unwrap_or(Value::Nil)
        }
    }

    /// Raw write. Assigning nil removes the key; nil/NaN keys are rejected.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), KeyError> {
        match TableKey::from_value(&key) {
            Some(TableKey::Integer(i)) => {
                self.set_int(i, value);
                Ok(())
            }
            Some(k) => {
                if value.is_nil() {
                    self.hash.remove(&k);
                } else {
                    self.hash.insert(k, value);
                }
                Ok(())
            }
            None => {
                // Reading a nil/NaN key is fine; only insertion raises. A nil
                // store to an illegal key is a no-op, matching reference Lua.
                if value.is_nil() {
                    return Ok(());
                }
                Err(if key.is_nil() {
                    KeyError::Nil
                } else {
                    KeyError::NaN
                })
            }
        }
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        let len = self.array.len();
        if i >= 1 && (i as usize) <= len {
            self.array[i as usize - 1] = value;
            return;
        }
        if i as usize == len + 1 && i >= 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_hash();
            return;
        }
        if value.is_nil() {
            self.hash.remove(&TableKey::Integer(i));
        } else {
            self.hash.insert(TableKey::Integer(i), value);
        }
    }

    /// After an append, pull any now-contiguous integer keys out of the hash
    /// part so the array part stays dense.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            match self.hash.remove(&TableKey::Integer(next)) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// The length operator: some border `n` with `t[n]` non-nil and `t[n+1]`
    /// nil (0 for an empty table).
    pub fn length(&self) -> i64 {
        let n = self.array.len();
        if n == 0 || self.array[n - 1].is_nil() {
            // A hole (or nothing) inside the array part: binary search for a
            // border there; an empty array part may still have t[1] in hash.
            if n == 0 {
                return self.hash_border(0);
            }
            let (mut lo, mut hi) = (0usize, n);
            // invariant: array[lo-1] non-nil (or lo == 0), array[hi-1] nil
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            lo as i64
        } else {
            // Array part is full to its end; the border may extend into the
            // hash part.
            self.hash_border(n as i64)
        }
    }

    fn hash_border(&self, mut n: i64) -> i64 {
        if n == 0 && !self.hash.contains_key(&TableKey::Integer(1)) {
            return 0;
        }
        while self.hash.contains_key(&TableKey::Integer(n + 1)) {
            n += 1;
        }
        n
    }

    /// Stateless iteration protocol backing `next`/`pairs`. `None` input
    /// starts the traversal; returns `None` when exhausted, `Err` when the
    /// key is not present in the table.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, ()> {
        // Phase 1: array part.
        let start = if key.is_nil() {
            0
        } else if let Some(TableKey::Integer(i)) = TableKey::from_value(key) {
            if i >= 1 && (i as usize) <= self.array.len() {
                i as usize
            } else {
                return self.next_hash(key);
            }
        } else {
            return self.next_hash(key);
        };
        for idx in start..self.array.len() {
            if !self.array[idx].is_nil() {
                return Ok(Some((Value::Integer(idx as i64 + 1), self.array[idx])));
            }
        }
        // Fell off the array part: first hash entry.
        Ok(self.first_hash_entry())
    }

    fn first_hash_entry(&self) -> Option<(Value, Value)> {
        self.hash.iter().next().map(|(k, v)| (k.to_value(), *v))
    }

    fn next_hash(&self, key: &Value) -> Result<Option<(Value, Value)>, ()> {
        let Some(k) = TableKey::from_value(key) else {
            return Err(());
        };
        let mut it = self.hash.iter();
        for (candidate, _) in it.by_ref() {
            if *candidate == k {
                return Ok(it.next().map(|(k, v)| (k.to_value(), *v)));
            }
        }
        Err(())
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    /// Iterate all slots for GC marking.
    pub fn iter_all(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.array
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Integer(i as i64 + 1), *v))
            .chain(self.hash.iter().map(|(k, v)| (k.to_value(), *v)))
    }

    /// Rough byte footprint for GC accounting.
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.array.capacity() * std::mem::size_of::<Value>()
            + self.hash.capacity() * (std::mem::size_of::<TableKey>() + std::mem::size_of::<Value>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_append_and_get() {
        let mut t = LuaTable::new(0, 0);
        t.set_int(1, Value::Integer(10));
        t.set_int(2, Value::Integer(20));
        assert!(t.get_int(1).raw_equals(&Value::Integer(10)));
        assert!(t.get_int(2).raw_equals(&Value::Integer(20)));
        assert!(t.get_int(3).is_nil());
        assert_eq!(t.length(), 2);
    }

    #[test]
    fn test_hash_migration() {
        let mut t = LuaTable::new(0, 0);
        t.set_int(2, Value::Boolean(true));
        t.set_int(3, Value::Boolean(true));
        assert_eq!(t.array_len(), 0);
        t.set_int(1, Value::Boolean(true));
        // 2 and 3 migrate once 1 closes the gap
        assert_eq!(t.array_len(), 3);
        assert_eq!(t.length(), 3);
    }

    #[test]
    fn test_border_with_hole() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=5 {
            t.set_int(i, Value::Integer(i));
        }
        t.set_int(4, Value::Nil);
        let n = t.length();
        // any border is acceptable: 3 or 5
        assert!(n == 3 || n == 5, "border was {n}");
    }

    #[test]
    fn test_nil_key_rejected() {
        let mut t = LuaTable::new(0, 0);
        assert_eq!(t.set(Value::Nil, Value::Integer(1)), Err(KeyError::Nil));
        assert_eq!(
            t.set(Value::Float(f64::NAN), Value::Integer(1)),
            Err(KeyError::NaN)
        );
        // nil value stores to bad keys are ignored
        assert_eq!(t.set(Value::Nil, Value::Nil), Ok(()));
    }

    #[test]
    fn test_float_key_normalization() {
        let mut t = LuaTable::new(0, 0);
        t.set(Value::Float(2.0), Value::Integer(7)).unwrap();
        assert!(t.get(&Value::Integer(2)).raw_equals(&Value::Integer(7)));
    }

    #[test]
    fn test_next_traversal() {
        let mut t = LuaTable::new(0, 0);
        t.set_int(1, Value::Integer(100));
        t.set_int(2, Value::Integer(200));
        let mut count = 0;
        let mut key = Value::Nil;
        while let Ok(Some((k, _))) = t.next(&key) {
            count += 1;
            key = k;
            if count > 10 {
                break;
            }
        }
        assert_eq!(count, 2);
    }
}
