//! Iterable weak containers.
//!
//! Entries do not extend their key's lifetime. Dead entries become invisible
//! at the next observation (`size`, `has`, `get`, iteration), which is also
//! when they are dropped; insertion order of the survivors is preserved.

use crate::heap::{ObjRef, WeakObjRef};
use crate::value::Value;

/// Weak-keyed associative table with deterministic iteration.
#[derive(Debug, Default)]
pub struct IterableWeakMap {
    entries: Vec<(WeakObjRef, Value)>,
}

impl IterableWeakMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn compact(&mut self) {
        self.entries.retain(|(key, _)| !key.is_dead());
    }

    /// Number of live entries.
    pub fn size(&mut self) -> usize {
        self.compact();
        self.entries.len()
    }

    /// Returns true when `key` is a live entry.
    pub fn has(&mut self, key: &ObjRef) -> bool {
        self.compact();
        self.entries
            .iter()
            .any(|(k, _)| k.upgrade().is_some_and(|k| k.ptr_eq(key)))
    }

    /// Returns the value bound to `key`.
    pub fn get(&mut self, key: &ObjRef) -> Option<Value> {
        self.compact();
        self.entries
            .iter()
            .find(|(k, _)| k.upgrade().is_some_and(|k| k.ptr_eq(key)))
            .map(|(_, v)| v.clone())
    }

    /// Binds `key` to `value`, replacing an existing binding.
    pub fn set(&mut self, key: &ObjRef, value: Value) {
        self.compact();
        for (k, v) in &mut self.entries {
            if k.upgrade().is_some_and(|k| k.ptr_eq(key)) {
                *v = value;
                return;
            }
        }
        self.entries.push((key.downgrade(), value));
    }

    /// Removes the binding for `key`; false when absent.
    pub fn delete(&mut self, key: &ObjRef) -> bool {
        self.compact();
        let before = self.entries.len();
        self.entries
            .retain(|(k, _)| !k.upgrade().is_some_and(|k| k.ptr_eq(key)));
        self.entries.len() != before
    }

    /// Live entries in insertion order.
    pub fn iter_live(&mut self) -> Vec<(ObjRef, Value)> {
        self.compact();
        self.entries
            .iter()
            .filter_map(|(k, v)| k.upgrade().map(|k| (k, v.clone())))
            .collect()
    }
}

/// Weak membership set with deterministic iteration.
#[derive(Debug, Default)]
pub struct IterableWeakSet {
    members: Vec<WeakObjRef>,
}

impl IterableWeakSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn compact(&mut self) {
        self.members.retain(|member| !member.is_dead());
    }

    /// Number of live members.
    pub fn size(&mut self) -> usize {
        self.compact();
        self.members.len()
    }

    /// Returns true when `obj` is a live member.
    pub fn has(&mut self, obj: &ObjRef) -> bool {
        self.compact();
        self.members
            .iter()
            .any(|m| m.upgrade().is_some_and(|m| m.ptr_eq(obj)))
    }

    /// Adds `obj`; a second add of the same object is a no-op.
    pub fn add(&mut self, obj: &ObjRef) {
        if !self.has(obj) {
            self.members.push(obj.downgrade());
        }
    }

    /// Removes `obj`; false when absent.
    pub fn delete(&mut self, obj: &ObjRef) -> bool {
        self.compact();
        let before = self.members.len();
        self.members
            .retain(|m| !m.upgrade().is_some_and(|m| m.ptr_eq(obj)));
        self.members.len() != before
    }

    /// Live members in insertion order.
    pub fn iter_live(&mut self) -> Vec<ObjRef> {
        self.compact();
        self.members
            .iter()
            .filter_map(WeakObjRef::upgrade)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ClassTag, PsObject};

    fn blank() -> ObjRef {
        ObjRef::new(PsObject::new(ClassTag::Object, None))
    }

    #[test]
    fn dead_keys_vanish_on_observation() {
        let mut set = IterableWeakSet::new();
        let a = blank();
        let b = blank();
        let c = blank();
        set.add(&a);
        set.add(&b);
        set.add(&c);
        assert_eq!(set.size(), 3);

        drop(b);
        assert_eq!(set.size(), 2);
        let survivors = set.iter_live();
        assert!(survivors[0].ptr_eq(&a));
        assert!(survivors[1].ptr_eq(&c));
    }

    #[test]
    fn map_replaces_existing_binding() {
        let mut map = IterableWeakMap::new();
        let key = blank();
        map.set(&key, Value::Number(1.0));
        map.set(&key, Value::Number(2.0));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&key).map(|v| v.to_number()), Some(2.0));
        assert!(map.delete(&key));
        assert!(!map.delete(&key));
    }

    #[test]
    fn container_does_not_extend_lifetime() {
        let mut map = IterableWeakMap::new();
        let key = blank();
        let weak = key.downgrade();
        map.set(&key, Value::Str("v".into()));
        drop(key);
        assert!(weak.upgrade().is_none());
        assert_eq!(map.size(), 0);
        assert!(map.iter_live().is_empty());
    }

    #[test]
    fn set_add_is_idempotent() {
        let mut set = IterableWeakSet::new();
        let a = blank();
        set.add(&a);
        set.add(&a);
        assert_eq!(set.size(), 1);
    }
}
