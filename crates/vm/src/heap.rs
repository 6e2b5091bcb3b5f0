//! Pseudo-heap handles and the object registry.
//!
//! Pseudo-objects are shared-ownership cells; the host garbage collector is
//! the drop of the last strong handle. Identity is pointer identity, which
//! the snapshot encoder uses for first-visit numbering.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::object::PsObject;
use crate::value::Value;

/// Stable identity key for a pseudo-object (valid while the object lives).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PtrKey(usize);

impl PtrKey {
    /// Builds a key from a raw allocation address (scope handles share the
    /// same identity space).
    pub(crate) fn from_raw(raw: usize) -> Self {
        PtrKey(raw)
    }
}

/// Strong handle to a pseudo-object.
#[derive(Clone)]
pub struct ObjRef(Rc<RefCell<PsObject>>);

impl ObjRef {
    /// Allocates a pseudo-object on the pseudo-heap.
    pub fn new(obj: PsObject) -> Self {
        ObjRef(Rc::new(RefCell::new(obj)))
    }

    /// Borrows the object immutably.
    pub fn borrow(&self) -> Ref<'_, PsObject> {
        self.0.borrow()
    }

    /// Borrows the object mutably.
    pub fn borrow_mut(&self) -> RefMut<'_, PsObject> {
        self.0.borrow_mut()
    }

    /// Returns true when both handles address the same object.
    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the identity key of the referenced object.
    pub fn ptr_key(&self) -> PtrKey {
        PtrKey(Rc::as_ptr(&self.0) as usize)
    }

    /// Creates a weak handle that does not extend the object's lifetime.
    pub fn downgrade(&self) -> WeakObjRef {
        WeakObjRef(Rc::downgrade(&self.0))
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr_key().hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(obj) => write!(f, "ObjRef({})", obj.class().name()),
            Err(_) => write!(f, "ObjRef(<borrowed>)"),
        }
    }
}

/// Weak handle to a pseudo-object.
#[derive(Clone)]
pub struct WeakObjRef(Weak<RefCell<PsObject>>);

impl WeakObjRef {
    /// Upgrades to a strong handle if the object is still alive.
    pub fn upgrade(&self) -> Option<ObjRef> {
        self.0.upgrade().map(ObjRef)
    }

    /// Returns true when the referent has been collected.
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dead() {
            write!(f, "WeakObjRef(<dead>)")
        } else {
            write!(f, "WeakObjRef(<live>)")
        }
    }
}

/// Deterministic bidirectional name-to-object table.
///
/// Holds the world's named singletons and gives the snapshot encoder
/// human-meaningful roots. Iteration follows registration order.
#[derive(Debug, Default)]
pub struct Registry {
    by_name: IndexMap<String, ObjRef>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `obj` under `name`, replacing any previous binding.
    pub fn register<S: Into<String>>(&mut self, name: S, obj: ObjRef) {
        self.by_name.insert(name.into(), obj);
    }

    /// Removes the binding for `name`, returning the object if present.
    pub fn unregister(&mut self, name: &str) -> Option<ObjRef> {
        self.by_name.shift_remove(name)
    }

    /// Looks an object up by name.
    pub fn get(&self, name: &str) -> Option<&ObjRef> {
        self.by_name.get(name)
    }

    /// Reverse lookup: the first name bound to `obj`.
    pub fn name_of(&self, obj: &ObjRef) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, o)| o.ptr_eq(obj))
            .map(|(name, _)| name.as_str())
    }

    /// Iterates bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjRef)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registry values for the pseudo-heap walk.
    pub(crate) fn objects(&self) -> impl Iterator<Item = &ObjRef> {
        self.by_name.values()
    }
}

/// Registry entries rendered as values (registry names are user-visible).
impl Registry {
    /// Looks an object up and returns it as a [`Value`].
    pub fn get_value(&self, name: &str) -> Value {
        self.get(name)
            .map(|o| Value::Object(o.clone()))
            .unwrap_or(Value::Undefined)
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
    fn identity_is_pointer_identity() {
        let a = blank();
        let b = a.clone();
        let c = blank();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.ptr_key(), b.ptr_key());
        assert_ne!(a.ptr_key(), c.ptr_key());
    }

    #[test]
    fn weak_handles_do_not_extend_lifetime() {
        let a = blank();
        let w = a.downgrade();
        assert!(w.upgrade().is_some());
        drop(a);
        assert!(w.is_dead());
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn registry_round_trips_names() {
        let mut registry = Registry::new();
        let a = blank();
        let b = blank();
        registry.register("root", a.clone());
        registry.register("clock", b.clone());

        assert!(registry.get("root").unwrap().ptr_eq(&a));
        assert_eq!(registry.name_of(&b), Some("clock"));
        let names: Vec<&str> = registry.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["root", "clock"]);

        registry.unregister("root");
        assert!(registry.get("root").is_none());
        assert_eq!(registry.len(), 1);
    }
}
