//! Pseudo-object layout for the burrow interpreter.
//!
//! A pseudo-object carries a prototype link, an insertion-ordered property
//! table, an extensibility flag, a class tag, and class-specific internal
//! slots. Special serialization handling is keyed off the class tag, never
//! off prototype identity.

use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use burrow_ast::NodeIx;

use crate::heap::ObjRef;
use crate::host::HostResource;
use crate::scope::ScopeRef;
use crate::value::Value;
use crate::weak::{IterableWeakMap, IterableWeakSet};

/// Class of a pseudo-object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassTag {
    Object,
    Function,
    Array,
    Date,
    RegExp,
    Error,
    Arguments,
    Map,
    Set,
    WeakMap,
    WeakSet,
    Thread,
    Box,
    Server,
}

impl ClassTag {
    /// Returns the class name used in `[object …]` rendering and records.
    pub fn name(&self) -> &'static str {
        match self {
            ClassTag::Object => "Object",
            ClassTag::Function => "Function",
            ClassTag::Array => "Array",
            ClassTag::Date => "Date",
            ClassTag::RegExp => "RegExp",
            ClassTag::Error => "Error",
            ClassTag::Arguments => "Arguments",
            ClassTag::Map => "Map",
            ClassTag::Set => "Set",
            ClassTag::WeakMap => "WeakMap",
            ClassTag::WeakSet => "WeakSet",
            ClassTag::Thread => "Thread",
            ClassTag::Box => "Box",
            ClassTag::Server => "Server",
        }
    }
}

bitflags! {
    /// Attribute bits of one property slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyAttrs: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl Default for PropertyAttrs {
    fn default() -> Self {
        PropertyAttrs::all()
    }
}

/// One property slot.
#[derive(Debug, Clone)]
pub struct Property {
    pub value: Value,
    pub attrs: PropertyAttrs,
}

impl Property {
    /// A plain writable/enumerable/configurable data property.
    pub fn plain(value: Value) -> Self {
        Self {
            value,
            attrs: PropertyAttrs::all(),
        }
    }

    /// A property hidden from enumeration.
    pub fn hidden(value: Value) -> Self {
        Self {
            value,
            attrs: PropertyAttrs::WRITABLE | PropertyAttrs::CONFIGURABLE,
        }
    }

    /// A locked property (not writable, not enumerable, not configurable).
    pub fn locked(value: Value) -> Self {
        Self {
            value,
            attrs: PropertyAttrs::empty(),
        }
    }
}

/// Callable payload of a `Function`-class object.
#[derive(Debug)]
pub enum FunctionSlots {
    /// Host-implemented built-in, identified by its stable table id
    Native { id: String },
    /// Source-defined closure
    Declared {
        params: Vec<String>,
        body: NodeIx,
        scope: ScopeRef,
        name: Option<String>,
    },
}

/// Class-specific internal slots.
#[derive(Debug, Default)]
pub enum InternalSlots {
    #[default]
    None,
    Function(FunctionSlots),
    /// Milliseconds since the epoch
    Date(f64),
    RegExp {
        source: String,
        flags: String,
    },
    /// Insertion-ordered entries, keyed by SameValueZero
    Map(Vec<(Value, Value)>),
    /// Insertion-ordered members, deduplicated by SameValueZero
    Set(Vec<Value>),
    WeakMap(IterableWeakMap),
    WeakSet(IterableWeakSet),
    /// Interpreter thread id
    Thread(u64),
    /// Host socket back-slot; never serialized, null after restore
    Server(Option<Box<dyn HostResource>>),
}

/// A user-level object in the pseudo-heap.
#[derive(Debug)]
pub struct PsObject {
    class: ClassTag,
    proto: Option<ObjRef>,
    props: IndexMap<String, Property>,
    extensible: bool,
    slots: InternalSlots,
}

impl PsObject {
    /// Creates an empty object of the given class.
    pub fn new(class: ClassTag, proto: Option<ObjRef>) -> Self {
        Self {
            class,
            proto,
            props: IndexMap::new(),
            extensible: true,
            slots: InternalSlots::None,
        }
    }

    /// Creates an object with internal slots.
    pub fn with_slots(class: ClassTag, proto: Option<ObjRef>, slots: InternalSlots) -> Self {
        Self {
            class,
            proto,
            props: IndexMap::new(),
            extensible: true,
            slots,
        }
    }

    /// Returns the class tag.
    pub fn class(&self) -> ClassTag {
        self.class
    }

    /// Returns the prototype link.
    pub fn proto(&self) -> Option<ObjRef> {
        self.proto.clone()
    }

    /// Sets the prototype link without cycle checking (decode internals).
    pub(crate) fn set_proto_unchecked(&mut self, proto: Option<ObjRef>) {
        self.proto = proto;
    }

    /// Returns the internal slots.
    pub fn slots(&self) -> &InternalSlots {
        &self.slots
    }

    /// Returns the internal slots mutably.
    pub fn slots_mut(&mut self) -> &mut InternalSlots {
        &mut self.slots
    }

    /// Replaces the internal slots (decode internals).
    pub(crate) fn set_slots(&mut self, slots: InternalSlots) {
        self.slots = slots;
    }

    /// Returns the own property slot for `key`.
    pub fn own(&self, key: &str) -> Option<&Property> {
        self.props.get(key)
    }

    /// Returns the own property value for `key`.
    pub fn own_value(&self, key: &str) -> Option<Value> {
        self.props.get(key).map(|p| p.value.clone())
    }

    /// Returns the value for `key`, consulting the prototype chain.
    pub fn lookup_value(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.own_value(key) {
            return Some(v);
        }
        let mut cursor = self.proto.clone();
        while let Some(obj) = cursor {
            let borrowed = obj.borrow();
            if let Some(v) = borrowed.own_value(key) {
                return Some(v);
            }
            cursor = borrowed.proto();
        }
        None
    }

    /// Returns true when `key` exists on this object or its chain.
    pub fn has(&self, key: &str) -> bool {
        self.lookup_value(key).is_some() || self.own(key).is_some()
    }

    /// Own property names in insertion order.
    pub fn own_keys(&self) -> Vec<String> {
        self.props.keys().cloned().collect()
    }

    /// Own enumerable property names in insertion order.
    pub fn enumerable_keys(&self) -> Vec<String> {
        self.props
            .iter()
            .filter(|(_, p)| p.attrs.contains(PropertyAttrs::ENUMERABLE))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Iterates own properties in insertion order.
    pub fn props(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.props.iter().map(|(k, p)| (k.as_str(), p))
    }

    /// Number of own properties.
    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Writes a property following the language's assignment rules.
    ///
    /// Returns false when the write was rejected (non-writable slot, or a
    /// new property on a non-extensible object).
    pub fn set_prop(&mut self, key: &str, value: Value) -> bool {
        if self.class == ClassTag::Array {
            if key == "length" {
                return self.set_array_length(value);
            }
            if let Some(index) = array_index(key) {
                let ok = self.set_plain_prop(key, value);
                if ok {
                    let len = array_length(self);
                    if index >= len {
                        let slot = self
                            .props
                            .entry("length".to_string())
                            .or_insert_with(|| Property::hidden(Value::Number(0.0)));
                        slot.value = Value::Number((index + 1) as f64);
                    }
                }
                return ok;
            }
        }
        self.set_plain_prop(key, value)
    }

    fn set_plain_prop(&mut self, key: &str, value: Value) -> bool {
        if let Some(slot) = self.props.get_mut(key) {
            if !slot.attrs.contains(PropertyAttrs::WRITABLE) {
                return false;
            }
            slot.value = value;
            return true;
        }
        if !self.extensible {
            return false;
        }
        self.props.insert(key.to_string(), Property::plain(value));
        true
    }

    fn set_array_length(&mut self, value: Value) -> bool {
        let requested = value.to_number();
        let new_len = requested as u32;
        if f64::from(new_len) != requested {
            // A non-index length is kept as a plain write; the invariant
            // only covers canonical lengths.
            return self.set_plain_prop("length", value);
        }
        let doomed: Vec<String> = self
            .props
            .keys()
            .filter(|k| array_index(k).is_some_and(|i| i >= new_len))
            .cloned()
            .collect();
        for key in doomed {
            self.props.shift_remove(&key);
        }
        let slot = self
            .props
            .entry("length".to_string())
            .or_insert_with(|| Property::hidden(Value::Number(0.0)));
        slot.value = Value::Number(f64::from(new_len));
        true
    }

    /// Installs a property with explicit attributes, bypassing assignment
    /// rules (object construction and snapshot decode).
    pub fn install_prop(&mut self, key: &str, prop: Property) {
        self.props.insert(key.to_string(), prop);
    }

    /// Deletes an own property; false when it is non-configurable.
    pub fn delete_prop(&mut self, key: &str) -> bool {
        match self.props.get(key) {
            None => true,
            Some(slot) if slot.attrs.contains(PropertyAttrs::CONFIGURABLE) => {
                self.props.shift_remove(key);
                true
            }
            Some(_) => false,
        }
    }

    /// Returns true while new properties may be added.
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    /// Forbids property additions from now on.
    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }
}

/// Canonical array index of a property key, if it is one.
pub fn array_index(key: &str) -> Option<u32> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    let index: u32 = key.parse().ok()?;
    // u32::MAX is reserved by the length invariant.
    if index == u32::MAX {
        return None;
    }
    Some(index)
}

/// Current `length` of an array object.
pub fn array_length(obj: &PsObject) -> u32 {
    obj.own_value("length")
        .map(|v| v.to_number() as u32)
        .unwrap_or(0)
}

/// Reads `key` from `obj` or its prototype chain.
pub fn get_property(obj: &ObjRef, key: &str) -> Option<Value> {
    obj.borrow().lookup_value(key)
}

/// Returns true when `key` exists anywhere on the chain.
pub fn has_property(obj: &ObjRef, key: &str) -> bool {
    get_property(obj, key).is_some() || obj.borrow().own(key).is_some()
}

/// Sets the prototype link, rejecting chains that would become cyclic.
pub fn set_prototype(obj: &ObjRef, proto: Option<ObjRef>) -> Result<(), ()> {
    let mut cursor = proto.clone();
    while let Some(candidate) = cursor {
        if candidate.ptr_eq(obj) {
            return Err(());
        }
        cursor = candidate.borrow().proto();
    }
    obj.borrow_mut().set_proto_unchecked(proto);
    Ok(())
}

/// Returns true when `proto` appears on `obj`'s prototype chain.
pub fn proto_chain_contains(obj: &ObjRef, proto: &ObjRef) -> bool {
    let mut cursor = obj.borrow().proto();
    while let Some(candidate) = cursor {
        if candidate.ptr_eq(proto) {
            return true;
        }
        cursor = candidate.borrow().proto();
    }
    false
}

/// Keys visited by `for (k in obj)`: own then inherited enumerable keys,
/// first occurrence wins.
pub fn enumerate_keys(obj: &ObjRef) -> Vec<String> {
    let mut keys = Vec::new();
    let mut cursor = Some(obj.clone());
    while let Some(current) = cursor {
        let borrowed = current.borrow();
        for key in borrowed.enumerable_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        cursor = borrowed.proto();
    }
    keys
}

const DAY_MS: i64 = 86_400_000;

/// Formats a timestamp as ISO-8601 (`YYYY-MM-DDTHH:MM:SS.mmmZ`).
pub fn format_date_iso(ms: f64) -> String {
    if !ms.is_finite() {
        return "Invalid Date".to_string();
    }
    let total = ms as i64;
    let mut days = total.div_euclid(DAY_MS);
    let mut rem = total.rem_euclid(DAY_MS);
    if rem < 0 {
        rem += DAY_MS;
        days -= 1;
    }
    let (year, month, day) = civil_from_days(days);
    let hour = rem / 3_600_000;
    let minute = rem % 3_600_000 / 60_000;
    let second = rem % 60_000 / 1_000;
    let millis = rem % 1_000;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
}

/// Parses the ISO-8601 form produced by [`format_date_iso`].
pub fn parse_date_iso(text: &str) -> Option<f64> {
    let (date, time) = text.split_once('T')?;
    let time = time.strip_suffix('Z')?;

    let mut date_parts = date.splitn(3, '-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: i64 = date_parts.next()?.parse().ok()?;
    let day: i64 = date_parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let mut time_parts = time.splitn(3, ':');
    let hour: i64 = time_parts.next()?.parse().ok()?;
    let minute: i64 = time_parts.next()?.parse().ok()?;
    let second_text = time_parts.next()?;
    let (second, millis) = match second_text.split_once('.') {
        Some((s, m)) => {
            let millis: i64 = m.parse().ok()?;
            if m.len() != 3 {
                return None;
            }
            (s.parse::<i64>().ok()?, millis)
        }
        None => (second_text.parse().ok()?, 0),
    };
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let days = days_from_civil(year, month, day);
    Some((days * DAY_MS + hour * 3_600_000 + minute * 60_000 + second * 1_000 + millis) as f64)
}

// Civil calendar conversion (proleptic Gregorian).
fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
