use core::fmt;
use std::str::FromStr;

use crate::{
    descriptor::PropertyDescriptor,
    error::Result,
    key::PropertyKey,
    object::ObjectRef,
    reflect,
    value::Value,
};

/// The thirteen intercepted meta-object operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trap {
    Get,
    Set,
    Has,
    DeleteProperty,
    OwnKeys,
    GetOwnPropertyDescriptor,
    DefineProperty,
    GetPrototypeOf,
    SetPrototypeOf,
    IsExtensible,
    PreventExtensions,
    Apply,
    Construct,
}

impl Trap {
    /// Every trap, in canonical order.
    pub const ALL: [Trap; 13] = [
        Trap::Get,
        Trap::Set,
        Trap::Has,
        Trap::DeleteProperty,
        Trap::OwnKeys,
        Trap::GetOwnPropertyDescriptor,
        Trap::DefineProperty,
        Trap::GetPrototypeOf,
        Trap::SetPrototypeOf,
        Trap::IsExtensible,
        Trap::PreventExtensions,
        Trap::Apply,
        Trap::Construct,
    ];

    /// The wire name of the trap, as used in configuration catalogs.
    pub fn name(self) -> &'static str {
        match self {
            Trap::Get => "get",
            Trap::Set => "set",
            Trap::Has => "has",
            Trap::DeleteProperty => "deleteProperty",
            Trap::OwnKeys => "ownKeys",
            Trap::GetOwnPropertyDescriptor => "getOwnPropertyDescriptor",
            Trap::DefineProperty => "defineProperty",
            Trap::GetPrototypeOf => "getPrototypeOf",
            Trap::SetPrototypeOf => "setPrototypeOf",
            Trap::IsExtensible => "isExtensible",
            Trap::PreventExtensions => "preventExtensions",
            Trap::Apply => "apply",
            Trap::Construct => "construct",
        }
    }

    /// Bit position used by trap masks.
    pub(crate) fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a trap name does not match any trap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownTrap(pub String);

impl fmt::Display for UnknownTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown trap name: {}", self.0)
    }
}

impl std::error::Error for UnknownTrap {}

impl FromStr for Trap {
    type Err = UnknownTrap;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trap::ALL
            .into_iter()
            .find(|trap| trap.name() == s)
            .ok_or_else(|| UnknownTrap(s.to_string()))
    }
}

/// A set of traps, stored as a bit mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapSet(u16);

impl TrapSet {
    pub fn insert(&mut self, trap: Trap) {
        self.0 |= trap.bit();
    }

    pub fn remove(&mut self, trap: Trap) {
        self.0 &= !trap.bit();
    }

    pub fn contains(self, trap: Trap) -> bool {
        self.0 & trap.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Trap> for TrapSet {
    fn from_iter<I: IntoIterator<Item = Trap>>(iter: I) -> Self {
        let mut set = TrapSet::default();
        for trap in iter {
            set.insert(trap);
        }
        set
    }
}

/// Handler for a proxy object.
///
/// Every method receives the proxy's *apparent target* and defaults to
/// the ordinary operation on it, so partial handlers only override the
/// traps they interpose on. Implementations raise their own error types
/// through [`Error::host`](crate::Error::host).
pub trait ProxyTraps {
    fn get(&self, target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
        reflect::get(target, key, receiver)
    }

    fn set(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> Result<bool> {
        reflect::set(target, key, value, receiver)
    }

    fn has(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        reflect::has(target, key)
    }

    fn delete_property(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        reflect::delete_property(target, key)
    }

    fn own_keys(&self, target: &ObjectRef) -> Result<Vec<PropertyKey>> {
        reflect::own_keys(target)
    }

    fn get_own_property_descriptor(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>> {
        reflect::get_own_property_descriptor(target, key)
    }

    fn define_property(
        &self,
        target: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool> {
        reflect::define_property(target, key, desc)
    }

    fn get_prototype_of(&self, target: &ObjectRef) -> Result<Option<ObjectRef>> {
        reflect::get_prototype_of(target)
    }

    fn set_prototype_of(&self, target: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
        reflect::set_prototype_of(target, prototype)
    }

    fn is_extensible(&self, target: &ObjectRef) -> Result<bool> {
        reflect::is_extensible(target)
    }

    fn prevent_extensions(&self, target: &ObjectRef) -> Result<bool> {
        reflect::prevent_extensions(target)
    }

    fn apply(&self, target: &ObjectRef, this: Value, args: &[Value]) -> Result<Value> {
        reflect::apply(target, this, args)
    }

    fn construct(&self, target: &ObjectRef, args: &[Value], new_target: &ObjectRef)
        -> Result<Value> {
        reflect::construct(target, args, new_target)
    }
}

/// The do-nothing handler: every trap forwards to the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct Forwarding;

impl ProxyTraps for Forwarding {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_names_round_trip() {
        for trap in Trap::ALL {
            assert_eq!(trap.name().parse::<Trap>(), Ok(trap));
        }
        assert!("notATrap".parse::<Trap>().is_err());
    }

    #[test]
    fn trap_set_tracks_membership() {
        let mut set = TrapSet::default();
        assert!(set.is_empty());
        set.insert(Trap::Get);
        set.insert(Trap::OwnKeys);
        assert!(set.contains(Trap::Get));
        assert!(!set.contains(Trap::Set));
        set.remove(Trap::Get);
        assert!(!set.contains(Trap::Get));
    }
}
