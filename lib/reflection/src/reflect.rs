//! The operation surface of the object runtime.
//!
//! Every function dispatches to a proxy handler when the receiver is a
//! proxy and otherwise runs the ordinary algorithm. After a handler
//! returns, the result is validated against the proxy's apparent target:
//! a handler may distort what it reports, but it may not contradict what
//! the apparent target has already committed to (non-configurable
//! properties, a locked key set, a pinned prototype).

use crate::{
    descriptor::PropertyDescriptor,
    error::{Error, Result},
    key::PropertyKey,
    object::{Object, ObjectRef},
    traps::Trap,
    value::Value,
};

pub fn get(target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::Get)?;
            let shadow = slots.target().clone();
            let result = slots.handler().get(&shadow, key, receiver)?;
            invariants::get(&shadow, key, &result)?;
            Ok(result)
        }
        None => ordinary_get(target, key, receiver),
    }
}

pub fn set(target: &ObjectRef, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::Set)?;
            let shadow = slots.target().clone();
            let accepted = slots.handler().set(&shadow, key, value.clone(), receiver)?;
            invariants::set(&shadow, key, &value, accepted)?;
            Ok(accepted)
        }
        None => ordinary_set(target, key, value, receiver),
    }
}

pub fn has(target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::Has)?;
            let shadow = slots.target().clone();
            let found = slots.handler().has(&shadow, key)?;
            invariants::has(&shadow, key, found)?;
            Ok(found)
        }
        None => ordinary_has(target, key),
    }
}

pub fn delete_property(target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::DeleteProperty)?;
            let shadow = slots.target().clone();
            let deleted = slots.handler().delete_property(&shadow, key)?;
            invariants::delete_property(&shadow, key, deleted)?;
            Ok(deleted)
        }
        None => ordinary_delete(target, key),
    }
}

pub fn own_keys(target: &ObjectRef) -> Result<Vec<PropertyKey>> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::OwnKeys)?;
            let shadow = slots.target().clone();
            let keys = slots.handler().own_keys(&shadow)?;
            invariants::own_keys(&shadow, &keys)?;
            Ok(keys)
        }
        None => Ok(target.own_keys_ordered()),
    }
}

pub fn get_own_property_descriptor(
    target: &ObjectRef,
    key: &PropertyKey,
) -> Result<Option<PropertyDescriptor>> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::GetOwnPropertyDescriptor)?;
            let shadow = slots.target().clone();
            let desc = slots.handler().get_own_property_descriptor(&shadow, key)?;
            invariants::get_own_property_descriptor(&shadow, key, desc.as_ref())?;
            Ok(desc)
        }
        None => Ok(target.own_property(key)),
    }
}

pub fn define_property(target: &ObjectRef, key: PropertyKey, desc: PropertyDescriptor) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::DefineProperty)?;
            let shadow = slots.target().clone();
            let defined = slots
                .handler()
                .define_property(&shadow, key.clone(), desc.clone())?;
            invariants::define_property(&shadow, &key, &desc, defined)?;
            Ok(defined)
        }
        None => ordinary_define(target, key, desc),
    }
}

pub fn get_prototype_of(target: &ObjectRef) -> Result<Option<ObjectRef>> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::GetPrototypeOf)?;
            let shadow = slots.target().clone();
            let prototype = slots.handler().get_prototype_of(&shadow)?;
            invariants::get_prototype_of(&shadow, prototype.as_ref())?;
            Ok(prototype)
        }
        None => Ok(target.prototype()),
    }
}

pub fn set_prototype_of(target: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::SetPrototypeOf)?;
            let shadow = slots.target().clone();
            let changed = slots
                .handler()
                .set_prototype_of(&shadow, prototype.clone())?;
            invariants::set_prototype_of(&shadow, prototype.as_ref(), changed)?;
            Ok(changed)
        }
        None => ordinary_set_prototype(target, prototype),
    }
}

pub fn is_extensible(target: &ObjectRef) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::IsExtensible)?;
            let shadow = slots.target().clone();
            let extensible = slots.handler().is_extensible(&shadow)?;
            invariants::is_extensible(&shadow, extensible)?;
            Ok(extensible)
        }
        None => Ok(target.extensible()),
    }
}

pub fn prevent_extensions(target: &ObjectRef) -> Result<bool> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::PreventExtensions)?;
            let shadow = slots.target().clone();
            let locked = slots.handler().prevent_extensions(&shadow)?;
            invariants::prevent_extensions(&shadow, locked)?;
            Ok(locked)
        }
        None => {
            target.ordinary_mut().extensible = false;
            Ok(true)
        }
    }
}

pub fn apply(target: &ObjectRef, this: Value, args: &[Value]) -> Result<Value> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::Apply)?;
            let shadow = slots.target().clone();
            slots.handler().apply(&shadow, this, args)
        }
        None => ordinary_apply(target, this, args),
    }
}

pub fn construct(target: &ObjectRef, args: &[Value], new_target: &ObjectRef) -> Result<Value> {
    match target.proxy_slots() {
        Some(slots) => {
            slots.check_revoked(Trap::Construct)?;
            let shadow = slots.target().clone();
            slots.handler().construct(&shadow, args, new_target)
        }
        None => ordinary_construct(target, args, new_target),
    }
}

fn ordinary_get(target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
    let own = target.own_property(key);
    match own {
        Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
        Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
            apply(&getter, receiver.clone(), &[])
        }
        Some(PropertyDescriptor::Accessor { get: None, .. }) => Ok(Value::Undefined),
        None => match target.prototype() {
            Some(parent) => get(&parent, key, receiver),
            None => Ok(Value::Undefined),
        },
    }
}

fn ordinary_set(target: &ObjectRef, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool> {
    let own = match target.own_property(key) {
        Some(own) => own,
        None => match target.prototype() {
            Some(parent) => return set(&parent, key, value, receiver),
            None => PropertyDescriptor::data(Value::Undefined),
        },
    };
    match own {
        PropertyDescriptor::Data { writable, .. } => {
            if !writable {
                return Ok(false);
            }
            let Some(receiver) = receiver.as_object() else {
                return Ok(false);
            };
            match get_own_property_descriptor(receiver, key)? {
                Some(PropertyDescriptor::Accessor { .. }) => Ok(false),
                Some(PropertyDescriptor::Data {
                    writable,
                    enumerable,
                    configurable,
                    ..
                }) => {
                    if !writable {
                        return Ok(false);
                    }
                    define_property(
                        receiver,
                        key.clone(),
                        PropertyDescriptor::Data {
                            value,
                            writable,
                            enumerable,
                            configurable,
                        },
                    )
                }
                None => define_property(receiver, key.clone(), PropertyDescriptor::data(value)),
            }
        }
        PropertyDescriptor::Accessor { set: Some(setter), .. } => {
            apply(&setter, receiver.clone(), std::slice::from_ref(&value))?;
            Ok(true)
        }
        PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
    }
}

fn ordinary_has(target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
    if target.has_own(key) {
        return Ok(true);
    }
    match target.prototype() {
        Some(parent) => has(&parent, key),
        None => Ok(false),
    }
}

fn ordinary_delete(target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
    match target.own_property(key) {
        None => Ok(true),
        Some(desc) if desc.configurable() => {
            target.ordinary_mut().properties.shift_remove(key);
            Ok(true)
        }
        Some(_) => Ok(false),
    }
}

fn ordinary_define(target: &ObjectRef, key: PropertyKey, desc: PropertyDescriptor) -> Result<bool> {
    match target.own_property(&key) {
        None => {
            if !target.extensible() {
                return Ok(false);
            }
        }
        Some(current) if !current.configurable() => {
            if desc.configurable() || desc.enumerable() != current.enumerable() {
                return Ok(false);
            }
            match (&current, &desc) {
                (
                    PropertyDescriptor::Data {
                        value: current_value,
                        writable: current_writable,
                        ..
                    },
                    PropertyDescriptor::Data {
                        value, writable, ..
                    },
                ) => {
                    if !current_writable && (*writable || !current_value.same(value)) {
                        return Ok(false);
                    }
                }
                (
                    PropertyDescriptor::Accessor {
                        get: current_get,
                        set: current_set,
                        ..
                    },
                    PropertyDescriptor::Accessor { get, set, .. },
                ) => {
                    if current_get != get || current_set != set {
                        return Ok(false);
                    }
                }
                _ => return Ok(false),
            }
        }
        Some(_) => {}
    }
    target.ordinary_mut().properties.insert(key, desc);
    Ok(true)
}

fn ordinary_set_prototype(target: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
    let current = target.prototype();
    let unchanged = match (&current, &prototype) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    };
    if unchanged {
        return Ok(true);
    }
    if !target.extensible() {
        return Ok(false);
    }
    // Reject prototype cycles over ordinary links; a proxy in the chain
    // terminates the walk.
    let mut cursor = prototype.clone();
    while let Some(link) = cursor {
        if link.ptr_eq(target) {
            return Ok(false);
        }
        if link.is_proxy() {
            break;
        }
        cursor = link.prototype();
    }
    target.set_prototype(prototype);
    Ok(true)
}

fn ordinary_apply(target: &ObjectRef, this: Value, args: &[Value]) -> Result<Value> {
    let call = match target.function_slot() {
        Some(slot) => slot.call.clone(),
        None => return Err(Error::NotCallable),
    };
    call(this, args)
}

fn ordinary_construct(target: &ObjectRef, args: &[Value], new_target: &ObjectRef) -> Result<Value> {
    let slot = match target.function_slot() {
        Some(slot) => slot.clone(),
        None => return Err(Error::NotConstructible),
    };
    if let Some(construct) = slot.construct {
        return construct(args, new_target);
    }
    let prototype = get(
        new_target,
        &PropertyKey::from("prototype"),
        &Value::Object(new_target.clone()),
    )?;
    let created = Object::new_plain(prototype.as_object().cloned());
    let result = (slot.call)(Value::Object(created.clone()), args)?;
    Ok(match result {
        Value::Object(object) => Value::Object(object),
        _ => Value::Object(created),
    })
}

/// Post-trap validation against the apparent target.
mod invariants {
    use super::*;

    fn violation(trap: Trap, reason: impl Into<String>) -> Error {
        Error::InvariantViolation {
            trap,
            reason: reason.into(),
        }
    }

    pub(super) fn get(shadow: &ObjectRef, key: &PropertyKey, result: &Value) -> Result<()> {
        let Some(desc) = super::get_own_property_descriptor(shadow, key)? else {
            return Ok(());
        };
        if desc.configurable() {
            return Ok(());
        }
        match &desc {
            PropertyDescriptor::Data {
                value,
                writable: false,
                ..
            } if !result.same(value) => Err(violation(
                Trap::Get,
                format!("non-configurable, non-writable property '{key}' reported with a different value"),
            )),
            PropertyDescriptor::Accessor { get: None, .. } if !matches!(result, Value::Undefined) => {
                Err(violation(
                    Trap::Get,
                    format!("property '{key}' has no getter but a value was reported"),
                ))
            }
            _ => Ok(()),
        }
    }

    pub(super) fn set(shadow: &ObjectRef, key: &PropertyKey, value: &Value, accepted: bool) -> Result<()> {
        if !accepted {
            return Ok(());
        }
        let Some(desc) = super::get_own_property_descriptor(shadow, key)? else {
            return Ok(());
        };
        if desc.configurable() {
            return Ok(());
        }
        match &desc {
            PropertyDescriptor::Data {
                value: pinned,
                writable: false,
                ..
            } if !value.same(pinned) => Err(violation(
                Trap::Set,
                format!("non-configurable, non-writable property '{key}' cannot change value"),
            )),
            PropertyDescriptor::Accessor { set: None, .. } => Err(violation(
                Trap::Set,
                format!("property '{key}' has no setter but the assignment was accepted"),
            )),
            _ => Ok(()),
        }
    }

    pub(super) fn has(shadow: &ObjectRef, key: &PropertyKey, found: bool) -> Result<()> {
        if found {
            return Ok(());
        }
        if let Some(desc) = super::get_own_property_descriptor(shadow, key)? {
            if !desc.configurable() {
                return Err(violation(
                    Trap::Has,
                    format!("non-configurable property '{key}' reported as absent"),
                ));
            }
            if !super::is_extensible(shadow)? {
                return Err(violation(
                    Trap::Has,
                    format!("property '{key}' of a non-extensible target reported as absent"),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn delete_property(shadow: &ObjectRef, key: &PropertyKey, deleted: bool) -> Result<()> {
        if !deleted {
            return Ok(());
        }
        if let Some(desc) = super::get_own_property_descriptor(shadow, key)? {
            if !desc.configurable() {
                return Err(violation(
                    Trap::DeleteProperty,
                    format!("non-configurable property '{key}' reported as deleted"),
                ));
            }
            if !super::is_extensible(shadow)? {
                return Err(violation(
                    Trap::DeleteProperty,
                    format!("property '{key}' of a non-extensible target reported as deleted"),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn own_keys(shadow: &ObjectRef, keys: &[PropertyKey]) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key.clone()) {
                return Err(violation(Trap::OwnKeys, format!("duplicate key '{key}'")));
            }
        }
        let target_keys = super::own_keys(shadow)?;
        for key in &target_keys {
            let required = match super::get_own_property_descriptor(shadow, key)? {
                Some(desc) => !desc.configurable(),
                None => false,
            };
            if required && !seen.contains(key) {
                return Err(violation(
                    Trap::OwnKeys,
                    format!("non-configurable key '{key}' missing from the result"),
                ));
            }
        }
        if !super::is_extensible(shadow)? {
            for key in &target_keys {
                if !seen.contains(key) {
                    return Err(violation(
                        Trap::OwnKeys,
                        format!("key '{key}' of a non-extensible target missing from the result"),
                    ));
                }
            }
            let target_set: std::collections::HashSet<_> = target_keys.iter().cloned().collect();
            for key in keys {
                if !target_set.contains(key) {
                    return Err(violation(
                        Trap::OwnKeys,
                        format!("key '{key}' reported on a non-extensible target that lacks it"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(super) fn get_own_property_descriptor(
        shadow: &ObjectRef,
        key: &PropertyKey,
        result: Option<&PropertyDescriptor>,
    ) -> Result<()> {
        let target_desc = super::get_own_property_descriptor(shadow, key)?;
        match result {
            None => {
                if let Some(target_desc) = target_desc {
                    if !target_desc.configurable() {
                        return Err(violation(
                            Trap::GetOwnPropertyDescriptor,
                            format!("non-configurable property '{key}' reported as absent"),
                        ));
                    }
                    if !super::is_extensible(shadow)? {
                        return Err(violation(
                            Trap::GetOwnPropertyDescriptor,
                            format!("property '{key}' of a non-extensible target reported as absent"),
                        ));
                    }
                }
                Ok(())
            }
            Some(reported) if !reported.configurable() => {
                let Some(target_desc) = target_desc else {
                    return Err(violation(
                        Trap::GetOwnPropertyDescriptor,
                        format!("property '{key}' reported non-configurable but missing on the target"),
                    ));
                };
                if target_desc.configurable() {
                    return Err(violation(
                        Trap::GetOwnPropertyDescriptor,
                        format!("configurable property '{key}' reported as non-configurable"),
                    ));
                }
                if target_desc.is_data() != reported.is_data() {
                    return Err(violation(
                        Trap::GetOwnPropertyDescriptor,
                        format!("property '{key}' reported with a different descriptor kind"),
                    ));
                }
                if reported.writable() == Some(false) && target_desc.writable() == Some(true) {
                    return Err(violation(
                        Trap::GetOwnPropertyDescriptor,
                        format!("writable property '{key}' reported as non-writable"),
                    ));
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    pub(super) fn define_property(
        shadow: &ObjectRef,
        key: &PropertyKey,
        desc: &PropertyDescriptor,
        defined: bool,
    ) -> Result<()> {
        if !defined {
            return Ok(());
        }
        match super::get_own_property_descriptor(shadow, key)? {
            None => {
                if !super::is_extensible(shadow)? {
                    return Err(violation(
                        Trap::DefineProperty,
                        format!("new property '{key}' accepted on a non-extensible target"),
                    ));
                }
                if !desc.configurable() {
                    return Err(violation(
                        Trap::DefineProperty,
                        format!("non-configurable property '{key}' accepted without a target property"),
                    ));
                }
            }
            Some(target_desc) => {
                if !desc.configurable() && target_desc.configurable() {
                    return Err(violation(
                        Trap::DefineProperty,
                        format!("non-configurable define of '{key}' accepted over a configurable target property"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(super) fn get_prototype_of(shadow: &ObjectRef, result: Option<&ObjectRef>) -> Result<()> {
        if super::is_extensible(shadow)? {
            return Ok(());
        }
        let pinned = super::get_prototype_of(shadow)?;
        let matches = match (result, &pinned) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(violation(
                Trap::GetPrototypeOf,
                "prototype of a non-extensible target misreported",
            ))
        }
    }

    pub(super) fn set_prototype_of(
        shadow: &ObjectRef,
        prototype: Option<&ObjectRef>,
        changed: bool,
    ) -> Result<()> {
        if !changed || super::is_extensible(shadow)? {
            return Ok(());
        }
        let pinned = super::get_prototype_of(shadow)?;
        let matches = match (prototype, &pinned) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(violation(
                Trap::SetPrototypeOf,
                "prototype change accepted on a non-extensible target",
            ))
        }
    }

    pub(super) fn is_extensible(shadow: &ObjectRef, result: bool) -> Result<()> {
        if result == super::is_extensible(shadow)? {
            Ok(())
        } else {
            Err(violation(
                Trap::IsExtensible,
                "extensibility misreported against the target",
            ))
        }
    }

    pub(super) fn prevent_extensions(shadow: &ObjectRef, locked: bool) -> Result<()> {
        if locked && super::is_extensible(shadow)? {
            Err(violation(
                Trap::PreventExtensions,
                "success reported while the target is still extensible",
            ))
        } else {
            Ok(())
        }
    }
}
