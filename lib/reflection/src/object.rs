use core::fmt;
use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;

use crate::{
    descriptor::PropertyDescriptor,
    error::{Error, Result},
    key::PropertyKey,
    traps::{ProxyTraps, Trap},
    value::Value,
};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a heap object.
///
/// Ids are never reused, so they are safe keys for maps that outlive the
/// object itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native call implementation of a function object.
pub type NativeCall = Rc<dyn Fn(Value, &[Value]) -> Result<Value>>;

/// Native construct implementation of a function object.
pub type NativeConstruct = Rc<dyn Fn(&[Value], &ObjectRef) -> Result<Value>>;

/// The callable slots of a function object.
#[derive(Clone)]
pub struct FunctionSlot {
    pub call: NativeCall,
    pub construct: Option<NativeConstruct>,
    /// Declared arity, observable through argument-truncation rules.
    pub arity: usize,
}

impl FunctionSlot {
    pub fn new(arity: usize, call: NativeCall) -> Self {
        Self {
            call,
            construct: None,
            arity,
        }
    }
}

impl fmt::Debug for FunctionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSlot")
            .field("arity", &self.arity)
            .field("construct", &self.construct.is_some())
            .finish()
    }
}

/// Structural kind of an object, fixed at creation.
#[derive(Clone, Debug)]
pub enum ObjectKind {
    Plain,
    Array,
    Function(FunctionSlot),
}

impl ObjectKind {
    pub fn is_function(&self) -> bool {
        matches!(self, ObjectKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ObjectKind::Array)
    }
}

/// The proxy-specific slots of a proxy object.
pub struct ProxySlots {
    target: ObjectRef,
    handler: Rc<dyn ProxyTraps>,
    revoked: Cell<bool>,
}

impl ProxySlots {
    /// The apparent target the proxy layer observes.
    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    pub fn handler(&self) -> Rc<dyn ProxyTraps> {
        Rc::clone(&self.handler)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.get()
    }

    pub(crate) fn check_revoked(&self, trap: Trap) -> Result<()> {
        if self.revoked.get() {
            Err(Error::Revoked { trap })
        } else {
            Ok(())
        }
    }
}

pub(crate) struct OrdinaryState {
    pub(crate) properties: IndexMap<PropertyKey, PropertyDescriptor>,
    pub(crate) prototype: Option<ObjectRef>,
    pub(crate) extensible: bool,
}

/// A heap object: plain object, array, function or proxy.
pub struct Object {
    id: ObjectId,
    kind: ObjectKind,
    proxy: Option<ProxySlots>,
    ordinary: RefCell<OrdinaryState>,
}

impl Object {
    fn allocate(kind: ObjectKind, proxy: Option<ProxySlots>, prototype: Option<ObjectRef>) -> ObjectRef {
        ObjectRef(Rc::new(Object {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            proxy,
            ordinary: RefCell::new(OrdinaryState {
                properties: IndexMap::new(),
                prototype,
                extensible: true,
            }),
        }))
    }

    pub fn new_plain(prototype: Option<ObjectRef>) -> ObjectRef {
        Self::allocate(ObjectKind::Plain, None, prototype)
    }

    pub fn new_array(prototype: Option<ObjectRef>) -> ObjectRef {
        Self::allocate(ObjectKind::Array, None, prototype)
    }

    pub fn new_function(slot: FunctionSlot, prototype: Option<ObjectRef>) -> ObjectRef {
        Self::allocate(ObjectKind::Function(slot), None, prototype)
    }

    /// Creates a proxy over `target` dispatching to `handler`, returning
    /// the proxy and its revoker. The proxy mirrors the target's
    /// structural kind, so a proxy over a function is callable.
    pub fn new_proxy(target: &ObjectRef, handler: Rc<dyn ProxyTraps>) -> (ObjectRef, ProxyRevoker) {
        let proxy = Self::allocate(
            target.kind().clone(),
            Some(ProxySlots {
                target: target.clone(),
                handler,
                revoked: Cell::new(false),
            }),
            None,
        );
        tracing::trace!(proxy = ?proxy, target = ?target, "created proxy");
        let revoker = ProxyRevoker {
            target: Rc::downgrade(&proxy.0),
        };
        (proxy, revoker)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn function_slot(&self) -> Option<&FunctionSlot> {
        match &self.kind {
            ObjectKind::Function(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn proxy_slots(&self) -> Option<&ProxySlots> {
        self.proxy.as_ref()
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn is_revoked_proxy(&self) -> bool {
        self.proxy.as_ref().is_some_and(ProxySlots::is_revoked)
    }

    pub(crate) fn ordinary(&self) -> Ref<'_, OrdinaryState> {
        self.ordinary.borrow()
    }

    pub(crate) fn ordinary_mut(&self) -> RefMut<'_, OrdinaryState> {
        self.ordinary.borrow_mut()
    }

    /// Ordinary prototype link. Bypasses proxy handlers; the mediated
    /// path is [`reflect::get_prototype_of`](crate::reflect::get_prototype_of).
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.ordinary().prototype.clone()
    }

    /// Ordinary prototype update. Bypasses proxy handlers.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        self.ordinary_mut().prototype = prototype;
    }

    /// Ordinary extensibility flag. Bypasses proxy handlers.
    pub fn extensible(&self) -> bool {
        self.ordinary().extensible
    }

    /// Ordinary own property lookup. Bypasses proxy handlers.
    pub fn own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.ordinary().properties.get(key).cloned()
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.ordinary().properties.contains_key(key)
    }

    /// Ordinary own keys, in insertion order. Bypasses proxy handlers.
    pub fn own_keys_ordered(&self) -> Vec<PropertyKey> {
        self.ordinary().properties.keys().cloned().collect()
    }

    /// Replaces an own property without configurability validation.
    ///
    /// This is the promotion side-channel for one-shot lazy accessors:
    /// a memoizing getter installed before a seal replaces itself with
    /// the resolved descriptor even though its configurability has
    /// already been lost. It must never be reachable from mediated code.
    pub fn promote_own_property(&self, key: PropertyKey, desc: PropertyDescriptor) {
        self.ordinary_mut().properties.insert(key, desc);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match &self.kind {
            ObjectKind::Plain => "Object",
            ObjectKind::Array => "Array",
            ObjectKind::Function(_) => "Function",
        };
        if self.proxy.is_some() {
            write!(f, "Proxy<{tag}>{}", self.id)
        } else {
            write!(f, "{tag}{}", self.id)
        }
    }
}

/// Shared handle to a heap object. Compares by reference.
#[derive(Clone)]
pub struct ObjectRef(Rc<Object>);

impl ObjectRef {
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.0
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Weak handle to a heap object.
#[derive(Clone, Default)]
pub struct WeakObjectRef(Weak<Object>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(object) => write!(f, "Weak({object:?})"),
            None => write!(f, "Weak(<dropped>)"),
        }
    }
}

/// Detached revocation handle for a proxy.
///
/// Revoking a proxy is one-way: every subsequent trap fails. Revoking an
/// object that is not a proxy, or one that has already been collected,
/// is a no-op.
#[derive(Clone)]
pub struct ProxyRevoker {
    target: Weak<Object>,
}

impl ProxyRevoker {
    /// A revoker with nothing to revoke. Used where a non-proxy value is
    /// bound into a graph and the entry shape still requires a revoker.
    pub fn inert() -> Self {
        Self {
            target: Weak::new(),
        }
    }

    pub fn revoke(&self) {
        if let Some(object) = self.target.upgrade() {
            if let Some(slots) = object.proxy.as_ref() {
                tracing::trace!(proxy = ?object, "revoking proxy");
                slots.revoked.set(true);
            }
        }
    }
}

impl fmt::Debug for ProxyRevoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProxyRevoker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        let a = Object::new_plain(None);
        let b = Object::new_plain(None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn proxy_mirrors_target_kind() {
        let f = Object::new_function(
            FunctionSlot::new(2, Rc::new(|_, _| Ok(Value::Undefined))),
            None,
        );
        let (proxy, _revoker) = Object::new_proxy(&f, Rc::new(crate::traps::Forwarding));
        assert!(proxy.kind().is_function());
        assert!(proxy.is_proxy());
    }

    #[test]
    fn revoker_flips_the_revoked_flag_once() {
        let target = Object::new_plain(None);
        let (proxy, revoker) = Object::new_proxy(&target, Rc::new(crate::traps::Forwarding));
        assert!(!proxy.is_revoked_proxy());
        revoker.revoke();
        assert!(proxy.is_revoked_proxy());
        revoker.revoke();
        assert!(proxy.is_revoked_proxy());
    }

    #[test]
    fn inert_revoker_is_a_noop() {
        ProxyRevoker::inert().revoke();
    }
}
