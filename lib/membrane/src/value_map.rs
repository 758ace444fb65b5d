use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use reflection::ObjectId;

use crate::cylinder::ProxyCylinder;

/// Shared handle to a cylinder.
pub(crate) type CylinderRef = Rc<RefCell<ProxyCylinder>>;

enum Slot {
    Live(CylinderRef),
    Dead,
}

/// The membrane's value map: any known reference (real value, proxy or
/// shadow target) points at its cylinder.
///
/// A key may be tombstoned with [`kill`](ValueMap::kill); overwriting a
/// live key with a different cylinder is an engine bug and fatal.
#[derive(Default)]
pub(crate) struct ValueMap {
    slots: RefCell<HashMap<ObjectId, Slot>>,
}

impl ValueMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<CylinderRef> {
        match self.slots.borrow().get(&id) {
            Some(Slot::Live(cylinder)) => Some(Rc::clone(cylinder)),
            _ => None,
        }
    }

    pub(crate) fn is_dead(&self, id: ObjectId) -> bool {
        matches!(self.slots.borrow().get(&id), Some(Slot::Dead))
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        self.slots.borrow().contains_key(&id)
    }

    pub(crate) fn insert(&self, id: ObjectId, cylinder: &CylinderRef) {
        let mut slots = self.slots.borrow_mut();
        if let Some(Slot::Live(existing)) = slots.get(&id) {
            assert!(
                Rc::ptr_eq(existing, cylinder),
                "value map key {id} is already bound to a different cylinder; this is a bug in \
                 the membrane engine"
            );
            return;
        }
        slots.insert(id, Slot::Live(Rc::clone(cylinder)));
    }

    /// Tombstones a key. Subsequent lookups fail, distinguishably from a
    /// key the membrane has never seen.
    pub(crate) fn kill(&self, id: ObjectId) {
        self.slots.borrow_mut().insert(id, Slot::Dead);
    }

    /// Forgets a key entirely.
    pub(crate) fn remove(&self, id: ObjectId) {
        self.slots.borrow_mut().remove(&id);
    }

    /// Every distinct live cylinder.
    pub(crate) fn live_cylinders(&self) -> Vec<CylinderRef> {
        let slots = self.slots.borrow();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for slot in slots.values() {
            if let Slot::Live(cylinder) = slot {
                if seen.insert(Rc::as_ptr(cylinder)) {
                    out.push(Rc::clone(cylinder));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflection::Object;

    #[test]
    fn kill_tombstones_without_forgetting() {
        let map = ValueMap::new();
        let key = Object::new_plain(None).id();
        let cylinder = Rc::new(RefCell::new(ProxyCylinder::new()));
        map.insert(key, &cylinder);
        assert!(map.get(key).is_some());

        map.kill(key);
        assert!(map.get(key).is_none());
        assert!(map.is_dead(key));
        assert!(map.contains(key));

        map.remove(key);
        assert!(!map.contains(key));
    }

    #[test]
    fn reinserting_the_same_cylinder_is_idempotent() {
        let map = ValueMap::new();
        let key = Object::new_plain(None).id();
        let cylinder = Rc::new(RefCell::new(ProxyCylinder::new()));
        map.insert(key, &cylinder);
        map.insert(key, &cylinder);
        assert_eq!(map.live_cylinders().len(), 1);
    }

    #[test]
    #[should_panic(expected = "already bound to a different cylinder")]
    fn overwriting_a_live_key_is_fatal() {
        let map = ValueMap::new();
        let key = Object::new_plain(None).id();
        map.insert(key, &Rc::new(RefCell::new(ProxyCylinder::new())));
        map.insert(key, &Rc::new(RefCell::new(ProxyCylinder::new())));
    }
}
