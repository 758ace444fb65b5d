use crate::{object::ObjectRef, value::Value};

/// A property descriptor.
///
/// Descriptors are always complete: every flag is a concrete boolean.
/// Callers that deal in partial descriptors normalize before they reach
/// this type.
#[derive(Clone, Debug)]
pub enum PropertyDescriptor {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<ObjectRef>,
        set: Option<ObjectRef>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// A writable, enumerable, configurable data descriptor.
    pub fn data(value: Value) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A non-writable, non-configurable, enumerable data descriptor.
    pub fn pinned_data(value: Value) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }

    /// An enumerable, configurable accessor descriptor.
    pub fn accessor(get: Option<ObjectRef>, set: Option<ObjectRef>) -> Self {
        PropertyDescriptor::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, PropertyDescriptor::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, PropertyDescriptor::Accessor { .. })
    }

    pub fn enumerable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { enumerable, .. }
            | PropertyDescriptor::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn configurable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { configurable, .. }
            | PropertyDescriptor::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn set_configurable(&mut self, flag: bool) {
        match self {
            PropertyDescriptor::Data { configurable, .. }
            | PropertyDescriptor::Accessor { configurable, .. } => *configurable = flag,
        }
    }

    pub fn set_writable(&mut self, flag: bool) {
        if let PropertyDescriptor::Data { writable, .. } = self {
            *writable = flag;
        }
    }

    /// The `[[Value]]` slot of a data descriptor.
    pub fn value(&self) -> Option<&Value> {
        match self {
            PropertyDescriptor::Data { value, .. } => Some(value),
            PropertyDescriptor::Accessor { .. } => None,
        }
    }

    pub fn writable(&self) -> Option<bool> {
        match self {
            PropertyDescriptor::Data { writable, .. } => Some(*writable),
            PropertyDescriptor::Accessor { .. } => None,
        }
    }

    pub fn getter(&self) -> Option<&ObjectRef> {
        match self {
            PropertyDescriptor::Accessor { get, .. } => get.as_ref(),
            PropertyDescriptor::Data { .. } => None,
        }
    }

    pub fn setter(&self) -> Option<&ObjectRef> {
        match self {
            PropertyDescriptor::Accessor { set, .. } => set.as_ref(),
            PropertyDescriptor::Data { .. } => None,
        }
    }

    /// Slot-by-slot identity, with object slots compared by reference.
    pub fn matches(&self, other: &PropertyDescriptor) -> bool {
        match (self, other) {
            (
                PropertyDescriptor::Data {
                    value: a,
                    writable: wa,
                    enumerable: ea,
                    configurable: ca,
                },
                PropertyDescriptor::Data {
                    value: b,
                    writable: wb,
                    enumerable: eb,
                    configurable: cb,
                },
            ) => a.same(b) && wa == wb && ea == eb && ca == cb,
            (
                PropertyDescriptor::Accessor {
                    get: ga,
                    set: sa,
                    enumerable: ea,
                    configurable: ca,
                },
                PropertyDescriptor::Accessor {
                    get: gb,
                    set: sb,
                    enumerable: eb,
                    configurable: cb,
                },
            ) => ga == gb && sa == sb && ea == eb && ca == cb,
            _ => false,
        }
    }
}
