use std::rc::Rc;

use crate::{
    descriptor::PropertyDescriptor,
    key::PropertyKey,
    object::{FunctionSlot, Object, ObjectRef},
    value::Value,
};

/// The primordial objects of a runtime instance.
///
/// These are the shared constructors and prototypes new objects hang off
/// of. The whole set is frozen at construction: every own property is
/// non-writable and non-configurable and no object in the set is
/// extensible, so primordials can safely be passed through a mediation
/// boundary unwrapped.
#[derive(Debug, Clone)]
pub struct Intrinsics {
    object_prototype: ObjectRef,
    object_constructor: ObjectRef,
    function_prototype: ObjectRef,
    function_constructor: ObjectRef,
    array_prototype: ObjectRef,
    array_constructor: ObjectRef,
}

impl Intrinsics {
    pub fn new() -> Self {
        let object_prototype = Object::new_plain(None);
        let function_prototype = Object::new_plain(Some(object_prototype.clone()));
        let array_prototype = Object::new_plain(Some(object_prototype.clone()));

        let object_constructor = {
            let proto = object_prototype.clone();
            Object::new_function(
                FunctionSlot {
                    call: Rc::new({
                        let proto = proto.clone();
                        move |_, _| Ok(Value::Object(Object::new_plain(Some(proto.clone()))))
                    }),
                    construct: Some(Rc::new({
                        let proto = proto.clone();
                        move |_, _| Ok(Value::Object(Object::new_plain(Some(proto.clone()))))
                    })),
                    arity: 1,
                },
                Some(function_prototype.clone()),
            )
        };

        let function_constructor = {
            let function_prototype = function_prototype.clone();
            Object::new_function(
                FunctionSlot {
                    call: Rc::new({
                        let function_prototype = function_prototype.clone();
                        move |_, _| {
                            Ok(Value::Object(Object::new_function(
                                FunctionSlot::new(0, Rc::new(|_, _| Ok(Value::Undefined))),
                                Some(function_prototype.clone()),
                            )))
                        }
                    }),
                    construct: None,
                    arity: 1,
                },
                Some(function_prototype),
            )
        };

        let array_constructor = {
            let proto = array_prototype.clone();
            Object::new_function(
                FunctionSlot {
                    call: Rc::new({
                        let proto = proto.clone();
                        move |_, _| Ok(Value::Object(Object::new_array(Some(proto.clone()))))
                    }),
                    construct: Some(Rc::new({
                        let proto = proto.clone();
                        move |_, _| Ok(Value::Object(Object::new_array(Some(proto.clone()))))
                    })),
                    arity: 1,
                },
                Some(function_prototype.clone()),
            )
        };

        link(&object_constructor, &object_prototype);
        link(&function_constructor, &function_prototype);
        link(&array_constructor, &array_prototype);

        let this = Self {
            object_prototype,
            object_constructor,
            function_prototype,
            function_constructor,
            array_prototype,
            array_constructor,
        };
        for object in this.all() {
            freeze(&object);
        }
        this
    }

    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    pub fn object_constructor(&self) -> &ObjectRef {
        &self.object_constructor
    }

    pub fn function_prototype(&self) -> &ObjectRef {
        &self.function_prototype
    }

    pub fn function_constructor(&self) -> &ObjectRef {
        &self.function_constructor
    }

    pub fn array_prototype(&self) -> &ObjectRef {
        &self.array_prototype
    }

    pub fn array_constructor(&self) -> &ObjectRef {
        &self.array_constructor
    }

    /// Every primordial, constructors first.
    pub fn all(&self) -> [ObjectRef; 6] {
        [
            self.object_constructor.clone(),
            self.object_prototype.clone(),
            self.function_constructor.clone(),
            self.function_prototype.clone(),
            self.array_constructor.clone(),
            self.array_prototype.clone(),
        ]
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new()
    }
}

fn link(constructor: &ObjectRef, prototype: &ObjectRef) {
    constructor.ordinary_mut().properties.insert(
        PropertyKey::from("prototype"),
        PropertyDescriptor::pinned_data(Value::Object(prototype.clone())),
    );
    prototype.ordinary_mut().properties.insert(
        PropertyKey::from("constructor"),
        PropertyDescriptor::Data {
            value: Value::Object(constructor.clone()),
            writable: false,
            enumerable: false,
            configurable: false,
        },
    );
}

fn freeze(object: &ObjectRef) {
    let mut state = object.ordinary_mut();
    for desc in state.properties.values_mut() {
        desc.set_writable(false);
        desc.set_configurable(false);
    }
    state.extensible = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect;

    #[test]
    fn primordials_are_frozen() {
        let intrinsics = Intrinsics::new();
        for object in intrinsics.all() {
            assert!(!reflect::is_extensible(&object).unwrap());
            for key in object.own_keys_ordered() {
                let desc = object.own_property(&key).unwrap();
                assert!(!desc.configurable(), "{key} must be non-configurable");
            }
        }
    }

    #[test]
    fn constructor_prototype_links_are_mutual() {
        let intrinsics = Intrinsics::new();
        let proto = reflect::get(
            intrinsics.object_constructor(),
            &"prototype".into(),
            &Value::Object(intrinsics.object_constructor().clone()),
        )
        .unwrap();
        assert!(proto.as_object().unwrap().ptr_eq(intrinsics.object_prototype()));
    }

    #[test]
    fn object_constructor_creates_objects_off_the_prototype() {
        let intrinsics = Intrinsics::new();
        let created = reflect::construct(
            intrinsics.object_constructor(),
            &[],
            intrinsics.object_constructor(),
        )
        .unwrap();
        let object = created.as_object().unwrap();
        assert!(object.prototype().unwrap().ptr_eq(intrinsics.object_prototype()));
    }
}
