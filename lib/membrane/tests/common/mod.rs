//! Shared fixtures for the membrane integration tests.
#![allow(dead_code)]

use std::rc::Rc;

use membrane::{GraphName, Membrane, MembraneConfig};
use reflection::{reflect, FunctionSlot, Object, ObjectRef, PropertyDescriptor, Value};

/// A membrane running the pipeline-style graph owner.
pub fn membrane() -> Membrane {
    Membrane::new(MembraneConfig {
        refactor: Some("0.10".to_string()),
        ..MembraneConfig::default()
    })
}

/// A membrane running the legacy direct-handler owner.
pub fn legacy_membrane() -> Membrane {
    Membrane::new(MembraneConfig::default())
}

pub fn wet() -> GraphName {
    GraphName::from("wet")
}

pub fn dry() -> GraphName {
    GraphName::from("dry")
}

/// A plain object carrying the given data properties.
pub fn plain_object(pairs: &[(&str, Value)]) -> ObjectRef {
    let object = Object::new_plain(None);
    for (key, value) in pairs {
        reflect::define_property(&object, (*key).into(), PropertyDescriptor::data(value.clone()))
            .unwrap();
    }
    object
}

pub fn obj(value: &Value) -> &ObjectRef {
    value.as_object().expect("expected an object value")
}

pub fn get_prop(target: &Value, key: &str) -> Value {
    reflect::get(obj(target), &key.into(), target).unwrap()
}

pub fn set_prop(target: &Value, key: &str, value: Value) -> bool {
    reflect::set(obj(target), &key.into(), value, target).unwrap()
}

pub fn has_prop(target: &Value, key: &str) -> bool {
    reflect::has(obj(target), &key.into()).unwrap()
}

pub fn delete_prop(target: &Value, key: &str) -> bool {
    reflect::delete_property(obj(target), &key.into()).unwrap()
}

/// String-valued own keys, in exposure order.
pub fn keys_of(target: &Value) -> Vec<String> {
    reflect::own_keys(obj(target))
        .unwrap()
        .into_iter()
        .filter_map(|key| key.as_str().map(str::to_string))
        .collect()
}

/// A two-argument adder with loose numeric semantics: any missing or
/// non-numeric argument poisons the result to NaN.
pub fn adder() -> ObjectRef {
    Object::new_function(
        FunctionSlot::new(
            2,
            Rc::new(|_, args| {
                let number = |index: usize| args.get(index).and_then(Value::as_number);
                Ok(match (number(0), number(1)) {
                    (Some(a), Some(b)) => Value::from(a + b),
                    _ => Value::from(f64::NAN),
                })
            }),
        ),
        None,
    )
}
