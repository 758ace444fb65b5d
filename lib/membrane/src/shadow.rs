use std::rc::Rc;

use reflection::{FunctionSlot, Object, ObjectKind, ObjectRef, Value};

/// Builds the shadow target for one (real value, foreign graph) pair.
///
/// The shadow is a fresh object of the same structural kind as the real
/// value. It is the apparent target the proxy layer observes, so
/// non-configurable and non-extensible commitments are pinned onto the
/// shadow without constraining the real value. A function shadow mirrors
/// the real declared arity; its call slot is inert because the proxy
/// intercepts every invocation.
pub(crate) fn make_shadow_target(real: &ObjectRef) -> ObjectRef {
    match real.kind() {
        ObjectKind::Plain => Object::new_plain(None),
        ObjectKind::Array => Object::new_array(None),
        ObjectKind::Function(slot) => Object::new_function(
            FunctionSlot::new(slot.arity, Rc::new(|_, _| Ok(Value::Undefined))),
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_matches_the_structural_kind() {
        let plain = Object::new_plain(None);
        assert!(matches!(make_shadow_target(&plain).kind(), ObjectKind::Plain));

        let array = Object::new_array(None);
        assert!(make_shadow_target(&array).kind().is_array());

        let function = Object::new_function(
            FunctionSlot::new(2, Rc::new(|_, _| Ok(Value::Undefined))),
            None,
        );
        let shadow = make_shadow_target(&function);
        assert_eq!(shadow.function_slot().unwrap().arity, 2);
    }

    #[test]
    fn each_shadow_is_fresh() {
        let real = Object::new_plain(None);
        assert_ne!(make_shadow_target(&real).id(), make_shadow_target(&real).id());
    }
}
