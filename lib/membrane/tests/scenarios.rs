//! End-to-end mediation scenarios.

mod common;

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;

use membrane::{
    as_membrane_error, ArgumentLimit, ConvertOptions, Error, FunctionListener, FunctionReason,
    OwnKeysFilter,
};
use reflection::{reflect, Value};

use common::*;

#[test]
fn wrap_and_read() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0)), ("y", Value::from("s"))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    assert_eq!(get_prop(&p, "x"), Value::from(10.0));
    assert_eq!(get_prop(&p, "y"), Value::from("s"));
    assert!(!p.same(&Value::Object(o)));
    assert_eq!(keys_of(&p), vec!["x".to_string(), "y".to_string()]);
}

#[test]
fn filtered_keys_vanish_from_the_dry_side() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0)), ("y", Value::from("s"))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    membrane
        .modify_rules()
        .filter_own_keys(&dry(), &p, Some(OwnKeysFilter::allow_list(["x"])))
        .unwrap();

    assert!(!has_prop(&p, "y"));
    assert_eq!(keys_of(&p), vec!["x".to_string()]);
    assert_eq!(get_prop(&p, "x"), Value::from(10.0));
    // The real side is untouched.
    assert_eq!(
        get_prop(&Value::Object(o.clone()), "y"),
        Value::from("s")
    );
}

#[test]
fn unknown_properties_stay_local_to_the_dry_graph() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    membrane
        .modify_rules()
        .store_unknown_as_local(&dry(), &p)
        .unwrap();

    assert!(set_prop(&p, "z", Value::from(99.0)));
    assert_eq!(get_prop(&p, "z"), Value::from(99.0));
    assert!(!has_prop(&Value::Object(o), "z"));
}

#[test]
fn local_delete_hides_without_touching_the_wet_side() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    membrane
        .modify_rules()
        .require_local_delete(&dry(), &p)
        .unwrap();

    assert!(delete_prop(&p, "x"));
    assert!(!has_prop(&p, "x"));
    assert_eq!(get_prop(&Value::Object(o), "x"), Value::from(10.0));
}

#[test]
fn truncated_call_drops_the_second_argument() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let f = adder();
    let pf = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(f),
            ConvertOptions::default(),
        )
        .unwrap();

    membrane
        .modify_rules()
        .truncate_arg_list(&dry(), &pf, ArgumentLimit::Exact(1))
        .unwrap();

    let events: Rc<RefCell<Vec<FunctionReason>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&events);
    let listener: FunctionListener = Rc::new(move |event| {
        log.borrow_mut().push(event.reason);
        Ok(())
    });
    membrane.add_function_listener(listener);

    let result = reflect::apply(
        obj(&pf),
        Value::Undefined,
        &[Value::from(2.0), Value::from(40.0)],
    )
    .unwrap();
    assert!(result.as_number().unwrap().is_nan());
    assert_eq!(
        &*events.borrow(),
        &[FunctionReason::Enter, FunctionReason::Return]
    );
}

#[test]
fn revoking_the_wet_graph_kills_the_dry_proxy() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o),
            ConvertOptions::default(),
        )
        .unwrap();

    wet_handler.revoke_everything().unwrap();

    let err = reflect::get(obj(&p), &"x".into(), &p).unwrap_err();
    assert!(matches!(err, reflection::Error::Revoked { .. }));
}

#[test]
fn bound_values_are_each_others_proxies() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o1 = Value::Object(plain_object(&[("side", Value::from("wet"))]));
    let o2 = Value::Object(plain_object(&[("side", Value::from("dry"))]));
    membrane
        .bind_values_by_handlers(&wet_handler, &o1, &dry_handler, &o2)
        .unwrap();

    let crossed = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            o1.clone(),
            ConvertOptions::default(),
        )
        .unwrap();
    assert!(crossed.same(&o2));

    let returned = membrane
        .convert_argument_to_proxy(
            &dry_handler,
            &wet_handler,
            o2.clone(),
            ConvertOptions::default(),
        )
        .unwrap();
    assert!(returned.same(&o1));
}

#[test]
fn binding_primitives_is_rejected() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let err = membrane
        .bind_values_by_handlers(
            &wet_handler,
            &Value::from(1.0),
            &dry_handler,
            &Value::from(2.0),
        )
        .unwrap_err();
    assert!(matches!(err, Error::PrimitiveWrap));
}

#[test]
fn disabled_traps_fail_deterministically() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(1.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o),
            ConvertOptions::default(),
        )
        .unwrap();
    membrane
        .modify_rules()
        .disable_traps(&dry(), &p, &[reflection::Trap::Get])
        .unwrap();

    let err = reflect::get(obj(&p), &"x".into(), &p).unwrap_err();
    assert!(matches!(
        as_membrane_error(&err),
        Some(Error::TrapDisabled(reflection::Trap::Get))
    ));
    // Other traps still work.
    assert!(has_prop(&p, "x"));
}

#[test]
fn the_legacy_graph_owner_mediates_identically() {
    let membrane = legacy_membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0)), ("y", Value::from("s"))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    assert_eq!(get_prop(&p, "x"), Value::from(10.0));
    assert_eq!(keys_of(&p), vec!["x".to_string(), "y".to_string()]);
    assert!(set_prop(&p, "x", Value::from(11.0)));
    assert_eq!(get_prop(&Value::Object(o), "x"), Value::from(11.0));
}
