//! The quantified membrane invariants.

mod common;

use pretty_assertions::assert_eq;

use membrane::{ConvertOptions, OwnKeysFilter};
use reflection::{reflect, PropertyDescriptor, Value};

use common::*;

#[test]
fn identity_is_preserved_across_repeated_wraps() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = Value::Object(plain_object(&[("x", Value::from(1.0))]));
    let p1 = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, o.clone(), ConvertOptions::default())
        .unwrap();
    let p2 = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, o.clone(), ConvertOptions::default())
        .unwrap();
    assert!(p1.same(&p2));

    // Unwrapping the proxy lands on the original value.
    let back = membrane
        .convert_argument_to_proxy(&dry_handler, &wet_handler, p1, ConvertOptions::default())
        .unwrap();
    assert!(back.same(&o));
}

#[test]
fn primitives_cross_without_cylinders() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    for primitive in [
        Value::Undefined,
        Value::Null,
        Value::from(true),
        Value::from(3.25),
        Value::from("text"),
    ] {
        let crossed = membrane
            .convert_argument_to_proxy(
                &wet_handler,
                &dry_handler,
                primitive.clone(),
                ConvertOptions::default(),
            )
            .unwrap();
        assert!(crossed.same(&primitive));
        assert!(!membrane.has_proxy_for_value(&dry(), &primitive));
    }
}

#[test]
fn filtered_keys_are_invisible_and_writes_to_them_are_inert() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("visible", Value::from(1.0)), ("hidden", Value::from(2.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();
    let rules = membrane.modify_rules();
    rules
        .filter_own_keys(&dry(), &p, Some(OwnKeysFilter::allow_list(["visible"])))
        .unwrap();
    rules.store_unknown_as_local(&dry(), &p).unwrap();

    assert!(!has_prop(&p, "hidden"));
    assert!(reflect::get_own_property_descriptor(obj(&p), &"hidden".into())
        .unwrap()
        .is_none());
    assert_eq!(keys_of(&p), vec!["visible".to_string()]);

    // Defining the hidden key succeeds without touching the real side.
    assert!(reflect::define_property(
        obj(&p),
        "hidden".into(),
        PropertyDescriptor::data(Value::from(9.0))
    )
    .unwrap());
    assert_eq!(get_prop(&Value::Object(o.clone()), "hidden"), Value::from(2.0));

    // Deleting it reports success and leaves the real side alone.
    assert!(delete_prop(&p, "hidden"));
    assert_eq!(get_prop(&Value::Object(o), "hidden"), Value::from(2.0));
}

#[test]
fn revocation_is_total_across_proxies_of_a_graph() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let values: Vec<Value> = (0..3)
        .map(|index| {
            Value::Object(plain_object(&[("index", Value::from(index as f64))]))
        })
        .collect();
    let proxies: Vec<Value> = values
        .iter()
        .map(|value| {
            membrane
                .convert_argument_to_proxy(
                    &wet_handler,
                    &dry_handler,
                    value.clone(),
                    ConvertOptions::default(),
                )
                .unwrap()
        })
        .collect();

    dry_handler.revoke_everything().unwrap();
    for proxy in &proxies {
        assert!(reflect::get(obj(proxy), &"index".into(), proxy).is_err());
        assert!(reflect::own_keys(obj(proxy)).is_err());
    }
    // The real values keep their identity and state.
    for (index, value) in values.iter().enumerate() {
        assert_eq!(get_prop(value, "index"), Value::from(index as f64));
    }
}

#[test]
fn descriptor_round_trip_is_observationally_a_noop() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let inner = plain_object(&[("deep", Value::from(5.0))]);
    let o = plain_object(&[("child", Value::Object(inner))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    let desc = reflect::get_own_property_descriptor(obj(&p), &"child".into())
        .unwrap()
        .expect("child descriptor");
    assert!(reflect::define_property(obj(&p), "child".into(), desc.clone()).unwrap());

    // The wrapped child is still the same proxy, and the real child is
    // still the same real object.
    let desc_after = reflect::get_own_property_descriptor(obj(&p), &"child".into())
        .unwrap()
        .expect("child descriptor after rewrite");
    assert!(desc.value().unwrap().same(desc_after.value().unwrap()));
    assert_eq!(get_prop(&get_prop(&p, "child"), "deep"), Value::from(5.0));
}

#[test]
fn own_keys_cache_invalidates_when_the_real_key_set_changes() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("a", Value::from(1.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    assert_eq!(keys_of(&p), vec!["a".to_string()]);

    // Mutate the real key set behind the membrane's back.
    reflect::define_property(&o, "b".into(), PropertyDescriptor::data(Value::from(2.0)))
        .unwrap();
    assert_eq!(keys_of(&p), vec!["a".to_string(), "b".to_string()]);

    reflect::delete_property(&o, &"a".into()).unwrap();
    assert_eq!(keys_of(&p), vec!["b".to_string()]);
}

#[test]
fn non_extensible_values_project_non_extensible_proxies() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("a", Value::from(1.0)), ("b", Value::from(2.0))]);
    reflect::prevent_extensions(&o).unwrap();

    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o),
            ConvertOptions::default(),
        )
        .unwrap();

    assert!(!reflect::is_extensible(obj(&p)).unwrap());
    assert_eq!(keys_of(&p), vec!["a".to_string(), "b".to_string()]);
    // The lazy getters resolve to the real values.
    assert_eq!(get_prop(&p, "a"), Value::from(1.0));
    assert_eq!(get_prop(&p, "b"), Value::from(2.0));
    // New keys are rejected on the locked proxy.
    assert!(!reflect::define_property(
        obj(&p),
        "c".into(),
        PropertyDescriptor::data(Value::from(3.0))
    )
    .unwrap());
}

#[test]
fn locking_through_the_proxy_locks_real_shadow_and_proxy() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("a", Value::from(1.0))]);
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o.clone()),
            ConvertOptions::default(),
        )
        .unwrap();

    assert!(reflect::prevent_extensions(obj(&p)).unwrap());
    assert!(!reflect::is_extensible(obj(&p)).unwrap());
    assert!(!reflect::is_extensible(&o).unwrap());
    assert_eq!(keys_of(&p), vec!["a".to_string()]);
    assert_eq!(get_prop(&p, "a"), Value::from(1.0));
}

#[test]
fn prototype_chains_are_mediated_per_graph() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let proto = plain_object(&[("inherited", Value::from(7.0))]);
    let o = reflection::Object::new_plain(Some(proto.clone()));
    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(o),
            ConvertOptions::default(),
        )
        .unwrap();

    // Inherited reads cross the boundary through the wrapped prototype.
    assert_eq!(get_prop(&p, "inherited"), Value::from(7.0));
    assert!(has_prop(&p, "inherited"));

    // The prototype observed through the proxy is itself a proxy, bound
    // to the real prototype.
    let observed = reflect::get_prototype_of(obj(&p)).unwrap().unwrap();
    assert!(!observed.ptr_eq(&proto));
    let unwrapped = membrane
        .convert_argument_to_proxy(
            &dry_handler,
            &wet_handler,
            Value::Object(observed),
            ConvertOptions::default(),
        )
        .unwrap();
    assert!(unwrapped.same(&Value::Object(proto)));
}
