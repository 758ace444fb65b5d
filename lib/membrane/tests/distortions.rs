//! Declarative distortions applied at first-crossing time, and the
//! proxy-listener surface they ride on.

mod common;

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;

use membrane::{
    sample_config, ConvertOptions, DistortionCategory, Error, FilterSetting, ProxyListener,
    ShadowSetting, ShadowTargetMode,
};
use reflection::{reflect, Value};

use common::*;

#[test]
fn a_value_keyed_config_filters_and_localizes_on_first_crossing() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("open", Value::from(1.0)), ("secret", Value::from(2.0))]);
    let value = Value::Object(o.clone());

    let distortions = membrane.distortions_listener();
    let mut config = sample_config(false);
    config.filter_own_keys = FilterSetting::Keys(vec!["open".to_string()]);
    config.store_unknown_as_local = true;
    config.require_local_delete = true;
    distortions
        .add_listener(&value, DistortionCategory::Value, config)
        .unwrap();
    distortions.listen_to(&dry_handler);

    let p = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, value.clone(), ConvertOptions::default())
        .unwrap();

    assert_eq!(keys_of(&p), vec!["open".to_string()]);
    assert!(!has_prop(&p, "secret"));

    // storeUnknownAsLocal from the catalog.
    assert!(set_prop(&p, "note", Value::from("local")));
    assert!(!has_prop(&value, "note"));

    // requireLocalDelete from the catalog.
    assert!(delete_prop(&p, "open"));
    assert_eq!(get_prop(&value, "open"), Value::from(1.0));
}

#[test]
fn an_instance_keyed_config_applies_to_prototype_siblings() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let proto = plain_object(&[]);
    let sample = reflection::Object::new_plain(Some(proto.clone()));
    reflect::define_property(
        &sample,
        "kind".into(),
        reflection::PropertyDescriptor::data(Value::from("sample")),
    )
    .unwrap();
    let sibling = reflection::Object::new_plain(Some(proto));
    reflect::define_property(
        &sibling,
        "kind".into(),
        reflection::PropertyDescriptor::data(Value::from("sibling")),
    )
    .unwrap();
    reflect::define_property(
        &sibling,
        "extra".into(),
        reflection::PropertyDescriptor::data(Value::from(1.0)),
    )
    .unwrap();

    let distortions = membrane.distortions_listener();
    let mut config = sample_config(false);
    config.filter_own_keys = FilterSetting::Keys(vec!["kind".to_string()]);
    distortions
        .add_listener(
            &Value::Object(sample),
            DistortionCategory::Instance,
            config,
        )
        .unwrap();
    distortions.listen_to(&dry_handler);

    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(sibling),
            ConvertOptions::default(),
        )
        .unwrap();
    assert_eq!(keys_of(&p), vec!["kind".to_string()]);
    assert!(!has_prop(&p, "extra"));
}

#[test]
fn a_filter_keyed_config_matches_by_predicate() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let distortions = membrane.distortions_listener();
    let mut config = sample_config(false);
    config.store_unknown_as_local = true;
    distortions
        .add_filter_listener(
            Rc::new(|value| {
                value
                    .as_object()
                    .map(|object| object.has_own(&"tagged".into()))
                    .unwrap_or(false)
            }),
            config,
        )
        .unwrap();
    distortions.listen_to(&dry_handler);

    let tagged = Value::Object(plain_object(&[("tagged", Value::from(true))]));
    let p = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, tagged.clone(), ConvertOptions::default())
        .unwrap();
    assert!(set_prop(&p, "scratch", Value::from(1.0)));
    assert!(!has_prop(&tagged, "scratch"));

    let untagged = Value::Object(plain_object(&[("plain", Value::from(true))]));
    let q = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            untagged.clone(),
            ConvertOptions::default(),
        )
        .unwrap();
    assert!(set_prop(&q, "scratch", Value::from(1.0)));
    assert!(has_prop(&untagged, "scratch"));
}

#[test]
fn use_shadow_target_prepared_swaps_in_a_forwarding_proxy() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let o = plain_object(&[("x", Value::from(10.0)), ("y", Value::from(20.0))]);
    let value = Value::Object(o.clone());

    let distortions = membrane.distortions_listener();
    let mut config = sample_config(false);
    config.use_shadow_target = ShadowSetting::Mode(ShadowTargetMode::Prepared);
    distortions
        .add_listener(&value, DistortionCategory::Value, config)
        .unwrap();
    distortions.listen_to(&dry_handler);

    let p = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, value.clone(), ConvertOptions::default())
        .unwrap();

    // Reads resolve through the lazy getters on the shadow.
    assert_eq!(get_prop(&p, "x"), Value::from(10.0));
    assert_eq!(get_prop(&p, "y"), Value::from(20.0));
    // Identity is stable: the swapped proxy is the registered one.
    let again = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, value, ConvertOptions::default())
        .unwrap();
    assert!(again.same(&p));
}

#[test]
fn listener_exceptions_abort_the_crossing() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let listener: ProxyListener = Rc::new(|message| {
        message.throw_exception(Error::validation("crossing denied"));
        Ok(())
    });
    dry_handler.add_proxy_listener(listener);

    let o = Value::Object(plain_object(&[]));
    let err = membrane
        .convert_argument_to_proxy(&wet_handler, &dry_handler, o, ConvertOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn stop_iteration_suppresses_later_listeners() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let first_log = Rc::clone(&order);
    let first: ProxyListener = Rc::new(move |message| {
        first_log.borrow_mut().push("first");
        message.stop_iteration();
        Ok(())
    });
    let second_log = Rc::clone(&order);
    let second: ProxyListener = Rc::new(move |_message| {
        second_log.borrow_mut().push("second");
        Ok(())
    });
    dry_handler.add_proxy_listener(first);
    dry_handler.add_proxy_listener(second);

    membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(plain_object(&[])),
            ConvertOptions::default(),
        )
        .unwrap();
    assert_eq!(&*order.borrow(), &["first"]);
}

#[test]
fn failing_listeners_are_swallowed() {
    let membrane = membrane();
    let wet_handler = membrane.get_handler_by_name(wet(), true).unwrap();
    let dry_handler = membrane.get_handler_by_name(dry(), true).unwrap();

    let reached: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
    let failing: ProxyListener = Rc::new(|_| Err(Error::validation("listener bug")));
    let flag = Rc::clone(&reached);
    let succeeding: ProxyListener = Rc::new(move |_| {
        *flag.borrow_mut() = true;
        Ok(())
    });
    dry_handler.add_proxy_listener(failing);
    dry_handler.add_proxy_listener(succeeding);

    let p = membrane
        .convert_argument_to_proxy(
            &wet_handler,
            &dry_handler,
            Value::Object(plain_object(&[("x", Value::from(1.0))])),
            ConvertOptions::default(),
        )
        .unwrap();
    assert!(*reached.borrow());
    assert_eq!(get_prop(&p, "x"), Value::from(1.0));
}
