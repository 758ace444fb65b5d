//! The membrane façade: graph registry, the wrap/unwrap pipeline and
//! lifecycle operations.

use core::fmt;
use std::{
    cell::RefCell,
    collections::HashSet,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use reflection::{
    reflect, Intrinsics, Object, ObjectId, PropertyDescriptor, PropertyKey, ProxyRevoker,
    ProxyTraps, Value, ValueClass,
};

use crate::{
    cylinder::{GraphMetadata, ProxyCylinder},
    distortions::DistortionsListener,
    error::{Error, Result},
    graph::GraphName,
    handler::GraphHandler,
    listeners::{FunctionListener, ProxyMessage},
    rules::ModifyRules,
    shadow::make_shadow_target,
    value_map::{CylinderRef, ValueMap},
};

/// The reserved sentinel property exposed when `show_graph_name` is on.
pub const GRAPH_NAME_SENTINEL: &str = "membraneGraphName";

/// The sentinel as a property key.
pub fn graph_name_key() -> PropertyKey {
    PropertyKey::from(GRAPH_NAME_SENTINEL)
}

/// Global or per-graph pass-through predicate: accepted values cross the
/// boundary unwrapped.
pub type PassThroughFilter = Rc<dyn Fn(&Value) -> bool>;

/// Which graph-owner implementation proxies dispatch through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PipelineVariant {
    Legacy,
    Pipeline,
}

/// Construction options for a [`Membrane`].
#[derive(Default)]
pub struct MembraneConfig {
    /// Values accepted by this filter pass through every boundary
    /// unwrapped.
    pub pass_through_filter: Option<PassThroughFilter>,
    /// Expose the read-only `membraneGraphName` property on every proxy.
    pub show_graph_name: bool,
    /// Compatibility tag: `"0.10"` selects the pipeline-style graph
    /// owner, anything else the direct handler.
    pub refactor: Option<String>,
}

impl fmt::Debug for MembraneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MembraneConfig")
            .field("pass_through_filter", &self.pass_through_filter.is_some())
            .field("show_graph_name", &self.show_graph_name)
            .field("refactor", &self.refactor)
            .finish()
    }
}

/// Options for [`Membrane::convert_argument_to_proxy`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertOptions {
    /// Tear down any existing cylinder for the value first and rebuild
    /// the binding from scratch.
    pub override_existing: bool,
}

pub(crate) struct MembraneInner {
    config: MembraneConfig,
    variant: PipelineVariant,
    map: ValueMap,
    handlers: RefCell<IndexMap<GraphName, Rc<GraphHandler>>>,
    function_listeners: RefCell<Vec<FunctionListener>>,
    warned: RefCell<HashSet<String>>,
    ignorable: RefCell<HashSet<ObjectId>>,
    intrinsics: Intrinsics,
    self_weak: Weak<MembraneInner>,
}

impl MembraneInner {
    pub(crate) fn map(&self) -> &ValueMap {
        &self.map
    }

    pub(crate) fn show_graph_name(&self) -> bool {
        self.config.show_graph_name
    }

    pub(crate) fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub(crate) fn weak(&self) -> Weak<MembraneInner> {
        self.self_weak.clone()
    }

    pub(crate) fn handler(&self, name: &GraphName) -> Result<Rc<GraphHandler>> {
        self.handlers
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownGraph(name.clone()))
    }

    fn assert_owned(&self, handler: &Rc<GraphHandler>) -> Result<()> {
        match self.handlers.borrow().get(handler.graph_name()) {
            Some(known) if Rc::ptr_eq(known, handler) => Ok(()),
            _ => Err(Error::GraphOwnership(format!(
                "handler for graph {} does not belong to this membrane",
                handler.graph_name()
            ))),
        }
    }

    pub(crate) fn function_listener_snapshot(&self) -> Vec<FunctionListener> {
        self.function_listeners.borrow().clone()
    }

    pub(crate) fn warn_once(&self, message: &str) {
        if self.warned.borrow_mut().insert(message.to_string()) {
            tracing::warn!("{message}");
        }
    }

    pub(crate) fn add_ignorable(&self, value: &Value) {
        if let Some(object) = value.as_object() {
            self.ignorable.borrow_mut().insert(object.id());
        }
    }

    fn passes_through(&self, value: &Value) -> bool {
        if let Some(object) = value.as_object() {
            if self.ignorable.borrow().contains(&object.id()) {
                return true;
            }
        }
        match &self.config.pass_through_filter {
            Some(filter) => filter(value),
            None => false,
        }
    }

    /// The central wrap operation: exposes `arg`, owned by `origin`'s
    /// graph, inside `target`'s graph.
    pub(crate) fn convert(
        self: &Rc<Self>,
        origin: &Rc<GraphHandler>,
        target: &Rc<GraphHandler>,
        arg: Value,
        options: ConvertOptions,
    ) -> Result<Value> {
        self.assert_owned(origin)?;
        self.assert_owned(target)?;
        if origin.is_revoked() || target.is_revoked() {
            return Err(Error::Revoked);
        }
        if origin.graph_name() == target.graph_name() {
            return Ok(arg);
        }
        if arg.is_primitive() {
            return Ok(arg);
        }
        if self.passes_through(&arg) || (origin.passes_through(&arg) && target.passes_through(&arg))
        {
            return Ok(arg);
        }
        let object = arg.as_object().cloned().expect("non-primitive value");

        if options.override_existing {
            if let Some(existing) = self.map.get(object.id()) {
                self.self_destruct(&existing);
            }
        }

        if let Some(cylinder) = self.map.get(object.id()) {
            if cylinder.borrow().has_graph(target.graph_name()) {
                return cylinder.borrow().get_proxy(target.graph_name());
            }
        } else if self.map.is_dead(object.id()) {
            return Err(Error::Revoked);
        }

        let cylinder = self.ensure_mapping_for(origin, arg.clone())?;
        let current = cylinder.borrow().get_proxy(origin.graph_name())?;
        if !current.same(&arg) {
            return Err(Error::GraphOwnership(format!(
                "{arg:?} is not the representation of its cylinder in graph {}",
                origin.graph_name()
            )));
        }

        if !cylinder.borrow().has_graph(target.graph_name()) {
            self.build_foreign_mapping(&cylinder, target)?;
        }
        let result = cylinder.borrow().get_proxy(target.graph_name());
        result
    }

    /// Looks up or creates the cylinder holding `value` as an origin
    /// entry of `handler`'s graph.
    pub(crate) fn ensure_mapping_for(
        self: &Rc<Self>,
        handler: &Rc<GraphHandler>,
        value: Value,
    ) -> Result<CylinderRef> {
        let object = value.as_object().cloned().ok_or(Error::PrimitiveWrap)?;
        if let Some(cylinder) = self.map.get(object.id()) {
            return Ok(cylinder);
        }
        if self.map.is_dead(object.id()) {
            return Err(Error::Revoked);
        }
        let cylinder = Rc::new(RefCell::new(ProxyCylinder::new()));
        cylinder.borrow_mut().set_metadata(
            handler.graph_name(),
            GraphMetadata::Origin { value },
            false,
        )?;
        self.map.insert(object.id(), &cylinder);
        Ok(cylinder)
    }

    /// Builds shadow, proxy and revoker for the cylinder's value inside
    /// `target`'s graph, then notifies origin- and target-graph proxy
    /// listeners. Non-extensible real values lock the new shadow.
    fn build_foreign_mapping(
        self: &Rc<Self>,
        cylinder: &CylinderRef,
        target: &Rc<GraphHandler>,
    ) -> Result<()> {
        let original = cylinder.borrow().get_original()?;
        let original_obj = original
            .as_object()
            .cloned()
            .ok_or(Error::PrimitiveWrap)?;
        let origin_graph = cylinder
            .borrow()
            .origin_graph()
            .cloned()
            .ok_or(Error::OriginalNotSet)?;
        let origin_handler = self.handler(&origin_graph)?;

        let shadow = make_shadow_target(&original_obj);
        let dispatch = target.dispatch_handler();
        let (proxy, revoke) = Object::new_proxy(&shadow, Rc::clone(&dispatch));
        cylinder.borrow_mut().set_metadata(
            target.graph_name(),
            GraphMetadata::Foreign {
                proxy: proxy.clone(),
                shadow: shadow.clone(),
                revoke,
            },
            false,
        )?;
        self.map.insert(proxy.id(), cylinder);
        self.map.insert(shadow.id(), cylinder);

        target.begin_construction(original_obj.id());
        let origin_message = ProxyMessage::new(
            self.weak(),
            Rc::clone(cylinder),
            origin_graph.clone(),
            original.clone(),
            original.clone(),
            Rc::clone(&origin_handler) as Rc<dyn ProxyTraps>,
            true,
        );
        let notified = origin_handler
            .notify_proxy_creation(&origin_message)
            .and_then(|()| {
                let target_message = ProxyMessage::new(
                    self.weak(),
                    Rc::clone(cylinder),
                    target.graph_name().clone(),
                    original.clone(),
                    Value::Object(proxy),
                    dispatch,
                    false,
                );
                target.notify_proxy_creation(&target_message)
            });
        target.finish_construction(original_obj.id());
        notified?;

        if !reflect::is_extensible(&original_obj)? {
            let ctx = target.context_for_cylinder(cylinder)?;
            let shadow = cylinder.borrow().get_shadow_target(target.graph_name())?;
            target.lock_shadow(&ctx, &shadow)?;
        }
        Ok(())
    }

    /// Swaps in a fresh proxy over the existing shadow, revoking the old
    /// proxy and rewiring the value-map entries.
    pub(crate) fn replace_foreign_proxy(
        self: &Rc<Self>,
        cylinder: &CylinderRef,
        graph: &GraphName,
        handler: Rc<dyn ProxyTraps>,
    ) -> Result<Value> {
        let (old_proxy, shadow, old_revoke) =
            cylinder.borrow().foreign_parts(graph).ok_or_else(|| {
                Error::validation(format!("graph {graph} holds no proxy to replace"))
            })?;
        let (proxy, revoke) = Object::new_proxy(&shadow, handler);
        cylinder.borrow_mut().set_metadata(
            graph,
            GraphMetadata::Foreign {
                proxy: proxy.clone(),
                shadow,
                revoke,
            },
            true,
        )?;
        self.map.remove(old_proxy.id());
        old_revoke.revoke();
        self.map.insert(proxy.id(), cylinder);
        Ok(Value::Object(proxy))
    }

    /// Wraps a descriptor crossing from `origin` into `target`: scalar
    /// flags stay, object slots are converted to proxies. Descriptors
    /// carrying only primitives cross intact.
    pub(crate) fn wrap_descriptor_between(
        self: &Rc<Self>,
        origin: &GraphName,
        target: &GraphName,
        desc: PropertyDescriptor,
    ) -> Result<PropertyDescriptor> {
        let origin_handler = self.handler(origin)?;
        let target_handler = self.handler(target)?;
        match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => {
                let value = if value.is_primitive() {
                    value
                } else {
                    self.convert(
                        &origin_handler,
                        &target_handler,
                        value,
                        ConvertOptions::default(),
                    )?
                };
                Ok(PropertyDescriptor::Data {
                    value,
                    writable,
                    enumerable,
                    configurable,
                })
            }
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => {
                let wrap_accessor = |slot: Option<reflection::ObjectRef>| -> Result<_> {
                    match slot {
                        None => Ok(None),
                        Some(function) => {
                            let wrapped = self.convert(
                                &origin_handler,
                                &target_handler,
                                Value::Object(function),
                                ConvertOptions::default(),
                            )?;
                            wrapped.as_object().cloned().map(Some).ok_or_else(|| {
                                Error::validation(
                                    "an accessor wrapped across the membrane must stay an object",
                                )
                            })
                        }
                    }
                };
                Ok(PropertyDescriptor::Accessor {
                    get: wrap_accessor(get)?,
                    set: wrap_accessor(set)?,
                    enumerable,
                    configurable,
                })
            }
        }
    }

    /// Removes the cylinder entirely: foreign entries first, the origin
    /// entry last, value-map keys forgotten.
    pub(crate) fn self_destruct(&self, cylinder: &CylinderRef) {
        let origin = cylinder.borrow().origin_graph().cloned();
        let graphs = cylinder.borrow().graphs();
        for graph in graphs
            .iter()
            .filter(|graph| Some(*graph) != origin.as_ref())
        {
            for id in cylinder.borrow().entry_ids(graph) {
                self.map.remove(id);
            }
            let _ = cylinder.borrow_mut().remove_graph(graph);
        }
        if let Some(origin) = origin {
            for id in cylinder.borrow().entry_ids(&origin) {
                self.map.remove(id);
            }
            let _ = cylinder.borrow_mut().remove_graph(&origin);
        }
    }

    /// Revokes every proxy of the cylinder and tombstones its value-map
    /// keys. The cylinder is terminal afterwards.
    pub(crate) fn revoke_cylinder(&self, cylinder: &CylinderRef) {
        for revoker in cylinder.borrow().foreign_revokers() {
            revoker.revoke();
        }
        let origin = cylinder.borrow().origin_graph().cloned();
        let graphs = cylinder.borrow().graphs();
        for graph in graphs
            .iter()
            .filter(|graph| Some(*graph) != origin.as_ref())
        {
            for id in cylinder.borrow().entry_ids(graph) {
                self.map.kill(id);
            }
            let _ = cylinder.borrow_mut().remove_graph(graph);
        }
        if let Some(origin) = origin {
            for id in cylinder.borrow().entry_ids(&origin) {
                self.map.kill(id);
            }
            let _ = cylinder.borrow_mut().remove_graph(&origin);
        }
    }
}

/// A mediating boundary between named object graphs.
///
/// Values from one graph are exposed to another only through interposed
/// proxies; every trap observed on a proxy is reflected, transformed or
/// denied against the real value according to the installed rules.
pub struct Membrane {
    inner: Rc<MembraneInner>,
}

impl Membrane {
    pub fn new(config: MembraneConfig) -> Self {
        let variant = match config.refactor.as_deref() {
            Some("0.10") => PipelineVariant::Pipeline,
            _ => PipelineVariant::Legacy,
        };
        let inner = Rc::new_cyclic(|self_weak| MembraneInner {
            config,
            variant,
            map: ValueMap::new(),
            handlers: RefCell::new(IndexMap::new()),
            function_listeners: RefCell::new(Vec::new()),
            warned: RefCell::new(HashSet::new()),
            ignorable: RefCell::new(HashSet::new()),
            intrinsics: Intrinsics::new(),
            self_weak: self_weak.clone(),
        });
        Self { inner }
    }

    /// The graph handler registered under `name`, creating it when
    /// `must_create` is set.
    pub fn get_handler_by_name(
        &self,
        name: impl Into<GraphName>,
        must_create: bool,
    ) -> Result<Rc<GraphHandler>> {
        let name = name.into();
        if let Some(existing) = self.inner.handlers.borrow().get(&name) {
            if existing.is_revoked() && must_create {
                return Err(Error::DuplicateGraph(name));
            }
            return Ok(Rc::clone(existing));
        }
        if !must_create {
            return Err(Error::UnknownGraph(name));
        }
        let handler = GraphHandler::new(self.inner.weak(), name.clone(), self.inner.variant);
        self.inner
            .handlers
            .borrow_mut()
            .insert(name, Rc::clone(&handler));
        Ok(handler)
    }

    /// True if `value` has a live representation in `graph`.
    pub fn has_proxy_for_value(&self, graph: &GraphName, value: &Value) -> bool {
        let Some(object) = value.as_object() else {
            return false;
        };
        match self.inner.map.get(object.id()) {
            Some(cylinder) => {
                let cyl = cylinder.borrow();
                cyl.has_graph(graph) && !cyl.is_dead(graph)
            }
            None => false,
        }
    }

    /// The real value behind `value`, if `value` is known to `graph`.
    pub fn get_membrane_value(&self, graph: &GraphName, value: &Value) -> Option<Value> {
        let object = value.as_object()?;
        let cylinder = self.inner.map.get(object.id())?;
        let cyl = cylinder.borrow();
        if !cyl.has_graph(graph) || cyl.is_dead(graph) {
            return None;
        }
        cyl.get_original().ok()
    }

    /// The representation of `value` inside `graph`, if one exists.
    pub fn get_membrane_proxy(&self, graph: &GraphName, value: &Value) -> Option<Value> {
        let object = value.as_object()?;
        let cylinder = self.inner.map.get(object.id())?;
        let proxy = cylinder.borrow().get_proxy(graph);
        proxy.ok()
    }

    /// Exposes `arg`, owned by `origin`'s graph, inside `target`'s
    /// graph. Primitives and pass-through values return unchanged;
    /// repeated conversions return the identical proxy.
    pub fn convert_argument_to_proxy(
        &self,
        origin: &Rc<GraphHandler>,
        target: &Rc<GraphHandler>,
        arg: Value,
        options: ConvertOptions,
    ) -> Result<Value> {
        self.inner.convert(origin, target, arg, options)
    }

    /// Wraps a property descriptor from `origin` into `target` space.
    pub fn wrap_descriptor(
        &self,
        origin: &GraphName,
        target: &GraphName,
        desc: PropertyDescriptor,
    ) -> Result<PropertyDescriptor> {
        self.inner.wrap_descriptor_between(origin, target, desc)
    }

    /// Binds two real values such that each is the other's
    /// representation in the opposite graph. Fails atomically.
    pub fn bind_values_by_handlers(
        &self,
        handler0: &Rc<GraphHandler>,
        value0: &Value,
        handler1: &Rc<GraphHandler>,
        value1: &Value,
    ) -> Result<()> {
        self.inner.assert_owned(handler0)?;
        self.inner.assert_owned(handler1)?;
        if value0.class() == ValueClass::Primitive || value1.class() == ValueClass::Primitive {
            return Err(Error::PrimitiveWrap);
        }
        let object0 = value0.as_object().expect("checked non-primitive").clone();
        let object1 = value1.as_object().expect("checked non-primitive").clone();
        if handler0.graph_name() == handler1.graph_name() && !value0.same(value1) {
            return Err(Error::validation(
                "cannot bind two different values inside a single graph",
            ));
        }

        let cylinder0 = self.inner.map.get(object0.id());
        let cylinder1 = self.inner.map.get(object1.id());

        // All conflict checks happen before any mutation.
        if let Some(cylinder) = &cylinder0 {
            let cyl = cylinder.borrow();
            if cyl.has_graph(handler1.graph_name()) {
                let existing = cyl.get_proxy(handler1.graph_name())?;
                if !existing.same(value1) {
                    return Err(Error::RuleConflict(format!(
                        "{value0:?} is already bound in graph {} to a different partner",
                        handler1.graph_name()
                    )));
                }
            }
            if !cyl.has_graph(handler0.graph_name()) {
                return Err(Error::GraphOwnership(format!(
                    "{value0:?} is mediated but does not belong to graph {}",
                    handler0.graph_name()
                )));
            }
        }
        if let Some(cylinder) = &cylinder1 {
            let cyl = cylinder.borrow();
            if cyl.has_graph(handler0.graph_name()) {
                let existing = cyl.get_proxy(handler0.graph_name())?;
                if !existing.same(value0) {
                    return Err(Error::RuleConflict(format!(
                        "{value1:?} is already bound in graph {} to a different partner",
                        handler0.graph_name()
                    )));
                }
            }
            if !cyl.has_graph(handler1.graph_name()) {
                return Err(Error::GraphOwnership(format!(
                    "{value1:?} is mediated but does not belong to graph {}",
                    handler1.graph_name()
                )));
            }
        }

        match (cylinder0, cylinder1) {
            (Some(a), Some(b)) => {
                if Rc::ptr_eq(&a, &b) {
                    Ok(())
                } else {
                    Err(Error::RuleConflict(
                        "both values are already mediated by distinct cylinders".to_string(),
                    ))
                }
            }
            (Some(cylinder), None) => {
                self.bind_into(&cylinder, handler1.graph_name(), &object1)
            }
            (None, Some(cylinder)) => {
                self.bind_into(&cylinder, handler0.graph_name(), &object0)
            }
            (None, None) => {
                let cylinder = self
                    .inner
                    .ensure_mapping_for(handler0, value0.clone())?;
                self.bind_into(&cylinder, handler1.graph_name(), &object1)
            }
        }
    }

    fn bind_into(
        &self,
        cylinder: &CylinderRef,
        graph: &GraphName,
        bound: &reflection::ObjectRef,
    ) -> Result<()> {
        if cylinder.borrow().has_graph(graph) {
            // The pre-checks guarantee the existing entry matches.
            return Ok(());
        }
        cylinder.borrow_mut().set_metadata(
            graph,
            GraphMetadata::Foreign {
                proxy: bound.clone(),
                shadow: bound.clone(),
                revoke: ProxyRevoker::inert(),
            },
            false,
        )?;
        self.inner.map.insert(bound.id(), cylinder);
        Ok(())
    }

    /// Kills the cylinder holding `value`: every proxy is revoked, the
    /// map entries become tombstones. The real value itself survives.
    pub fn revoke_mapping(&self, value: &Value) {
        if let Some(object) = value.as_object() {
            if let Some(cylinder) = self.inner.map.get(object.id()) {
                self.inner.revoke_cylinder(&cylinder);
            }
        }
    }

    /// Tears the whole membrane down: every graph is revoked in
    /// registration order.
    pub fn revoke_everything(&self) -> Result<()> {
        let handlers: Vec<_> = self.inner.handlers.borrow().values().cloned().collect();
        for handler in handlers {
            handler.revoke_everything()?;
        }
        Ok(())
    }

    /// Registers a membrane-wide function listener.
    pub fn add_function_listener(&self, listener: FunctionListener) {
        self.inner.function_listeners.borrow_mut().push(listener);
    }

    pub fn remove_function_listener(&self, listener: &FunctionListener) {
        self.inner
            .function_listeners
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, listener));
    }

    /// Emits `message` through the logging layer at most once per
    /// membrane.
    pub fn warn_once(&self, message: &str) {
        self.inner.warn_once(message);
    }

    /// The frozen primordial objects this membrane treats as shared.
    pub fn primordials(&self) -> Vec<Value> {
        self.inner
            .intrinsics
            .all()
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        self.inner.intrinsics()
    }

    /// Marks `value` as pass-through: it crosses every boundary
    /// unwrapped from now on.
    pub fn add_ignorable(&self, value: &Value) {
        self.inner.add_ignorable(value);
    }

    /// The per-proxy rule-modification API.
    pub fn modify_rules(&self) -> ModifyRules {
        ModifyRules::new(Rc::clone(&self.inner))
    }

    /// A fresh declarative distortions catalog bound to this membrane.
    pub fn distortions_listener(&self) -> DistortionsListener {
        DistortionsListener::new(Rc::clone(&self.inner))
    }
}

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.inner.handlers.borrow();
        f.debug_struct("Membrane")
            .field("graphs", &handlers.keys().collect::<Vec<_>>())
            .field("variant", &self.inner.variant)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflection::reflect;

    fn fixture() -> (Membrane, Rc<GraphHandler>, Rc<GraphHandler>) {
        let membrane = Membrane::new(MembraneConfig {
            refactor: Some("0.10".to_string()),
            ..MembraneConfig::default()
        });
        let wet = membrane.get_handler_by_name("wet", true).unwrap();
        let dry = membrane.get_handler_by_name("dry", true).unwrap();
        (membrane, wet, dry)
    }

    fn object_with(key: &str, value: Value) -> Value {
        let object = Object::new_plain(None);
        reflect::define_property(&object, key.into(), PropertyDescriptor::data(value)).unwrap();
        Value::Object(object)
    }

    #[test]
    fn local_descriptors_shadow_the_real_property_per_graph() {
        let (membrane, wet, dry) = fixture();
        let real = object_with("x", Value::from(1.0));
        let proxy = membrane
            .convert_argument_to_proxy(&wet, &dry, real.clone(), ConvertOptions::default())
            .unwrap();
        let proxy_obj = proxy.as_object().unwrap();

        let cylinder = membrane
            .inner
            .map
            .get(real.as_object().unwrap().id())
            .expect("cylinder for the real value");
        cylinder
            .borrow_mut()
            .set_local_descriptor(
                &GraphName::from("dry"),
                "x".into(),
                PropertyDescriptor::data(Value::from(99.0)),
            )
            .unwrap();

        // The local descriptor wins in the dry graph only.
        assert_eq!(
            reflect::get(proxy_obj, &"x".into(), &proxy).unwrap(),
            Value::from(99.0)
        );
        assert_eq!(
            reflect::get(real.as_object().unwrap(), &"x".into(), &real).unwrap(),
            Value::from(1.0)
        );

        // Unsetting it restores visibility of the real property.
        cylinder
            .borrow_mut()
            .delete_local_descriptor(&GraphName::from("dry"), &"x".into(), false)
            .unwrap();
        assert_eq!(
            reflect::get(proxy_obj, &"x".into(), &proxy).unwrap(),
            Value::from(1.0)
        );
    }

    #[test]
    fn foreign_handlers_are_rejected() {
        let (membrane, wet, _dry) = fixture();
        let other = Membrane::new(MembraneConfig::default());
        let foreign = other.get_handler_by_name("dry", true).unwrap();
        let err = membrane
            .convert_argument_to_proxy(
                &wet,
                &foreign,
                object_with("x", Value::Null),
                ConvertOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::GraphOwnership(_)));
    }

    #[test]
    fn unknown_graphs_are_not_created_implicitly() {
        let (membrane, _wet, _dry) = fixture();
        assert!(matches!(
            membrane.get_handler_by_name("damp", false),
            Err(Error::UnknownGraph(_))
        ));
        assert!(membrane.get_handler_by_name("damp", true).is_ok());
        // The second lookup returns the same handler.
        let a = membrane.get_handler_by_name("damp", false).unwrap();
        let b = membrane.get_handler_by_name("damp", true).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn membrane_value_and_proxy_lookups() {
        let (membrane, wet, dry) = fixture();
        let real = object_with("x", Value::from(1.0));
        let proxy = membrane
            .convert_argument_to_proxy(&wet, &dry, real.clone(), ConvertOptions::default())
            .unwrap();

        let dry_name = GraphName::from("dry");
        let wet_name = GraphName::from("wet");
        assert!(membrane.has_proxy_for_value(&dry_name, &proxy));
        assert!(membrane.has_proxy_for_value(&wet_name, &real));
        assert!(membrane
            .get_membrane_value(&dry_name, &proxy)
            .unwrap()
            .same(&real));
        assert!(membrane
            .get_membrane_proxy(&dry_name, &real)
            .unwrap()
            .same(&proxy));
        assert!(membrane
            .get_membrane_proxy(&wet_name, &proxy)
            .unwrap()
            .same(&real));
    }

    #[test]
    fn override_rebuilds_the_binding_from_scratch() {
        let (membrane, wet, dry) = fixture();
        let real = object_with("x", Value::from(1.0));
        let first = membrane
            .convert_argument_to_proxy(&wet, &dry, real.clone(), ConvertOptions::default())
            .unwrap();
        let second = membrane
            .convert_argument_to_proxy(
                &wet,
                &dry,
                real.clone(),
                ConvertOptions {
                    override_existing: true,
                },
            )
            .unwrap();
        assert!(!first.same(&second));
        // The fresh binding is the registered one.
        assert!(membrane
            .get_membrane_proxy(&GraphName::from("dry"), &real)
            .unwrap()
            .same(&second));
    }

    #[test]
    fn revoke_mapping_kills_a_single_cylinder() {
        let (membrane, wet, dry) = fixture();
        let doomed = object_with("x", Value::from(1.0));
        let spared = object_with("y", Value::from(2.0));
        let doomed_proxy = membrane
            .convert_argument_to_proxy(&wet, &dry, doomed.clone(), ConvertOptions::default())
            .unwrap();
        let spared_proxy = membrane
            .convert_argument_to_proxy(&wet, &dry, spared.clone(), ConvertOptions::default())
            .unwrap();

        membrane.revoke_mapping(&doomed);
        let doomed_obj = doomed_proxy.as_object().unwrap();
        assert!(reflect::get(doomed_obj, &"x".into(), &doomed_proxy).is_err());
        let spared_obj = spared_proxy.as_object().unwrap();
        assert_eq!(
            reflect::get(spared_obj, &"y".into(), &spared_proxy).unwrap(),
            Value::from(2.0)
        );
    }

    #[test]
    fn warn_once_deduplicates_by_message() {
        let (membrane, _wet, _dry) = fixture();
        membrane.warn_once("repeated message");
        membrane.warn_once("repeated message");
        assert_eq!(membrane.inner.warned.borrow().len(), 1);
    }
}
