//! Per-proxy rule installation.
//!
//! Every operation first asserts that the given proxy is the current
//! proxy for the named graph, then mutates the cylinder's local rule
//! state. Rules installed here never touch the real value: they change
//! what one graph observes.

use std::{cell::RefCell, rc::Rc};

use reflection::{
    ObjectRef, PropertyDescriptor, PropertyKey, ProxyTraps, Trap, Value, ValueClass,
};

use crate::{
    cylinder::{ArgumentLimit, KeyFilter},
    error::{Error, Result},
    graph::GraphName,
    handler::GraphHandler,
    membrane::MembraneInner,
    value_map::CylinderRef,
};

/// A key filter argument: a predicate, or an allow-list of keys.
pub enum OwnKeysFilter {
    Predicate(Rc<dyn Fn(&PropertyKey) -> bool>),
    AllowList(Vec<PropertyKey>),
}

impl OwnKeysFilter {
    pub fn allow_list<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<PropertyKey>,
    {
        OwnKeysFilter::AllowList(keys.into_iter().map(Into::into).collect())
    }

    fn into_key_filter(self) -> KeyFilter {
        match self {
            OwnKeysFilter::Predicate(predicate) => predicate,
            OwnKeysFilter::AllowList(keys) => Rc::new(move |key| keys.contains(key)),
        }
    }
}

/// The rule-modification API of a membrane.
pub struct ModifyRules {
    membrane: Rc<MembraneInner>,
}

impl ModifyRules {
    pub(crate) fn new(membrane: Rc<MembraneInner>) -> Self {
        Self { membrane }
    }

    fn resolve(&self, graph: &GraphName, proxy: &Value) -> Result<CylinderRef> {
        self.membrane.handler(graph)?;
        let object = proxy.as_object().ok_or(Error::PrimitiveWrap)?;
        let cylinder = self.membrane.map().get(object.id()).ok_or_else(|| {
            Error::GraphOwnership(format!("{proxy:?} is not mediated by this membrane"))
        })?;
        let current = cylinder.borrow().get_proxy(graph)?;
        if !current.same(proxy) {
            return Err(Error::GraphOwnership(format!(
                "{proxy:?} is not the current proxy for graph {graph}"
            )));
        }
        Ok(cylinder)
    }

    /// Unknown properties set through the proxy stay local to `graph`
    /// instead of propagating to the real value.
    pub fn store_unknown_as_local(&self, graph: &GraphName, proxy: &Value) -> Result<()> {
        let cylinder = self.resolve(graph, proxy)?;
        let result = cylinder
            .borrow_mut()
            .set_store_unknown_as_local(graph, true);
        result
    }

    /// Deletions through the proxy hide the key for `graph` only.
    pub fn require_local_delete(&self, graph: &GraphName, proxy: &Value) -> Result<()> {
        let cylinder = self.resolve(graph, proxy)?;
        let result = cylinder.borrow_mut().set_require_local_delete(graph, true);
        result
    }

    /// Installs (or with `None` clears) the own-keys filter for `graph`.
    ///
    /// Fails with [`Error::RuleConflict`] once any shadow of the
    /// cylinder is non-extensible: the exposed key set is already
    /// committed and may no longer shrink.
    pub fn filter_own_keys(
        &self,
        graph: &GraphName,
        proxy: &Value,
        filter: Option<OwnKeysFilter>,
    ) -> Result<()> {
        let cylinder = self.resolve(graph, proxy)?;
        {
            let cyl = cylinder.borrow();
            for other in cyl.graphs() {
                if let Some((_, shadow, _)) = cyl.foreign_parts(&other) {
                    if !shadow.extensible() {
                        return Err(Error::RuleConflict(format!(
                            "cannot filter own keys: the shadow in graph {other} is already \
                             non-extensible"
                        )));
                    }
                }
            }
        }
        let result = cylinder
            .borrow_mut()
            .set_own_keys_filter(graph, filter.map(OwnKeysFilter::into_key_filter));
        result
    }

    /// Truncates mediated calls of `proxy` observed from `graph`.
    pub fn truncate_arg_list(
        &self,
        graph: &GraphName,
        proxy: &Value,
        limit: ArgumentLimit,
    ) -> Result<()> {
        if proxy.class() != ValueClass::Function {
            return Err(Error::validation(
                "truncate_arg_list requires a function proxy",
            ));
        }
        let cylinder = self.resolve(graph, proxy)?;
        let result = cylinder.borrow_mut().set_truncate_arg_list(graph, limit);
        result
    }

    /// Disables the given traps for `proxy` in `graph`; a disabled trap
    /// fails with [`Error::TrapDisabled`].
    pub fn disable_traps(&self, graph: &GraphName, proxy: &Value, traps: &[Trap]) -> Result<()> {
        let cylinder = self.resolve(graph, proxy)?;
        let result = cylinder.borrow_mut().disable_traps(graph, traps);
        result
    }

    /// Builds a chain handler over an existing base.
    pub fn create_chain_handler(
        &self,
        source: ChainSource,
        overrides: TrapOverrides,
    ) -> Result<Rc<ChainHandler>> {
        let (graph_name, base): (GraphName, Rc<dyn ProxyTraps>) = match source {
            ChainSource::Reflect(graph) => {
                self.membrane.handler(&graph)?;
                (graph, Rc::new(reflection::Forwarding))
            }
            ChainSource::Graph(handler) => {
                let graph = handler.graph_name().clone();
                (graph, handler)
            }
            ChainSource::Chain(chain) => {
                let graph = chain.graph_name().clone();
                (graph, chain)
            }
        };
        Ok(Rc::new(ChainHandler {
            graph_name,
            base: RefCell::new(base),
            overrides,
        }))
    }

    /// Replaces the proxy of `handler`'s graph with a fresh one
    /// dispatching to `handler`, reusing the existing shadow target. The
    /// old proxy is revoked; the new proxy is returned.
    pub fn replace_proxy(&self, old_proxy: &Value, handler: &Rc<ChainHandler>) -> Result<Value> {
        let graph = handler.graph_name().clone();
        let object = old_proxy.as_object().ok_or(Error::PrimitiveWrap)?;
        let cylinder = self.membrane.map().get(object.id()).ok_or_else(|| {
            Error::GraphOwnership(format!("{old_proxy:?} is not mediated by this membrane"))
        })?;
        let current = cylinder.borrow().get_proxy(&graph);
        match current {
            Ok(current) if current.same(old_proxy) => {}
            _ => {
                return Err(Error::RuleConflict(format!(
                    "the replacement handler belongs to graph {graph}, which does not hold this \
                     proxy"
                )));
            }
        }
        self.membrane.replace_foreign_proxy(
            &cylinder,
            &graph,
            Rc::clone(handler) as Rc<dyn ProxyTraps>,
        )
    }
}

/// Base of a [`ChainHandler`].
pub enum ChainSource {
    /// Plain forwarding to the target (a `Reflect`-equivalent base) for
    /// proxies of the named graph.
    Reflect(GraphName),
    /// An existing graph handler.
    Graph(Rc<GraphHandler>),
    /// Another chain handler.
    Chain(Rc<ChainHandler>),
}

pub type GetOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, &PropertyKey, &Value) -> reflection::Result<Value>>;
pub type SetOverride = Box<
    dyn Fn(&dyn ProxyTraps, &ObjectRef, &PropertyKey, Value, &Value) -> reflection::Result<bool>,
>;
pub type HasOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, &PropertyKey) -> reflection::Result<bool>>;
pub type DeletePropertyOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, &PropertyKey) -> reflection::Result<bool>>;
pub type OwnKeysOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef) -> reflection::Result<Vec<PropertyKey>>>;
pub type GetOwnPropertyDescriptorOverride = Box<
    dyn Fn(&dyn ProxyTraps, &ObjectRef, &PropertyKey) -> reflection::Result<Option<PropertyDescriptor>>,
>;
pub type DefinePropertyOverride = Box<
    dyn Fn(&dyn ProxyTraps, &ObjectRef, PropertyKey, PropertyDescriptor) -> reflection::Result<bool>,
>;
pub type GetPrototypeOfOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef) -> reflection::Result<Option<ObjectRef>>>;
pub type SetPrototypeOfOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, Option<ObjectRef>) -> reflection::Result<bool>>;
pub type IsExtensibleOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef) -> reflection::Result<bool>>;
pub type PreventExtensionsOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef) -> reflection::Result<bool>>;
pub type ApplyOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, Value, &[Value]) -> reflection::Result<Value>>;
pub type ConstructOverride =
    Box<dyn Fn(&dyn ProxyTraps, &ObjectRef, &[Value], &ObjectRef) -> reflection::Result<Value>>;

/// Trap overrides for a [`ChainHandler`]. Only the thirteen recognized
/// traps exist as slots; anything else has nowhere to go.
#[derive(Default)]
pub struct TrapOverrides {
    pub get: Option<GetOverride>,
    pub set: Option<SetOverride>,
    pub has: Option<HasOverride>,
    pub delete_property: Option<DeletePropertyOverride>,
    pub own_keys: Option<OwnKeysOverride>,
    pub get_own_property_descriptor: Option<GetOwnPropertyDescriptorOverride>,
    pub define_property: Option<DefinePropertyOverride>,
    pub get_prototype_of: Option<GetPrototypeOfOverride>,
    pub set_prototype_of: Option<SetPrototypeOfOverride>,
    pub is_extensible: Option<IsExtensibleOverride>,
    pub prevent_extensions: Option<PreventExtensionsOverride>,
    pub apply: Option<ApplyOverride>,
    pub construct: Option<ConstructOverride>,
}

/// A handler layered over a base handler, overriding chosen traps.
///
/// The graph, base and override slots are fixed at creation; a chain
/// handler cannot be rewired into another graph.
pub struct ChainHandler {
    graph_name: GraphName,
    base: RefCell<Rc<dyn ProxyTraps>>,
    overrides: TrapOverrides,
}

impl ChainHandler {
    pub fn graph_name(&self) -> &GraphName {
        &self.graph_name
    }

    fn base(&self) -> Rc<dyn ProxyTraps> {
        Rc::clone(&self.base.borrow())
    }

    /// Re-points the fallthrough base. Used by pipeline dispatch so
    /// stages inserted after this node stay reachable.
    pub(crate) fn rebase(&self, base: Rc<dyn ProxyTraps>) {
        *self.base.borrow_mut() = base;
    }
}

impl ProxyTraps for ChainHandler {
    fn get(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        receiver: &Value,
    ) -> reflection::Result<Value> {
        let base = self.base();
        match &self.overrides.get {
            Some(hook) => hook(base.as_ref(), target, key, receiver),
            None => base.get(target, key, receiver),
        }
    }

    fn set(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.set {
            Some(hook) => hook(base.as_ref(), target, key, value, receiver),
            None => base.set(target, key, value, receiver),
        }
    }

    fn has(&self, target: &ObjectRef, key: &PropertyKey) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.has {
            Some(hook) => hook(base.as_ref(), target, key),
            None => base.has(target, key),
        }
    }

    fn delete_property(&self, target: &ObjectRef, key: &PropertyKey) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.delete_property {
            Some(hook) => hook(base.as_ref(), target, key),
            None => base.delete_property(target, key),
        }
    }

    fn own_keys(&self, target: &ObjectRef) -> reflection::Result<Vec<PropertyKey>> {
        let base = self.base();
        match &self.overrides.own_keys {
            Some(hook) => hook(base.as_ref(), target),
            None => base.own_keys(target),
        }
    }

    fn get_own_property_descriptor(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> reflection::Result<Option<PropertyDescriptor>> {
        let base = self.base();
        match &self.overrides.get_own_property_descriptor {
            Some(hook) => hook(base.as_ref(), target, key),
            None => base.get_own_property_descriptor(target, key),
        }
    }

    fn define_property(
        &self,
        target: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.define_property {
            Some(hook) => hook(base.as_ref(), target, key, desc),
            None => base.define_property(target, key, desc),
        }
    }

    fn get_prototype_of(&self, target: &ObjectRef) -> reflection::Result<Option<ObjectRef>> {
        let base = self.base();
        match &self.overrides.get_prototype_of {
            Some(hook) => hook(base.as_ref(), target),
            None => base.get_prototype_of(target),
        }
    }

    fn set_prototype_of(
        &self,
        target: &ObjectRef,
        prototype: Option<ObjectRef>,
    ) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.set_prototype_of {
            Some(hook) => hook(base.as_ref(), target, prototype),
            None => base.set_prototype_of(target, prototype),
        }
    }

    fn is_extensible(&self, target: &ObjectRef) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.is_extensible {
            Some(hook) => hook(base.as_ref(), target),
            None => base.is_extensible(target),
        }
    }

    fn prevent_extensions(&self, target: &ObjectRef) -> reflection::Result<bool> {
        let base = self.base();
        match &self.overrides.prevent_extensions {
            Some(hook) => hook(base.as_ref(), target),
            None => base.prevent_extensions(target),
        }
    }

    fn apply(&self, target: &ObjectRef, this: Value, args: &[Value]) -> reflection::Result<Value> {
        let base = self.base();
        match &self.overrides.apply {
            Some(hook) => hook(base.as_ref(), target, this, args),
            None => base.apply(target, this, args),
        }
    }

    fn construct(
        &self,
        target: &ObjectRef,
        args: &[Value],
        new_target: &ObjectRef,
    ) -> reflection::Result<Value> {
        let base = self.base();
        match &self.overrides.construct {
            Some(hook) => hook(base.as_ref(), target, args, new_target),
            None => base.construct(target, args, new_target),
        }
    }
}

impl std::fmt::Debug for ChainHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandler")
            .field("graph", &self.graph_name)
            .finish_non_exhaustive()
    }
}
