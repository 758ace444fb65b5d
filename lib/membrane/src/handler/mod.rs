//! The per-graph trap handler.
//!
//! One [`GraphHandler`] exists per object graph. Every proxy the
//! membrane creates in that graph dispatches its traps here (directly,
//! or through the per-graph stage pipeline). Each trap resolves the
//! real value behind the shadow target, runs the operation against the
//! origin graph, and wraps every reference crossing back.

mod locking;
mod own_keys;
mod traps;

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

use reflection::{
    reflect, ObjectId, ObjectRef, PropertyDescriptor, PropertyKey, Trap, Value,
};

use crate::{
    error::{Error, Result},
    graph::GraphName,
    listeners::{
        notify_function_listeners, notify_proxy_listeners, FunctionEvent, FunctionListener,
        FunctionOutcome, FunctionReason, ProxyListener, ProxyMessage,
    },
    membrane::{MembraneInner, PassThroughFilter, PipelineVariant},
    pipeline::PipelineNode,
    rules::ChainHandler,
    value_map::CylinderRef,
};

pub(crate) type Finalizer = Box<dyn FnOnce()>;

/// Which recursive local flag a trap consults.
#[derive(Clone, Copy, Debug)]
pub(crate) enum LocalFlagKind {
    StoreUnknownAsLocal,
    RequireLocalDelete,
}

/// Resolved per-trap state: the cylinder and the real value behind a
/// shadow target.
pub(crate) struct TrapContext {
    pub(crate) membrane: Rc<MembraneInner>,
    pub(crate) cylinder: CylinderRef,
    pub(crate) origin_graph: GraphName,
    pub(crate) original: Value,
    pub(crate) original_obj: ObjectRef,
}

/// Trap handler for one object graph.
pub struct GraphHandler {
    membrane: Weak<MembraneInner>,
    graph_name: GraphName,
    revoked: Cell<bool>,
    self_weak: RefCell<Weak<GraphHandler>>,
    pipeline: RefCell<Option<Rc<PipelineNode>>>,
    proxy_listeners: RefCell<Vec<ProxyListener>>,
    function_listeners: RefCell<Vec<FunctionListener>>,
    pass_through: RefCell<Option<PassThroughFilter>>,
    in_construction: RefCell<HashMap<ObjectId, Vec<Finalizer>>>,
}

impl GraphHandler {
    pub(crate) fn new(
        membrane: Weak<MembraneInner>,
        graph_name: GraphName,
        variant: PipelineVariant,
    ) -> Rc<Self> {
        let handler = Rc::new(Self {
            membrane,
            graph_name,
            revoked: Cell::new(false),
            self_weak: RefCell::new(Weak::new()),
            pipeline: RefCell::new(None),
            proxy_listeners: RefCell::new(Vec::new()),
            function_listeners: RefCell::new(Vec::new()),
            pass_through: RefCell::new(None),
            in_construction: RefCell::new(HashMap::new()),
        });
        *handler.self_weak.borrow_mut() = Rc::downgrade(&handler);
        if variant == PipelineVariant::Pipeline {
            *handler.pipeline.borrow_mut() = Some(PipelineNode::standard_chain(&handler));
        }
        handler
    }

    pub fn graph_name(&self) -> &GraphName {
        &self.graph_name
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.get()
    }

    /// The dispatch entry for new proxies: the stage-pipeline head when
    /// the membrane runs in pipeline mode, the handler itself otherwise.
    pub(crate) fn dispatch_handler(self: &Rc<Self>) -> Rc<dyn reflection::ProxyTraps> {
        match &*self.pipeline.borrow() {
            Some(head) => Rc::clone(head) as Rc<dyn reflection::ProxyTraps>,
            None => Rc::clone(self) as Rc<dyn reflection::ProxyTraps>,
        }
    }

    /// Registers a listener fired when a value first crosses into this
    /// graph.
    pub fn add_proxy_listener(&self, listener: ProxyListener) {
        self.proxy_listeners.borrow_mut().push(listener);
    }

    pub fn remove_proxy_listener(&self, listener: &ProxyListener) {
        self.proxy_listeners
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, listener));
    }

    /// Registers a listener fired around `apply`/`construct` on proxies
    /// of this graph.
    pub fn add_function_listener(&self, listener: FunctionListener) {
        self.function_listeners.borrow_mut().push(listener);
    }

    pub fn remove_function_listener(&self, listener: &FunctionListener) {
        self.function_listeners
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, listener));
    }

    /// Splices an application node into this graph's pipeline after the
    /// stage named `lead_name`. With `insert_target`, the node applies
    /// only to that shadow's proxy.
    pub fn insert_handler(
        &self,
        lead_name: &str,
        name: &str,
        node: Rc<ChainHandler>,
        insert_target: Option<&ObjectRef>,
    ) -> Result<()> {
        if node.graph_name() != &self.graph_name {
            return Err(Error::RuleConflict(format!(
                "cannot insert a node for graph {} into the pipeline of graph {}",
                node.graph_name(),
                self.graph_name
            )));
        }
        let head = self.pipeline.borrow().clone().ok_or_else(|| {
            Error::validation("this graph runs the legacy handler; there is no pipeline to insert into")
        })?;
        head.insert_after(lead_name, name, node, insert_target.map(|object| object.id()))
    }

    /// Per-graph pass-through filter; a value passes unwrapped only when
    /// both the origin and target graph filters accept it.
    pub fn set_pass_through(&self, filter: Option<PassThroughFilter>) {
        *self.pass_through.borrow_mut() = filter;
    }

    pub(crate) fn passes_through(&self, value: &Value) -> bool {
        match &*self.pass_through.borrow() {
            Some(filter) => filter(value),
            None => false,
        }
    }

    /// Terminates every proxy in this graph. Cylinders originating here
    /// are revoked across all graphs; cylinders merely projected into
    /// this graph lose only their local entry.
    pub fn revoke_everything(&self) -> Result<()> {
        if self.revoked.replace(true) {
            return Ok(());
        }
        let membrane = self.membrane()?;
        for cylinder in membrane.map().live_cylinders() {
            let (has_graph, is_origin) = {
                let cyl = cylinder.borrow();
                (
                    cyl.has_graph(&self.graph_name) && !cyl.is_dead(&self.graph_name),
                    cyl.origin_graph() == Some(&self.graph_name),
                )
            };
            if !has_graph {
                continue;
            }
            if is_origin {
                membrane.revoke_cylinder(&cylinder);
            } else {
                let parts = cylinder.borrow().foreign_parts(&self.graph_name);
                if let Some((proxy, shadow, revoke)) = parts {
                    revoke.revoke();
                    membrane.map().kill(proxy.id());
                    membrane.map().kill(shadow.id());
                }
                cylinder.borrow_mut().remove_graph(&self.graph_name)?;
            }
        }
        Ok(())
    }

    // --- Internal plumbing --------------------------------------------

    pub(crate) fn membrane(&self) -> Result<Rc<MembraneInner>> {
        self.membrane
            .upgrade()
            .ok_or_else(|| Error::validation("the membrane was dropped"))
    }

    pub(crate) fn self_rc(&self) -> Rc<GraphHandler> {
        self.self_weak
            .borrow()
            .upgrade()
            .expect("graph handler outlives its own weak reference")
    }

    pub(crate) fn downgrade(&self) -> Weak<GraphHandler> {
        self.self_weak.borrow().clone()
    }

    /// Builds the trap context for a cylinder known to span this graph.
    pub(crate) fn context_for_cylinder(&self, cylinder: &CylinderRef) -> Result<TrapContext> {
        let membrane = self.membrane()?;
        let (origin_graph, original) = {
            let cyl = cylinder.borrow();
            let origin_graph = cyl.origin_graph().cloned().ok_or(Error::OriginalNotSet)?;
            if cyl.is_dead(&origin_graph) || cyl.is_dead(&self.graph_name) {
                return Err(Error::Revoked);
            }
            (origin_graph, cyl.get_original()?)
        };
        let original_obj = original
            .as_object()
            .cloned()
            .ok_or_else(|| Error::validation("cylinder original is not an object"))?;
        Ok(TrapContext {
            membrane,
            cylinder: Rc::clone(cylinder),
            origin_graph,
            original,
            original_obj,
        })
    }

    /// Common entry of every trap: revocation, cylinder resolution,
    /// disabled-trap enforcement.
    pub(crate) fn trap_guard(&self, trap: Trap, shadow: &ObjectRef) -> Result<TrapContext> {
        if self.revoked.get() {
            return Err(Error::Revoked);
        }
        let membrane = self.membrane()?;
        if membrane.map().is_dead(shadow.id()) {
            return Err(Error::Revoked);
        }
        let cylinder = membrane.map().get(shadow.id()).ok_or_else(|| {
            Error::GraphOwnership(format!(
                "shadow target {:?} is not known to graph {}",
                shadow, self.graph_name
            ))
        })?;
        let ctx = self.context_for_cylinder(&cylinder)?;
        {
            let cyl = cylinder.borrow();
            let shadow_matches = cyl
                .get_shadow_target(&self.graph_name)
                .map(|expected| expected.ptr_eq(shadow))
                .unwrap_or(false);
            if !shadow_matches {
                return Err(Error::GraphOwnership(format!(
                    "object {:?} is not the shadow target for graph {}",
                    shadow, self.graph_name
                )));
            }
            if cyl.trap_disabled(&self.graph_name, trap)?
                || cyl.trap_disabled(&ctx.origin_graph, trap)?
            {
                return Err(Error::TrapDisabled(trap));
            }
        }
        Ok(ctx)
    }

    /// Walks the real value's ordinary prototype chain, true if any
    /// cylinder on the chain carries the flag for this graph or the
    /// origin graph.
    pub(crate) fn should_be_local(&self, ctx: &TrapContext, kind: LocalFlagKind) -> Result<bool> {
        let mut cursor = Some(ctx.original_obj.clone());
        while let Some(object) = cursor {
            if let Some(cylinder) = ctx.membrane.map().get(object.id()) {
                let cyl = cylinder.borrow();
                for graph in [&self.graph_name, &ctx.origin_graph] {
                    if !cyl.has_graph(graph) || cyl.is_dead(graph) {
                        continue;
                    }
                    let flagged = match kind {
                        LocalFlagKind::StoreUnknownAsLocal => cyl.store_unknown_as_local(graph)?,
                        LocalFlagKind::RequireLocalDelete => cyl.requires_local_delete(graph)?,
                    };
                    if flagged {
                        return Ok(true);
                    }
                }
            }
            if object.is_proxy() {
                break;
            }
            cursor = object.prototype();
        }
        Ok(false)
    }

    /// True if either side's own-keys filter hides `key`.
    pub(crate) fn key_filtered(&self, ctx: &TrapContext, key: &PropertyKey) -> Result<bool> {
        let cyl = ctx.cylinder.borrow();
        if let Some(filter) = cyl.get_own_keys_filter(&ctx.origin_graph)? {
            if !filter(key) {
                return Ok(true);
            }
        }
        if let Some(filter) = cyl.get_own_keys_filter(&self.graph_name)? {
            if !filter(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The sentinel descriptor for the reserved graph-name key, when
    /// enabled.
    fn sentinel_descriptor(&self, ctx: &TrapContext, key: &PropertyKey) -> Option<PropertyDescriptor> {
        if !ctx.membrane.show_graph_name() || *key != crate::membrane::graph_name_key() {
            return None;
        }
        let value = match &self.graph_name {
            GraphName::String(s) => Value::String(Rc::clone(s)),
            GraphName::Symbol(symbol) => Value::Symbol(symbol.clone()),
        };
        Some(PropertyDescriptor::Data {
            value,
            writable: false,
            enumerable: true,
            configurable: false,
        })
    }

    /// The own-descriptor a proxy of this graph exposes for `key`:
    /// sentinel, then local deletions, local descriptors of either side,
    /// key filters, and finally the wrapped real descriptor.
    /// Non-configurable results are pinned onto the shadow.
    pub(crate) fn get_own_desc(
        &self,
        ctx: &TrapContext,
        shadow: &ObjectRef,
        key: &PropertyKey,
        trap: Trap,
    ) -> Result<Option<PropertyDescriptor>> {
        if let Some(sentinel) = self.sentinel_descriptor(ctx, key) {
            self.pin_on_shadow(shadow, key, sentinel.clone(), trap)?;
            return Ok(Some(sentinel));
        }
        let origin_local = {
            let cyl = ctx.cylinder.borrow();
            if cyl.was_deleted_locally(&self.graph_name, key)?
                || cyl.was_deleted_locally(&ctx.origin_graph, key)?
            {
                return Ok(None);
            }
            if let Some(desc) = cyl.get_local_descriptor(&self.graph_name, key)? {
                if !desc.configurable() {
                    self.pin_on_shadow(shadow, key, desc.clone(), trap)?;
                }
                return Ok(Some(desc));
            }
            cyl.get_local_descriptor(&ctx.origin_graph, key)?
        };
        if let Some(desc) = origin_local {
            let wrapped =
                ctx.membrane
                    .wrap_descriptor_between(&ctx.origin_graph, &self.graph_name, desc)?;
            if !wrapped.configurable() {
                self.pin_on_shadow(shadow, key, wrapped.clone(), trap)?;
            }
            return Ok(Some(wrapped));
        }
        if self.key_filtered(ctx, key)? {
            return Ok(None);
        }
        let Some(real_desc) = reflect::get_own_property_descriptor(&ctx.original_obj, key)? else {
            return Ok(None);
        };
        let wrapped =
            ctx.membrane
                .wrap_descriptor_between(&ctx.origin_graph, &self.graph_name, real_desc)?;
        if !wrapped.configurable() {
            self.pin_on_shadow(shadow, key, wrapped.clone(), trap)?;
        }
        Ok(Some(wrapped))
    }

    /// Installs a non-configurable descriptor on the shadow so the
    /// proxy layer's invariants hold against it.
    pub(crate) fn pin_on_shadow(
        &self,
        shadow: &ObjectRef,
        key: &PropertyKey,
        desc: PropertyDescriptor,
        trap: Trap,
    ) -> Result<()> {
        if !shadow.has_own(key) && !shadow.extensible() {
            return Err(Error::Reflection(reflection::Error::InvariantViolation {
                trap,
                reason: format!("non-extensible shadow cannot accept the new key '{key}'"),
            }));
        }
        shadow.promote_own_property(key.clone(), desc);
        Ok(())
    }

    /// The real prototype wrapped into this graph, mirrored onto the
    /// shadow.
    pub(crate) fn proto_in_this_graph(
        &self,
        ctx: &TrapContext,
        shadow: &ObjectRef,
    ) -> Result<Option<ObjectRef>> {
        let real_proto = reflect::get_prototype_of(&ctx.original_obj)?;
        let wrapped = match real_proto {
            None => None,
            Some(proto) => {
                let crossed = self.wrap_into_this_graph(ctx, Value::Object(proto))?;
                Some(crossed.as_object().cloned().ok_or_else(|| {
                    Error::validation("a prototype wrapped across the membrane must stay an object")
                })?)
            }
        };
        shadow.set_prototype(wrapped.clone());
        Ok(wrapped)
    }

    pub(crate) fn wrap_into_this_graph(&self, ctx: &TrapContext, value: Value) -> Result<Value> {
        let origin = ctx.membrane.handler(&ctx.origin_graph)?;
        ctx.membrane
            .convert(&origin, &self.self_rc(), value, Default::default())
    }

    pub(crate) fn wrap_into_origin(&self, ctx: &TrapContext, value: Value) -> Result<Value> {
        let origin = ctx.membrane.handler(&ctx.origin_graph)?;
        ctx.membrane
            .convert(&self.self_rc(), &origin, value, Default::default())
    }

    pub(crate) fn clear_key_caches(&self, ctx: &TrapContext) {
        let mut cyl = ctx.cylinder.borrow_mut();
        let _ = cyl.clear_cached_own_keys(&self.graph_name);
        let _ = cyl.clear_cached_own_keys(&ctx.origin_graph);
    }

    // --- Construction re-entrancy -------------------------------------

    pub(crate) fn begin_construction(&self, real: ObjectId) {
        self.in_construction.borrow_mut().entry(real).or_default();
    }

    pub(crate) fn under_construction(&self, real: ObjectId) -> bool {
        self.in_construction.borrow().contains_key(&real)
    }

    pub(crate) fn defer_until_constructed(&self, real: ObjectId, finalizer: Finalizer) {
        self.in_construction
            .borrow_mut()
            .entry(real)
            .or_default()
            .push(finalizer);
    }

    pub(crate) fn finish_construction(&self, real: ObjectId) {
        let finalizers = self.in_construction.borrow_mut().remove(&real);
        for finalizer in finalizers.into_iter().flatten() {
            finalizer();
        }
    }

    // --- Notification -------------------------------------------------

    /// Fires this graph's proxy listeners for a first crossing.
    pub(crate) fn notify_proxy_creation(&self, message: &ProxyMessage) -> Result<()> {
        let snapshot = self.proxy_listeners.borrow().clone();
        notify_proxy_listeners(snapshot, message)
    }

    /// Fires function listeners registered membrane-wide, on this
    /// handler, and on the origin handler.
    pub(crate) fn fire_function_event(
        &self,
        ctx: &TrapContext,
        trap: Trap,
        reason: FunctionReason,
        outcome: FunctionOutcome<'_>,
    ) {
        let mut snapshot = ctx.membrane.function_listener_snapshot();
        snapshot.extend(self.function_listeners.borrow().iter().cloned());
        if let Ok(origin) = ctx.membrane.handler(&ctx.origin_graph) {
            if !std::ptr::eq(origin.as_ref(), self) {
                snapshot.extend(origin.function_listeners.borrow().iter().cloned());
            }
        }
        let event = FunctionEvent {
            reason,
            trap,
            this_graph: &self.graph_name,
            origin_graph: &ctx.origin_graph,
            target: &ctx.original,
            outcome,
        };
        notify_function_listeners(&snapshot, &event);
    }
}

impl std::fmt::Debug for GraphHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandler")
            .field("graph", &self.graph_name)
            .field("revoked", &self.revoked.get())
            .finish_non_exhaustive()
    }
}
