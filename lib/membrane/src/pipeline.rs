//! The per-graph mediation pipeline.
//!
//! In pipeline mode, a graph's proxies dispatch to a singly-linked list
//! of stages terminating at the [`GraphHandler`]: tracing, argument
//! validation, forwarding, shadow normalization, application-inserted
//! nodes, shadow update and return validation. Stages forward every
//! trap they do not interpose on.

use std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
};

use reflection::{
    ObjectId, ObjectRef, PropertyDescriptor, PropertyKey, ProxyTraps, Trap, Value,
};

use crate::{error::Error, handler::GraphHandler, rules::ChainHandler};

/// Stage names recognized by [`GraphHandler::insert_handler`] as
/// insertion leads.
pub mod stage {
    pub const TRACING: &str = "tracing";
    pub const INVARIANT_IN: &str = "invariant-in";
    pub const FORWARDING: &str = "forwarding";
    pub const CONVERT_FROM_SHADOW: &str = "convert-from-shadow";
    pub const UPDATE_SHADOW: &str = "update-shadow";
    pub const INVARIANT_OUT: &str = "invariant-out";
}

enum NextLink {
    Node(Rc<PipelineNode>),
    Terminal(Rc<GraphHandler>),
}

enum NodeBehavior {
    Tracing,
    InvariantIn,
    Forwarding,
    ConvertFromShadow,
    UpdateShadow,
    InvariantOut,
    Custom(Rc<ChainHandler>),
}

/// One stage of a graph's mediation pipeline.
pub struct PipelineNode {
    name: Rc<str>,
    behavior: NodeBehavior,
    only_target: Option<ObjectId>,
    next: RefCell<NextLink>,
}

impl PipelineNode {
    fn new(name: &str, behavior: NodeBehavior, next: NextLink) -> Rc<Self> {
        Rc::new(Self {
            name: Rc::from(name),
            behavior,
            only_target: None,
            next: RefCell::new(next),
        })
    }

    /// Builds the standard stage list over `terminal`.
    pub(crate) fn standard_chain(terminal: &Rc<GraphHandler>) -> Rc<Self> {
        let invariant_out = Self::new(
            stage::INVARIANT_OUT,
            NodeBehavior::InvariantOut,
            NextLink::Terminal(Rc::clone(terminal)),
        );
        let update_shadow = Self::new(
            stage::UPDATE_SHADOW,
            NodeBehavior::UpdateShadow,
            NextLink::Node(invariant_out),
        );
        let convert = Self::new(
            stage::CONVERT_FROM_SHADOW,
            NodeBehavior::ConvertFromShadow,
            NextLink::Node(update_shadow),
        );
        let forwarding = Self::new(
            stage::FORWARDING,
            NodeBehavior::Forwarding,
            NextLink::Node(convert),
        );
        let invariant_in = Self::new(
            stage::INVARIANT_IN,
            NodeBehavior::InvariantIn,
            NextLink::Node(forwarding),
        );
        Self::new(
            stage::TRACING,
            NodeBehavior::Tracing,
            NextLink::Node(invariant_in),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_traps(&self) -> Rc<dyn ProxyTraps> {
        match &*self.next.borrow() {
            NextLink::Node(node) => Rc::clone(node) as Rc<dyn ProxyTraps>,
            NextLink::Terminal(handler) => Rc::clone(handler) as Rc<dyn ProxyTraps>,
        }
    }

    fn next_node(&self) -> Option<Rc<PipelineNode>> {
        match &*self.next.borrow() {
            NextLink::Node(node) => Some(Rc::clone(node)),
            NextLink::Terminal(_) => None,
        }
    }

    pub(crate) fn terminal(&self) -> Rc<GraphHandler> {
        match &*self.next.borrow() {
            NextLink::Node(node) => node.terminal(),
            NextLink::Terminal(handler) => Rc::clone(handler),
        }
    }

    /// Splices `node` in after the stage named `lead_name`. With
    /// `only_target`, the inserted stage applies to a single shadow.
    pub(crate) fn insert_after(
        self: &Rc<Self>,
        lead_name: &str,
        name: &str,
        chain: Rc<ChainHandler>,
        only_target: Option<ObjectId>,
    ) -> Result<(), Error> {
        let mut cursor = Rc::clone(self);
        loop {
            if &*cursor.name == lead_name {
                let current_next = match &*cursor.next.borrow() {
                    NextLink::Node(node) => NextLink::Node(Rc::clone(node)),
                    NextLink::Terminal(handler) => NextLink::Terminal(Rc::clone(handler)),
                };
                let inserted = Rc::new(Self {
                    name: Rc::from(name),
                    behavior: NodeBehavior::Custom(chain),
                    only_target,
                    next: RefCell::new(current_next),
                });
                *cursor.next.borrow_mut() = NextLink::Node(inserted);
                return Ok(());
            }
            match cursor.next_node() {
                Some(next) => cursor = next,
                None => {
                    return Err(Error::validation(format!(
                        "no pipeline stage named '{lead_name}' to insert after"
                    )));
                }
            }
        }
    }

    /// Validates that the target is a live value the membrane knows.
    fn check_target(&self, target: &ObjectRef) -> reflection::Result<()> {
        let handler = self.terminal();
        let membrane = handler.membrane().map_err(reflection::Error::from)?;
        if membrane.map().is_dead(target.id()) {
            return Err(Error::Revoked.into());
        }
        if !membrane.map().contains(target.id()) {
            return Err(Error::GraphOwnership(format!(
                "{target:?} is not mediated by graph {}",
                handler.graph_name()
            ))
            .into());
        }
        Ok(())
    }

    /// Maps a real value or proxy the caller passed directly back to the
    /// graph's shadow target, so downstream stages always see shadows.
    fn normalize_target(&self, target: &ObjectRef) -> reflection::Result<ObjectRef> {
        let handler = self.terminal();
        let membrane = handler.membrane().map_err(reflection::Error::from)?;
        let Some(cylinder) = membrane.map().get(target.id()) else {
            return Ok(target.clone());
        };
        let cyl = cylinder.borrow();
        if cyl.is_shadow_target(target) {
            return Ok(target.clone());
        }
        match cyl.get_shadow_target(handler.graph_name()) {
            Ok(shadow) => Ok(shadow),
            Err(_) => Ok(target.clone()),
        }
    }

    fn around<R>(
        &self,
        trap: Trap,
        target: &ObjectRef,
        run: impl FnOnce(Rc<dyn ProxyTraps>, &ObjectRef) -> reflection::Result<R>,
    ) -> reflection::Result<R> {
        if let Some(only) = self.only_target {
            if target.id() != only {
                return run(self.next_traps(), target);
            }
        }
        match &self.behavior {
            NodeBehavior::Tracing => {
                let graph = self.terminal().graph_name().clone();
                tracing::trace!(%trap, %graph, target = ?target, "trap enter");
                let result = run(self.next_traps(), target);
                tracing::trace!(%trap, %graph, ok = result.is_ok(), "trap exit");
                result
            }
            NodeBehavior::InvariantIn => {
                self.check_target(target)?;
                run(self.next_traps(), target)
            }
            NodeBehavior::ConvertFromShadow => {
                let normalized = self.normalize_target(target)?;
                run(self.next_traps(), &normalized)
            }
            NodeBehavior::Forwarding
            | NodeBehavior::UpdateShadow
            | NodeBehavior::InvariantOut => run(self.next_traps(), target),
            NodeBehavior::Custom(chain) => {
                // Rebase on every dispatch: stages inserted later must
                // stay reachable from the custom node's fallthrough.
                chain.rebase(self.next_traps());
                run(Rc::clone(chain) as Rc<dyn ProxyTraps>, target)
            }
        }
    }
}

macro_rules! pipeline_forward {
    ($name:ident, $trap:expr, ( $($arg:ident : $ty:ty),* ) -> $ret:ty) => {
        fn $name(&self, target: &ObjectRef $(, $arg: $ty)*) -> reflection::Result<$ret> {
            self.around($trap, target, |next, target| next.$name(target $(, $arg)*))
        }
    };
}

impl ProxyTraps for PipelineNode {
    pipeline_forward!(get, Trap::Get, (key: &PropertyKey, receiver: &Value) -> Value);
    pipeline_forward!(set, Trap::Set, (key: &PropertyKey, value: Value, receiver: &Value) -> bool);
    pipeline_forward!(has, Trap::Has, (key: &PropertyKey) -> bool);
    pipeline_forward!(delete_property, Trap::DeleteProperty, (key: &PropertyKey) -> bool);
    pipeline_forward!(
        get_own_property_descriptor,
        Trap::GetOwnPropertyDescriptor,
        (key: &PropertyKey) -> Option<PropertyDescriptor>
    );
    pipeline_forward!(get_prototype_of, Trap::GetPrototypeOf, () -> Option<ObjectRef>);
    pipeline_forward!(set_prototype_of, Trap::SetPrototypeOf, (prototype: Option<ObjectRef>) -> bool);
    pipeline_forward!(is_extensible, Trap::IsExtensible, () -> bool);
    pipeline_forward!(apply, Trap::Apply, (this: Value, args: &[Value]) -> Value);
    pipeline_forward!(construct, Trap::Construct, (args: &[Value], new_target: &ObjectRef) -> Value);

    fn own_keys(&self, target: &ObjectRef) -> reflection::Result<Vec<PropertyKey>> {
        let keys = self.around(Trap::OwnKeys, target, |next, target| next.own_keys(target))?;
        if matches!(self.behavior, NodeBehavior::InvariantOut) {
            let mut seen = HashSet::with_capacity(keys.len());
            for key in &keys {
                if !seen.insert(key.clone()) {
                    return Err(reflection::Error::InvariantViolation {
                        trap: Trap::OwnKeys,
                        reason: format!("duplicate key '{key}' in the exposed key list"),
                    });
                }
            }
        }
        Ok(keys)
    }

    fn define_property(
        &self,
        target: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> reflection::Result<bool> {
        let defined = self.around(Trap::DefineProperty, target, |next, target| {
            next.define_property(target, key.clone(), desc.clone())
        })?;
        if defined
            && matches!(self.behavior, NodeBehavior::UpdateShadow)
            && !desc.configurable()
            && target.own_property(&key).is_none()
        {
            // The terminal handler pins non-configurable results; if an
            // inserted node swallowed that, re-assert it here.
            self.terminal()
                .pin_on_shadow(target, &key, desc, Trap::DefineProperty)
                .map_err(reflection::Error::from)?;
        }
        Ok(defined)
    }

    fn prevent_extensions(&self, target: &ObjectRef) -> reflection::Result<bool> {
        let locked = self.around(Trap::PreventExtensions, target, |next, target| {
            next.prevent_extensions(target)
        })?;
        if locked && matches!(self.behavior, NodeBehavior::UpdateShadow) && target.extensible() {
            reflection::reflect::prevent_extensions(target)?;
        }
        Ok(locked)
    }
}

impl std::fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = vec![self.name.to_string()];
        let mut cursor = self.next_node();
        while let Some(node) = cursor {
            names.push(node.name.to_string());
            cursor = node.next_node();
        }
        f.debug_struct("Pipeline").field("stages", &names).finish()
    }
}
