//! Listener surfaces: proxy-creation notifications and traced function
//! calls.

use core::fmt;
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};

use reflection::{ProxyTraps, Trap, Value};

use crate::{
    error::{Error, Result},
    graph::GraphName,
    membrane::MembraneInner,
    value_map::CylinderRef,
};

/// Callback fired when a value first crosses into a graph.
///
/// Errors returned by a listener are logged and swallowed; to abort the
/// crossing, use [`ProxyMessage::throw_exception`].
pub type ProxyListener = Rc<dyn Fn(&ProxyMessage) -> Result<()>>;

/// Callback fired around mediated `apply`/`construct` operations.
///
/// Errors returned by a listener are logged and swallowed; they never
/// interrupt the traced call.
pub type FunctionListener = Rc<dyn Fn(&FunctionEvent<'_>) -> Result<()>>;

/// Why a function listener fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionReason {
    Enter,
    Return,
    Throw,
}

/// Result slot of a traced call.
#[derive(Debug)]
pub enum FunctionOutcome<'a> {
    /// The call has not happened yet (reason `Enter`).
    Pending,
    /// The call returned, carrying the value wrapped into the calling
    /// graph.
    Returned(&'a Value),
    /// The call failed; the error propagates after listeners ran.
    Threw(&'a reflection::Error),
}

/// One traced `apply`/`construct` event.
#[derive(Debug)]
pub struct FunctionEvent<'a> {
    pub reason: FunctionReason,
    pub trap: Trap,
    pub this_graph: &'a GraphName,
    pub origin_graph: &'a GraphName,
    /// The real function being mediated.
    pub target: &'a Value,
    pub outcome: FunctionOutcome<'a>,
}

/// Shadow-target preparation mode, as accepted by
/// [`ProxyMessage::use_shadow_target`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowTargetMode {
    /// Lazy getters for every exposed key; the shadow ends up frozen.
    Frozen,
    /// Lazy getters for every exposed key; the shadow ends up sealed.
    Sealed,
    /// Lazy getters only; the shadow stays extensible.
    Prepared,
}

impl std::str::FromStr for ShadowTargetMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "frozen" => Ok(ShadowTargetMode::Frozen),
            "sealed" => Ok(ShadowTargetMode::Sealed),
            "prepared" => Ok(ShadowTargetMode::Prepared),
            other => Err(Error::validation(format!(
                "unknown shadow target mode: {other}"
            ))),
        }
    }
}

/// The metadata object handed to proxy listeners on first crossing.
///
/// The message is sealed: listeners interact with it only through its
/// methods. On the foreign side the proxy and handler slots are
/// writable: a listener may swap the handler and
/// [`rebuild_proxy`](Self::rebuild_proxy), or replace the proxy with a
/// shadow-backed one via [`use_shadow_target`](Self::use_shadow_target).
pub struct ProxyMessage {
    membrane: Weak<MembraneInner>,
    cylinder: CylinderRef,
    graph: GraphName,
    target: Value,
    proxy: RefCell<Value>,
    handler: RefCell<Rc<dyn ProxyTraps>>,
    is_origin_graph: bool,
    stopped: Cell<bool>,
    exception: RefCell<Option<Error>>,
}

impl ProxyMessage {
    pub(crate) fn new(
        membrane: Weak<MembraneInner>,
        cylinder: CylinderRef,
        graph: GraphName,
        target: Value,
        proxy: Value,
        handler: Rc<dyn ProxyTraps>,
        is_origin_graph: bool,
    ) -> Self {
        Self {
            membrane,
            cylinder,
            graph,
            target,
            proxy: RefCell::new(proxy),
            handler: RefCell::new(handler),
            is_origin_graph,
            stopped: Cell::new(false),
            exception: RefCell::new(None),
        }
    }

    /// The real value crossing the boundary.
    pub fn target(&self) -> Value {
        self.target.clone()
    }

    /// The current representation in the notified graph: the proxy on
    /// the foreign side, the value itself on the origin side.
    pub fn proxy(&self) -> Value {
        self.proxy.borrow().clone()
    }

    /// The graph being notified.
    pub fn graph_name(&self) -> &GraphName {
        &self.graph
    }

    pub fn is_origin_graph(&self) -> bool {
        self.is_origin_graph
    }

    /// The handler the proxy dispatches to. Writable until the listener
    /// round ends; takes effect through [`rebuild_proxy`](Self::rebuild_proxy).
    pub fn handler(&self) -> Rc<dyn ProxyTraps> {
        Rc::clone(&self.handler.borrow())
    }

    pub fn set_handler(&self, handler: Rc<dyn ProxyTraps>) -> Result<()> {
        self.require_foreign("set_handler")?;
        *self.handler.borrow_mut() = handler;
        Ok(())
    }

    /// Discards the current proxy and builds a fresh one over the same
    /// shadow target with the current handler.
    pub fn rebuild_proxy(&self) -> Result<Value> {
        self.require_foreign("rebuild_proxy")?;
        let membrane = self.membrane()?;
        let proxy = membrane.replace_foreign_proxy(
            &self.cylinder,
            &self.graph,
            Rc::clone(&self.handler.borrow()),
        )?;
        *self.proxy.borrow_mut() = proxy.clone();
        Ok(proxy)
    }

    /// Populates the shadow target with one-shot lazy getters and
    /// substitutes it as the effective proxy target behind a plain
    /// forwarding handler.
    pub fn use_shadow_target(&self, mode: ShadowTargetMode) -> Result<Value> {
        self.require_foreign("use_shadow_target")?;
        let membrane = self.membrane()?;
        let handler = membrane.handler(&self.graph)?;
        handler.prepare_shadow(&self.cylinder, mode)?;
        *self.handler.borrow_mut() = Rc::new(reflection::Forwarding);
        self.rebuild_proxy()
    }

    /// Stops notifying further listeners in this round.
    pub fn stop_iteration(&self) {
        self.stopped.set(true);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Records an exception to propagate once the current listener
    /// returns. Implies [`stop_iteration`](Self::stop_iteration).
    pub fn throw_exception(&self, error: Error) {
        self.stopped.set(true);
        *self.exception.borrow_mut() = Some(error);
    }

    pub(crate) fn take_exception(&self) -> Option<Error> {
        self.exception.borrow_mut().take()
    }

    fn membrane(&self) -> Result<Rc<MembraneInner>> {
        self.membrane
            .upgrade()
            .ok_or_else(|| Error::validation("the membrane was dropped"))
    }

    fn require_foreign(&self, operation: &str) -> Result<()> {
        if self.is_origin_graph {
            Err(Error::validation(format!(
                "{operation} is only available on foreign-graph messages"
            )))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ProxyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyMessage")
            .field("graph", &self.graph)
            .field("is_origin_graph", &self.is_origin_graph)
            .field("stopped", &self.stopped.get())
            .finish_non_exhaustive()
    }
}

/// Runs one listener round over a snapshot of `listeners`.
///
/// Listener errors are logged and swallowed. An exception recorded via
/// [`ProxyMessage::throw_exception`] propagates after the listener that
/// recorded it returns.
pub(crate) fn notify_proxy_listeners(
    listeners: Vec<ProxyListener>,
    message: &ProxyMessage,
) -> Result<()> {
    for listener in listeners {
        if message.stopped() {
            break;
        }
        if let Err(error) = listener(message) {
            tracing::warn!(graph = %message.graph_name(), %error, "proxy listener failed");
        }
        if let Some(error) = message.take_exception() {
            return Err(error);
        }
    }
    Ok(())
}

/// Fires a function event at a snapshot of `listeners`, swallowing and
/// logging listener errors.
pub(crate) fn notify_function_listeners(
    listeners: &[FunctionListener],
    event: &FunctionEvent<'_>,
) {
    for listener in listeners {
        if let Err(error) = listener(event) {
            tracing::warn!(
                trap = %event.trap,
                reason = ?event.reason,
                %error,
                "function listener failed"
            );
        }
    }
}
