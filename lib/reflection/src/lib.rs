//! # A small meta-object runtime
//!
//! This crate defines the object model a mediation boundary operates on:
//! [`Value`]s, heap [`object`]s with prototype chains and extensibility,
//! tagged property [`descriptor`]s, and proxies whose behavior is
//! supplied by a [`ProxyTraps`] handler.
//!
//! ## Operations
//!
//! All reads and writes go through the functions in [`reflect`]. They
//! run the ordinary algorithms for plain objects and dispatch to the
//! handler for proxies, then validate the handler's answer against the
//! proxy's apparent target so a handler cannot contradict state the
//! target has committed to.
//!
//! ## Proxies and revocation
//!
//! A proxy is created over an apparent target with
//! [`Object::new_proxy`], which also returns a [`ProxyRevoker`]. Once
//! revoked, every trap on the proxy fails with [`Error::Revoked`].

pub mod descriptor;
pub mod intrinsics;
pub mod key;
pub mod object;
pub mod reflect;
pub mod traps;
pub mod value;

mod error;

pub use self::{
    descriptor::PropertyDescriptor,
    error::{Error, Result},
    intrinsics::Intrinsics,
    key::{PropertyKey, Symbol},
    object::{FunctionSlot, Object, ObjectId, ObjectKind, ObjectRef, ProxyRevoker, WeakObjectRef},
    traps::{Forwarding, ProxyTraps, Trap, TrapSet},
    value::{Value, ValueClass},
};
