//! # A mediating boundary between object graphs
//!
//! A [`Membrane`] separates named *object graphs* and lets values from
//! one graph appear in another only through interposed proxies. Every
//! property access, call, prototype walk and lifetime operation
//! observed on a proxy is re-entered on the real side, and every
//! reference crossing back is wrapped again, so an untrusted graph can
//! hold what look like arbitrary objects without ever obtaining a
//! direct reference.
//!
//! ## Crossing values
//!
//! Register graphs with [`Membrane::get_handler_by_name`], then expose
//! a value with [`Membrane::convert_argument_to_proxy`]. Wrapping is
//! identity-preserving: converting the same value twice returns the
//! same proxy, and converting a proxy back into its origin graph
//! returns the original value. Primitives always pass through.
//!
//! ## Distorting what the far side sees
//!
//! Per-proxy rules are installed through [`ModifyRules`] (local
//! properties, local deletes, own-key filters, argument truncation,
//! disabled traps) or declaratively through a [`DistortionsListener`]
//! consulted when a value first crosses.
//!
//! ## Tearing it down
//!
//! [`GraphHandler::revoke_everything`] terminates every proxy of one
//! graph; [`Membrane::revoke_mapping`] kills a single value's binding.
//! Real values keep their identity across revocation, only the proxies
//! die.

pub mod cylinder;
pub mod distortions;
pub mod graph;
pub mod handler;
pub mod listeners;
pub mod pipeline;
pub mod rules;

mod error;
mod membrane;
mod shadow;
mod value_map;

pub use self::{
    cylinder::{ArgumentLimit, KeyFilter, ProxyCylinder},
    distortions::{
        sample_config, DistortionCategory, DistortionsConfig, DistortionsListener, FilterSetting,
        ShadowSetting, TruncateSetting, ValuePredicate,
    },
    error::{as_membrane_error, Error, Result},
    graph::GraphName,
    handler::GraphHandler,
    listeners::{
        FunctionEvent, FunctionListener, FunctionOutcome, FunctionReason, ProxyListener,
        ProxyMessage, ShadowTargetMode,
    },
    membrane::{
        graph_name_key, ConvertOptions, Membrane, MembraneConfig, PassThroughFilter,
        GRAPH_NAME_SENTINEL,
    },
    rules::{ChainHandler, ChainSource, ModifyRules, OwnKeysFilter, TrapOverrides},
};
