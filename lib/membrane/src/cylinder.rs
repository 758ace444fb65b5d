//! The per-value spine of the membrane.
//!
//! A [`ProxyCylinder`] binds one real value to its representation in
//! every graph it has crossed into: the origin graph holds the value
//! itself, every other graph holds a proxy, its revoker and the shadow
//! target behind it. Each graph entry additionally carries the local
//! rule state installed by the rule-modification API: local property
//! descriptors, locally deleted keys, an own-keys filter, the cached key
//! list and argument truncation.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use reflection::{ObjectRef, PropertyDescriptor, PropertyKey, ProxyRevoker, Trap, TrapSet, Value};

use crate::{
    error::{Error, Result},
    graph::GraphName,
};

/// Predicate over exposed property keys.
pub type KeyFilter = Rc<dyn Fn(&PropertyKey) -> bool>;

/// Argument-list truncation for mediated calls.
///
/// `Unlimited` and `DeclaredArity` correspond to the `false` and `true`
/// settings of the configuration surface; the effective limit of a call
/// is the minimum across the origin and calling graphs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArgumentLimit {
    #[default]
    Unlimited,
    DeclaredArity,
    Exact(usize),
}

impl ArgumentLimit {
    /// Resolves the limit against a function's declared arity.
    pub fn resolve(self, arity: usize) -> Option<usize> {
        match self {
            ArgumentLimit::Unlimited => None,
            ArgumentLimit::DeclaredArity => Some(arity),
            ArgumentLimit::Exact(limit) => Some(limit),
        }
    }
}

/// The key list exposed by `ownKeys`, together with the unfiltered real
/// key set it was computed from. The cache is coherent only while the
/// real key set is unchanged.
#[derive(Clone, Debug)]
pub(crate) struct CachedKeys {
    pub(crate) keys: Vec<PropertyKey>,
    pub(crate) original: Vec<PropertyKey>,
}

/// Per-graph rule state. Both origin and foreign entries carry it: key
/// filters and deletions installed on the origin side are honored when
/// computing what any other graph observes.
#[derive(Default)]
pub(crate) struct LocalRules {
    local_descriptors: IndexMap<PropertyKey, PropertyDescriptor>,
    deleted_locals: IndexSet<PropertyKey>,
    own_keys_filter: Option<KeyFilter>,
    cached_own_keys: Option<CachedKeys>,
    truncate_arg_list: ArgumentLimit,
    store_unknown_as_local: bool,
    require_local_delete: bool,
    disabled_traps: TrapSet,
}

pub(crate) enum EntryKind {
    Origin {
        value: Value,
    },
    Foreign {
        proxy: ObjectRef,
        shadow: ObjectRef,
        revoke: ProxyRevoker,
    },
    Dead,
}

pub(crate) struct GraphEntry {
    kind: EntryKind,
    rules: LocalRules,
}

/// Metadata installed into a cylinder for one graph.
pub(crate) enum GraphMetadata {
    Origin {
        value: Value,
    },
    Foreign {
        proxy: ObjectRef,
        shadow: ObjectRef,
        revoke: ProxyRevoker,
    },
}

/// The record binding one real value to its proxies across graphs.
pub struct ProxyCylinder {
    origin_graph: Option<GraphName>,
    entries: IndexMap<GraphName, GraphEntry>,
}

impl Default for ProxyCylinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyCylinder {
    pub fn new() -> Self {
        Self {
            origin_graph: None,
            entries: IndexMap::new(),
        }
    }

    pub fn origin_graph(&self) -> Option<&GraphName> {
        self.origin_graph.as_ref()
    }

    pub fn original_value_set(&self) -> bool {
        self.origin_graph.is_some()
    }

    /// The graphs this cylinder has entries for, in first-crossing order.
    pub fn graphs(&self) -> Vec<GraphName> {
        self.entries.keys().cloned().collect()
    }

    fn entry(&self, graph: &GraphName) -> Result<&GraphEntry> {
        let entry = self
            .entries
            .get(graph)
            .ok_or_else(|| Error::UnknownGraph(graph.clone()))?;
        if matches!(entry.kind, EntryKind::Dead) {
            return Err(Error::DeadGraph(graph.clone()));
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, graph: &GraphName) -> Result<&mut GraphEntry> {
        let entry = self
            .entries
            .get_mut(graph)
            .ok_or_else(|| Error::UnknownGraph(graph.clone()))?;
        if matches!(entry.kind, EntryKind::Dead) {
            return Err(Error::DeadGraph(graph.clone()));
        }
        Ok(entry)
    }

    pub fn has_graph(&self, graph: &GraphName) -> bool {
        self.entries.contains_key(graph)
    }

    pub fn is_dead(&self, graph: &GraphName) -> bool {
        matches!(
            self.entries.get(graph),
            Some(GraphEntry {
                kind: EntryKind::Dead,
                ..
            })
        )
    }

    /// The real value this cylinder mediates.
    pub fn get_original(&self) -> Result<Value> {
        let origin = self.origin_graph.as_ref().ok_or(Error::OriginalNotSet)?;
        match &self.entry(origin)?.kind {
            EntryKind::Origin { value } => Ok(value.clone()),
            _ => Err(Error::OriginalNotSet),
        }
    }

    /// The representation of the value in `graph`: the value itself in
    /// the origin graph, the proxy elsewhere.
    pub fn get_proxy(&self, graph: &GraphName) -> Result<Value> {
        match &self.entry(graph)?.kind {
            EntryKind::Origin { value } => Ok(value.clone()),
            EntryKind::Foreign { proxy, .. } => Ok(Value::Object(proxy.clone())),
            EntryKind::Dead => unreachable!("entry() rejects dead graphs"),
        }
    }

    /// The shadow target in `graph`. The origin graph has none.
    pub fn get_shadow_target(&self, graph: &GraphName) -> Result<ObjectRef> {
        match &self.entry(graph)?.kind {
            EntryKind::Foreign { shadow, .. } => Ok(shadow.clone()),
            EntryKind::Origin { .. } => Err(Error::validation(format!(
                "the origin graph {graph} has no shadow target"
            ))),
            EntryKind::Dead => unreachable!("entry() rejects dead graphs"),
        }
    }

    /// True if `candidate` is the shadow target of any live entry.
    pub fn is_shadow_target(&self, candidate: &ObjectRef) -> bool {
        self.entries.values().any(|entry| match &entry.kind {
            EntryKind::Foreign { shadow, .. } => shadow.ptr_eq(candidate),
            _ => false,
        })
    }

    pub(crate) fn foreign_parts(
        &self,
        graph: &GraphName,
    ) -> Option<(ObjectRef, ObjectRef, ProxyRevoker)> {
        match &self.entries.get(graph)?.kind {
            EntryKind::Foreign {
                proxy,
                shadow,
                revoke,
            } => Some((proxy.clone(), shadow.clone(), revoke.clone())),
            _ => None,
        }
    }

    /// Object ids registered in the membrane map for this entry.
    pub(crate) fn entry_ids(&self, graph: &GraphName) -> Vec<reflection::ObjectId> {
        match self.entries.get(graph).map(|entry| &entry.kind) {
            Some(EntryKind::Origin { value }) => {
                value.as_object().map(|object| object.id()).into_iter().collect()
            }
            Some(EntryKind::Foreign { proxy, shadow, .. }) => {
                vec![proxy.id(), shadow.id()]
            }
            _ => Vec::new(),
        }
    }

    /// Installs or overrides the entry for `graph`.
    ///
    /// Structural invariants: the first origin entry fixes the origin
    /// graph; a second origin graph, or overriding a live entry without
    /// `override_existing`, is rejected.
    pub(crate) fn set_metadata(
        &mut self,
        graph: &GraphName,
        metadata: GraphMetadata,
        override_existing: bool,
    ) -> Result<()> {
        if let Some(existing) = self.entries.get(graph) {
            match existing.kind {
                EntryKind::Dead => return Err(Error::DeadGraph(graph.clone())),
                _ if !override_existing => {
                    return Err(Error::DuplicateGraph(graph.clone()));
                }
                _ => {}
            }
        }
        let kind = match metadata {
            GraphMetadata::Origin { value } => {
                match &self.origin_graph {
                    Some(origin) if origin != graph => {
                        return Err(Error::validation(format!(
                            "cylinder already originates in graph {origin}; cannot originate in \
                             {graph} as well"
                        )));
                    }
                    _ => {}
                }
                self.origin_graph = Some(graph.clone());
                EntryKind::Origin { value }
            }
            GraphMetadata::Foreign {
                proxy,
                shadow,
                revoke,
            } => {
                if Some(graph) == self.origin_graph.as_ref() {
                    return Err(Error::validation(format!(
                        "graph {graph} is the origin graph; it cannot hold a proxy entry"
                    )));
                }
                EntryKind::Foreign {
                    proxy,
                    shadow,
                    revoke,
                }
            }
        };
        match self.entries.get_mut(graph) {
            Some(entry) => entry.kind = kind,
            None => {
                self.entries.insert(
                    graph.clone(),
                    GraphEntry {
                        kind,
                        rules: LocalRules::default(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Marks the entry for `graph` dead. Removing the origin graph
    /// requires every other graph to be dead already.
    pub fn remove_graph(&mut self, graph: &GraphName) -> Result<()> {
        if !self.entries.contains_key(graph) {
            return Err(Error::UnknownGraph(graph.clone()));
        }
        if Some(graph) == self.origin_graph.as_ref() {
            let survivor = self.entries.iter().find(|(name, entry)| {
                *name != graph && !matches!(entry.kind, EntryKind::Dead)
            });
            if let Some((name, _)) = survivor {
                return Err(Error::validation(format!(
                    "cannot remove origin graph {graph} while graph {name} is alive"
                )));
            }
        }
        let entry = self
            .entries
            .get_mut(graph)
            .expect("presence checked above");
        entry.kind = EntryKind::Dead;
        entry.rules = LocalRules::default();
        Ok(())
    }

    /// Revokers of every live foreign entry, in insertion order.
    pub(crate) fn foreign_revokers(&self) -> Vec<ProxyRevoker> {
        self.entries
            .values()
            .filter_map(|entry| match &entry.kind {
                EntryKind::Foreign { revoke, .. } => Some(revoke.clone()),
                _ => None,
            })
            .collect()
    }

    // --- Local property machinery -------------------------------------

    pub fn get_local_descriptor(
        &self,
        graph: &GraphName,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>> {
        Ok(self.entry(graph)?.rules.local_descriptors.get(key).cloned())
    }

    /// Installs a local descriptor. Defining a local property unmasks
    /// any local deletion of the same key.
    pub fn set_local_descriptor(
        &mut self,
        graph: &GraphName,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<()> {
        let rules = &mut self.entry_mut(graph)?.rules;
        rules.deleted_locals.shift_remove(&key);
        rules.local_descriptors.insert(key, desc);
        rules.cached_own_keys = None;
        Ok(())
    }

    pub fn delete_local_descriptor(
        &mut self,
        graph: &GraphName,
        key: &PropertyKey,
        record_local_delete: bool,
    ) -> Result<()> {
        let rules = &mut self.entry_mut(graph)?.rules;
        rules.local_descriptors.shift_remove(key);
        if record_local_delete {
            rules.deleted_locals.insert(key.clone());
        }
        rules.cached_own_keys = None;
        Ok(())
    }

    pub fn append_deleted_names(
        &self,
        graph: &GraphName,
        into: &mut IndexSet<PropertyKey>,
    ) -> Result<()> {
        for key in &self.entry(graph)?.rules.deleted_locals {
            into.insert(key.clone());
        }
        Ok(())
    }

    pub fn was_deleted_locally(&self, graph: &GraphName, key: &PropertyKey) -> Result<bool> {
        Ok(self.entry(graph)?.rules.deleted_locals.contains(key))
    }

    pub fn unmask_deletion(&mut self, graph: &GraphName, key: &PropertyKey) -> Result<()> {
        let rules = &mut self.entry_mut(graph)?.rules;
        if rules.deleted_locals.shift_remove(key) {
            rules.cached_own_keys = None;
        }
        Ok(())
    }

    pub fn local_own_keys(&self, graph: &GraphName) -> Result<Vec<PropertyKey>> {
        Ok(self
            .entry(graph)?
            .rules
            .local_descriptors
            .keys()
            .cloned()
            .collect())
    }

    // --- Flags ---------------------------------------------------------

    pub fn store_unknown_as_local(&self, graph: &GraphName) -> Result<bool> {
        Ok(self.entry(graph)?.rules.store_unknown_as_local)
    }

    pub fn set_store_unknown_as_local(&mut self, graph: &GraphName, flag: bool) -> Result<()> {
        self.entry_mut(graph)?.rules.store_unknown_as_local = flag;
        Ok(())
    }

    pub fn requires_local_delete(&self, graph: &GraphName) -> Result<bool> {
        Ok(self.entry(graph)?.rules.require_local_delete)
    }

    pub fn set_require_local_delete(&mut self, graph: &GraphName, flag: bool) -> Result<()> {
        self.entry_mut(graph)?.rules.require_local_delete = flag;
        Ok(())
    }

    pub fn trap_disabled(&self, graph: &GraphName, trap: Trap) -> Result<bool> {
        Ok(self.entry(graph)?.rules.disabled_traps.contains(trap))
    }

    pub fn disable_traps(&mut self, graph: &GraphName, traps: &[Trap]) -> Result<()> {
        let rules = &mut self.entry_mut(graph)?.rules;
        for trap in traps {
            rules.disabled_traps.insert(*trap);
        }
        Ok(())
    }

    // --- Own-keys filter and cache ------------------------------------

    pub fn get_own_keys_filter(&self, graph: &GraphName) -> Result<Option<KeyFilter>> {
        Ok(self.entry(graph)?.rules.own_keys_filter.clone())
    }

    pub fn set_own_keys_filter(
        &mut self,
        graph: &GraphName,
        filter: Option<KeyFilter>,
    ) -> Result<()> {
        let rules = &mut self.entry_mut(graph)?.rules;
        rules.own_keys_filter = filter;
        rules.cached_own_keys = None;
        Ok(())
    }

    pub(crate) fn cached_own_keys(&self, graph: &GraphName) -> Result<Option<CachedKeys>> {
        Ok(self.entry(graph)?.rules.cached_own_keys.clone())
    }

    pub(crate) fn set_cached_own_keys(
        &mut self,
        graph: &GraphName,
        keys: Vec<PropertyKey>,
        original: Vec<PropertyKey>,
    ) -> Result<()> {
        self.entry_mut(graph)?.rules.cached_own_keys = Some(CachedKeys { keys, original });
        Ok(())
    }

    pub(crate) fn clear_cached_own_keys(&mut self, graph: &GraphName) -> Result<()> {
        self.entry_mut(graph)?.rules.cached_own_keys = None;
        Ok(())
    }

    // --- Argument truncation ------------------------------------------

    pub fn get_truncate_arg_list(&self, graph: &GraphName) -> Result<ArgumentLimit> {
        Ok(self.entry(graph)?.rules.truncate_arg_list)
    }

    pub fn set_truncate_arg_list(
        &mut self,
        graph: &GraphName,
        limit: ArgumentLimit,
    ) -> Result<()> {
        self.entry_mut(graph)?.rules.truncate_arg_list = limit;
        Ok(())
    }
}

impl std::fmt::Debug for ProxyCylinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries = f.debug_map();
        for (graph, entry) in &self.entries {
            let kind = match &entry.kind {
                EntryKind::Origin { .. } => "origin",
                EntryKind::Foreign { .. } => "foreign",
                EntryKind::Dead => "dead",
            };
            entries.entry(&graph.to_string(), &kind);
        }
        entries.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflection::{Forwarding, Object};

    fn wet() -> GraphName {
        GraphName::from("wet")
    }

    fn dry() -> GraphName {
        GraphName::from("dry")
    }

    fn foreign_metadata() -> (GraphMetadata, ObjectRef) {
        let shadow = Object::new_plain(None);
        let (proxy, revoke) = Object::new_proxy(&shadow, Rc::new(Forwarding));
        (
            GraphMetadata::Foreign {
                proxy: proxy.clone(),
                shadow,
                revoke,
            },
            proxy,
        )
    }

    fn cylinder_with_origin() -> (ProxyCylinder, ObjectRef) {
        let value = Object::new_plain(None);
        let mut cylinder = ProxyCylinder::new();
        cylinder
            .set_metadata(
                &wet(),
                GraphMetadata::Origin {
                    value: Value::Object(value.clone()),
                },
                false,
            )
            .unwrap();
        (cylinder, value)
    }

    #[test]
    fn origin_entry_fixes_the_origin_graph() {
        let (cylinder, value) = cylinder_with_origin();
        assert_eq!(cylinder.origin_graph(), Some(&wet()));
        assert_eq!(
            cylinder.get_original().unwrap(),
            Value::Object(value.clone())
        );
        assert_eq!(cylinder.get_proxy(&wet()).unwrap(), Value::Object(value));
    }

    #[test]
    fn second_origin_graph_is_rejected() {
        let (mut cylinder, _) = cylinder_with_origin();
        let err = cylinder
            .set_metadata(
                &dry(),
                GraphMetadata::Origin {
                    value: Value::Object(Object::new_plain(None)),
                },
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn duplicate_entry_requires_override() {
        let (mut cylinder, _) = cylinder_with_origin();
        let (meta, _) = foreign_metadata();
        cylinder.set_metadata(&dry(), meta, false).unwrap();
        let (meta, _) = foreign_metadata();
        assert!(matches!(
            cylinder.set_metadata(&dry(), meta, false),
            Err(Error::DuplicateGraph(_))
        ));
        let (meta, proxy) = foreign_metadata();
        cylinder.set_metadata(&dry(), meta, true).unwrap();
        assert_eq!(cylinder.get_proxy(&dry()).unwrap(), Value::Object(proxy));
    }

    #[test]
    fn shadow_lookup_fails_on_the_origin_graph() {
        let (mut cylinder, _) = cylinder_with_origin();
        let (meta, _) = foreign_metadata();
        cylinder.set_metadata(&dry(), meta, false).unwrap();
        assert!(cylinder.get_shadow_target(&dry()).is_ok());
        assert!(cylinder.get_shadow_target(&wet()).is_err());
        let shadow = cylinder.get_shadow_target(&dry()).unwrap();
        assert!(cylinder.is_shadow_target(&shadow));
    }

    #[test]
    fn dead_graphs_reject_every_operation() {
        let (mut cylinder, _) = cylinder_with_origin();
        let (meta, _) = foreign_metadata();
        cylinder.set_metadata(&dry(), meta, false).unwrap();
        cylinder.remove_graph(&dry()).unwrap();
        assert!(matches!(
            cylinder.get_proxy(&dry()),
            Err(Error::DeadGraph(_))
        ));
        assert!(matches!(
            cylinder.set_local_descriptor(
                &dry(),
                "x".into(),
                PropertyDescriptor::data(Value::Undefined)
            ),
            Err(Error::DeadGraph(_))
        ));
        assert!(matches!(
            cylinder.get_proxy(&GraphName::from("unknown")),
            Err(Error::UnknownGraph(_))
        ));
    }

    #[test]
    fn origin_graph_removal_requires_dead_foreigners() {
        let (mut cylinder, _) = cylinder_with_origin();
        let (meta, _) = foreign_metadata();
        cylinder.set_metadata(&dry(), meta, false).unwrap();
        assert!(cylinder.remove_graph(&wet()).is_err());
        cylinder.remove_graph(&dry()).unwrap();
        cylinder.remove_graph(&wet()).unwrap();
        assert!(matches!(
            cylinder.get_original(),
            Err(Error::DeadGraph(_))
        ));
    }

    #[test]
    fn local_descriptor_unmasks_deletion() {
        let (mut cylinder, _) = cylinder_with_origin();
        let key = PropertyKey::from("x");
        cylinder
            .delete_local_descriptor(&wet(), &key, true)
            .unwrap();
        assert!(cylinder.was_deleted_locally(&wet(), &key).unwrap());
        cylinder
            .set_local_descriptor(&wet(), key.clone(), PropertyDescriptor::data(Value::Null))
            .unwrap();
        assert!(!cylinder.was_deleted_locally(&wet(), &key).unwrap());
        assert!(cylinder.get_local_descriptor(&wet(), &key).unwrap().is_some());
        assert_eq!(cylinder.local_own_keys(&wet()).unwrap(), vec![key]);
    }

    #[test]
    fn rule_mutations_invalidate_the_key_cache() {
        let (mut cylinder, _) = cylinder_with_origin();
        cylinder
            .set_cached_own_keys(&wet(), vec!["x".into()], vec!["x".into()])
            .unwrap();
        assert!(cylinder.cached_own_keys(&wet()).unwrap().is_some());
        cylinder
            .set_local_descriptor(&wet(), "y".into(), PropertyDescriptor::data(Value::Null))
            .unwrap();
        assert!(cylinder.cached_own_keys(&wet()).unwrap().is_none());
    }

    #[test]
    fn argument_limits_resolve_against_arity() {
        assert_eq!(ArgumentLimit::Unlimited.resolve(3), None);
        assert_eq!(ArgumentLimit::DeclaredArity.resolve(3), Some(3));
        assert_eq!(ArgumentLimit::Exact(1).resolve(3), Some(1));
    }
}
