//! Computation of the key list a proxy exposes.

use std::collections::HashSet;

use indexmap::IndexSet;
use reflection::{reflect, ObjectRef, PropertyKey};

use crate::{
    error::Result,
    handler::{GraphHandler, TrapContext},
};

/// Order-insensitive key set comparison, used to decide whether a cached
/// key list is still coherent with the real value.
pub(crate) fn set_equal(a: &[PropertyKey], b: &[PropertyKey]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let set: HashSet<&PropertyKey> = a.iter().collect();
    b.iter().all(|key| set.contains(key))
}

impl GraphHandler {
    /// Recomputes the exposed key list for this graph.
    ///
    /// Starting from the real own keys: locally deleted keys of either
    /// side are removed, both key filters must accept, local-only keys
    /// of either side are appended in first-seen order, and the
    /// graph-name sentinel is appended when enabled. The result is
    /// cached together with the unfiltered real key set and reconciled
    /// with the shadow's own commitments.
    pub(crate) fn set_own_keys(
        &self,
        ctx: &TrapContext,
        shadow: &ObjectRef,
    ) -> Result<Vec<PropertyKey>> {
        let real_keys = reflect::own_keys(&ctx.original_obj)?;
        let real_set: HashSet<PropertyKey> = real_keys.iter().cloned().collect();

        let mut keys: Vec<PropertyKey> = Vec::with_capacity(real_keys.len());
        {
            let cyl = ctx.cylinder.borrow();

            let mut deleted = IndexSet::new();
            cyl.append_deleted_names(&ctx.origin_graph, &mut deleted)?;
            cyl.append_deleted_names(&self.graph_name, &mut deleted)?;

            let origin_filter = cyl.get_own_keys_filter(&ctx.origin_graph)?;
            let local_filter = cyl.get_own_keys_filter(&self.graph_name)?;

            for key in &real_keys {
                if deleted.contains(key) {
                    continue;
                }
                if let Some(filter) = &origin_filter {
                    if !filter(key) {
                        continue;
                    }
                }
                if let Some(filter) = &local_filter {
                    if !filter(key) {
                        continue;
                    }
                }
                keys.push(key.clone());
            }

            // Local-only keys bypass the filters: origin additions
            // first, then this graph's, preserving first-seen order.
            for graph in [&ctx.origin_graph, &self.graph_name] {
                for key in cyl.local_own_keys(graph)? {
                    if !real_set.contains(&key) && !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
        }

        if ctx.membrane.show_graph_name() {
            let sentinel = crate::membrane::graph_name_key();
            if !keys.contains(&sentinel) {
                keys.push(sentinel);
            }
        }

        // Reconcile with the shadow: keys the shadow has committed to
        // non-configurably must appear; a non-extensible shadow fixes
        // the key set entirely.
        let shadow_keys = shadow.own_keys_ordered();
        if !shadow.extensible() {
            let allowed: HashSet<PropertyKey> = shadow_keys.iter().cloned().collect();
            let before = keys.len();
            keys.retain(|key| allowed.contains(key));
            if keys.len() != before {
                ctx.membrane.warn_once(&format!(
                    "ownKeys for graph {} dropped keys the locked shadow does not carry",
                    self.graph_name
                ));
            }
        }
        for key in shadow_keys {
            let pinned = shadow
                .own_property(&key)
                .is_some_and(|desc| !desc.configurable());
            let required = pinned || !shadow.extensible();
            if required && !keys.contains(&key) {
                ctx.membrane.warn_once(&format!(
                    "ownKeys for graph {} restored the key '{key}' the shadow has committed to",
                    self.graph_name
                ));
                keys.push(key);
            }
        }

        ctx.cylinder.borrow_mut().set_cached_own_keys(
            &self.graph_name,
            keys.clone(),
            real_keys,
        )?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_equal_ignores_order() {
        let a: Vec<PropertyKey> = vec!["x".into(), "y".into()];
        let b: Vec<PropertyKey> = vec!["y".into(), "x".into()];
        assert!(set_equal(&a, &b));
        let c: Vec<PropertyKey> = vec!["x".into()];
        assert!(!set_equal(&a, &c));
        let d: Vec<PropertyKey> = vec!["x".into(), "z".into()];
        assert!(!set_equal(&a, &d));
    }
}
