//! Shadow locking: lazy getters and extensibility propagation.
//!
//! When a mediated value loses extensibility, the shadow must commit to
//! the same key set before the proxy layer will report the loss. Each
//! exposed key gets a one-shot lazy accessor that, on first read,
//! replaces itself with the wrapped real descriptor and returns the
//! value. The replacement goes through the promotion side-channel
//! because the accessor's configurability may already be gone.

use std::rc::Rc;

use reflection::{
    reflect, FunctionSlot, Object, ObjectRef, PropertyDescriptor, PropertyKey, Trap, Value,
};

use crate::{
    error::{Error, Result},
    handler::{GraphHandler, TrapContext},
    listeners::ShadowTargetMode,
    value_map::CylinderRef,
};

/// How a lazy getter finalizes the descriptor it resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LazyStyle {
    /// Keep the wrapped descriptor's own flags.
    Preserve,
    /// Pin the resolved descriptor as non-configurable.
    Sealed,
    /// Pin the resolved descriptor as non-configurable and non-writable.
    Frozen,
}

impl From<ShadowTargetMode> for LazyStyle {
    fn from(mode: ShadowTargetMode) -> Self {
        match mode {
            ShadowTargetMode::Prepared => LazyStyle::Preserve,
            ShadowTargetMode::Sealed => LazyStyle::Sealed,
            ShadowTargetMode::Frozen => LazyStyle::Frozen,
        }
    }
}

impl GraphHandler {
    /// Locks the shadow after the real value became non-extensible:
    /// lazy accessors for every exposed key, the wrapped prototype, and
    /// finally the extensibility flag itself.
    ///
    /// When the proxy for the real value is still being constructed on
    /// the current call stack, the lock is deferred until construction
    /// finishes; re-entering the wrap pipeline here would observe a
    /// half-built cylinder.
    pub(crate) fn lock_shadow(&self, ctx: &TrapContext, shadow: &ObjectRef) -> Result<()> {
        if !shadow.extensible() {
            return Ok(());
        }
        let real_id = ctx.original_obj.id();
        if self.under_construction(real_id) {
            let handler = self.downgrade();
            let cylinder = Rc::downgrade(&ctx.cylinder);
            let shadow = shadow.downgrade();
            self.defer_until_constructed(
                real_id,
                Box::new(move || {
                    let (Some(handler), Some(cylinder), Some(shadow)) =
                        (handler.upgrade(), cylinder.upgrade(), shadow.upgrade())
                    else {
                        return;
                    };
                    let result = handler
                        .context_for_cylinder(&cylinder)
                        .and_then(|ctx| handler.lock_shadow(&ctx, &shadow));
                    if let Err(error) = result {
                        tracing::warn!(%error, "deferred shadow lock failed");
                    }
                }),
            );
            return Ok(());
        }

        let keys = self.set_own_keys(ctx, shadow)?;
        for key in keys {
            self.install_lazy_getter(ctx, shadow, key, LazyStyle::Preserve)?;
        }
        self.proto_in_this_graph(ctx, shadow)?;
        reflect::prevent_extensions(shadow)?;
        Ok(())
    }

    /// Populates the shadow for [`ProxyMessage::use_shadow_target`]:
    /// lazy getters for every exposed key, plus mode-specific locking.
    ///
    /// [`ProxyMessage::use_shadow_target`]: crate::listeners::ProxyMessage::use_shadow_target
    pub(crate) fn prepare_shadow(
        &self,
        cylinder: &CylinderRef,
        mode: ShadowTargetMode,
    ) -> Result<()> {
        let ctx = self.context_for_cylinder(cylinder)?;
        let shadow = cylinder.borrow().get_shadow_target(&self.graph_name)?;
        let keys = self.set_own_keys(&ctx, &shadow)?;
        let style = LazyStyle::from(mode);
        for key in keys {
            self.install_lazy_getter(&ctx, &shadow, key, style)?;
        }
        self.proto_in_this_graph(&ctx, &shadow)?;
        if mode != ShadowTargetMode::Prepared {
            reflect::prevent_extensions(&shadow)?;
        }
        Ok(())
    }

    fn install_lazy_getter(
        &self,
        ctx: &TrapContext,
        shadow: &ObjectRef,
        key: PropertyKey,
        style: LazyStyle,
    ) -> Result<()> {
        if let Some(existing) = shadow.own_property(&key) {
            if !existing.configurable() {
                // Already pinned or materialized.
                return Ok(());
            }
        }

        let handler = self.downgrade();
        let cylinder = Rc::downgrade(&ctx.cylinder);
        let shadow_weak = shadow.downgrade();
        let getter_key = key.clone();
        let getter = move |this: Value, _args: &[Value]| -> reflection::Result<Value> {
            let (Some(handler), Some(cylinder), Some(shadow)) = (
                handler.upgrade(),
                cylinder.upgrade(),
                shadow_weak.upgrade(),
            ) else {
                return Err(Error::Revoked.into());
            };
            let ctx = handler.context_for_cylinder(&cylinder)?;
            let resolved = handler.get_own_desc(&ctx, &shadow, &getter_key, Trap::Get)?;
            let mut desc = resolved.unwrap_or_else(|| PropertyDescriptor::data(Value::Undefined));
            match style {
                LazyStyle::Preserve => {}
                LazyStyle::Sealed => desc.set_configurable(false),
                LazyStyle::Frozen => {
                    desc.set_configurable(false);
                    desc.set_writable(false);
                }
            }
            shadow.promote_own_property(getter_key.clone(), desc.clone());
            match desc {
                PropertyDescriptor::Data { value, .. } => Ok(value),
                PropertyDescriptor::Accessor { get: Some(getter), .. } => {
                    reflect::apply(&getter, this, &[])
                }
                PropertyDescriptor::Accessor { get: None, .. } => Ok(Value::Undefined),
            }
        };
        let getter_fn = Object::new_function(FunctionSlot::new(0, Rc::new(getter)), None);

        shadow.promote_own_property(
            key,
            PropertyDescriptor::Accessor {
                get: Some(getter_fn),
                set: None,
                enumerable: true,
                configurable: style == LazyStyle::Preserve,
            },
        );
        Ok(())
    }
}
