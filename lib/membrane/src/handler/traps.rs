//! Trap bodies for [`GraphHandler`].
//!
//! Each trap runs in four steps: guard (revocation, cylinder lookup,
//! disabled traps), local-rule consultation, the raw operation against
//! the origin graph, and wrapping of every reference that crosses back.

use reflection::{
    reflect, ObjectRef, PropertyDescriptor, PropertyKey, ProxyTraps, Trap, Value,
};

use crate::{
    error::{Error, Result},
    handler::{GraphHandler, LocalFlagKind, TrapContext},
    listeners::{FunctionOutcome, FunctionReason},
};

impl GraphHandler {
    fn do_get(&self, shadow: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
        let ctx = self.trap_guard(Trap::Get, shadow)?;
        match self.get_own_desc(&ctx, shadow, key, Trap::Get)? {
            Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                Ok(reflect::apply(&getter, receiver.clone(), &[])?)
            }
            Some(PropertyDescriptor::Accessor { get: None, .. }) => Ok(Value::Undefined),
            None => match self.proto_in_this_graph(&ctx, shadow)? {
                Some(parent) => Ok(reflect::get(&parent, key, receiver)?),
                None => Ok(Value::Undefined),
            },
        }
    }

    fn do_set(
        &self,
        shadow: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> Result<bool> {
        let ctx = self.trap_guard(Trap::Set, shadow)?;
        let own = match self.get_own_desc(&ctx, shadow, key, Trap::Set)? {
            Some(own) => own,
            None => match self.proto_in_this_graph(&ctx, shadow)? {
                Some(parent) => return Ok(reflect::set(&parent, key, value, receiver)?),
                None => PropertyDescriptor::data(Value::Undefined),
            },
        };
        match own {
            PropertyDescriptor::Data { writable, .. } => {
                if !writable {
                    return Ok(false);
                }
                let Some(receiver_obj) = receiver.as_object().cloned() else {
                    return Ok(false);
                };
                // A receiver that has never crossed the membrane may be
                // mid-construction; bootstrap its mapping on demand.
                if !ctx.membrane.map().contains(receiver_obj.id()) {
                    ctx.membrane
                        .ensure_mapping_for(&self.self_rc(), receiver.clone())?;
                }
                match reflect::get_own_property_descriptor(&receiver_obj, key)? {
                    Some(PropertyDescriptor::Accessor { .. }) => Ok(false),
                    Some(PropertyDescriptor::Data {
                        writable,
                        enumerable,
                        configurable,
                        ..
                    }) => {
                        if !writable {
                            return Ok(false);
                        }
                        Ok(reflect::define_property(
                            &receiver_obj,
                            key.clone(),
                            PropertyDescriptor::Data {
                                value,
                                writable,
                                enumerable,
                                configurable,
                            },
                        )?)
                    }
                    None => Ok(reflect::define_property(
                        &receiver_obj,
                        key.clone(),
                        PropertyDescriptor::data(value),
                    )?),
                }
            }
            PropertyDescriptor::Accessor { set: Some(setter), .. } => {
                reflect::apply(&setter, receiver.clone(), std::slice::from_ref(&value))?;
                Ok(true)
            }
            PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
        }
    }

    fn do_has(&self, shadow: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        let ctx = self.trap_guard(Trap::Has, shadow)?;
        if self.get_own_desc(&ctx, shadow, key, Trap::Has)?.is_some() {
            return Ok(true);
        }
        match self.proto_in_this_graph(&ctx, shadow)? {
            Some(parent) => Ok(reflect::has(&parent, key)?),
            None => Ok(false),
        }
    }

    fn do_delete(&self, shadow: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        let ctx = self.trap_guard(Trap::DeleteProperty, shadow)?;
        let should_be_local = self.should_be_local(&ctx, LocalFlagKind::RequireLocalDelete)?;
        if self.key_filtered(&ctx, key)? {
            // The key does not exist as far as this graph can tell;
            // deleting it is a successful no-op on the real value.
            ctx.cylinder.borrow_mut().delete_local_descriptor(
                &self.graph_name,
                key,
                should_be_local,
            )?;
            self.clear_key_caches(&ctx);
            return Ok(true);
        }
        if should_be_local {
            ctx.cylinder
                .borrow_mut()
                .delete_local_descriptor(&self.graph_name, key, true)?;
            self.clear_key_caches(&ctx);
            let _ = reflect::delete_property(shadow, key)?;
            return Ok(true);
        }
        ctx.cylinder
            .borrow_mut()
            .delete_local_descriptor(&self.graph_name, key, false)?;
        let deleted = reflect::delete_property(&ctx.original_obj, key)?;
        self.clear_key_caches(&ctx);
        if deleted {
            let _ = reflect::delete_property(shadow, key)?;
        }
        Ok(deleted)
    }

    fn do_define(
        &self,
        shadow: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool> {
        let ctx = self.trap_guard(Trap::DefineProperty, shadow)?;
        if ctx.membrane.show_graph_name() && key == crate::membrane::graph_name_key() {
            // The sentinel cannot be defined away.
            return Ok(false);
        }
        let should_be_local = self.should_be_local(&ctx, LocalFlagKind::StoreUnknownAsLocal)?;
        let filtered = self.key_filtered(&ctx, &key)?;
        if filtered && !should_be_local {
            return Ok(false);
        }
        if should_be_local {
            let real_has =
                reflect::get_own_property_descriptor(&ctx.original_obj, &key)?.is_some();
            if filtered || !real_has {
                if !desc.configurable() {
                    self.pin_on_shadow(shadow, &key, desc.clone(), Trap::DefineProperty)?;
                }
                ctx.cylinder
                    .borrow_mut()
                    .set_local_descriptor(&self.graph_name, key, desc)?;
                self.clear_key_caches(&ctx);
                return Ok(true);
            }
        }
        ctx.cylinder
            .borrow_mut()
            .unmask_deletion(&self.graph_name, &key)?;
        let wrapped =
            ctx.membrane
                .wrap_descriptor_between(&self.graph_name, &ctx.origin_graph, desc.clone())?;
        let defined = reflect::define_property(&ctx.original_obj, key.clone(), wrapped)?;
        self.clear_key_caches(&ctx);
        if defined && !desc.configurable() {
            self.pin_on_shadow(shadow, &key, desc, Trap::DefineProperty)?;
        }
        Ok(defined)
    }

    fn do_get_own(
        &self,
        shadow: &ObjectRef,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>> {
        let ctx = self.trap_guard(Trap::GetOwnPropertyDescriptor, shadow)?;
        self.get_own_desc(&ctx, shadow, key, Trap::GetOwnPropertyDescriptor)
    }

    fn do_own_keys(&self, shadow: &ObjectRef) -> Result<Vec<PropertyKey>> {
        let ctx = self.trap_guard(Trap::OwnKeys, shadow)?;
        if !shadow.extensible() {
            return Ok(shadow.own_keys_ordered());
        }
        if let Some(cached) = ctx.cylinder.borrow().cached_own_keys(&self.graph_name)? {
            let current = reflect::own_keys(&ctx.original_obj)?;
            if super::own_keys::set_equal(&cached.original, &current) {
                return Ok(cached.keys);
            }
        }
        self.set_own_keys(&ctx, shadow)
    }

    fn do_get_prototype(&self, shadow: &ObjectRef) -> Result<Option<ObjectRef>> {
        let ctx = self.trap_guard(Trap::GetPrototypeOf, shadow)?;
        self.proto_in_this_graph(&ctx, shadow)
    }

    fn do_set_prototype(&self, shadow: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
        let ctx = self.trap_guard(Trap::SetPrototypeOf, shadow)?;
        let crossed = match &prototype {
            None => None,
            Some(proto) => {
                let wrapped = self.wrap_into_origin(&ctx, Value::Object(proto.clone()))?;
                Some(wrapped.as_object().cloned().ok_or_else(|| {
                    Error::validation("a prototype wrapped across the membrane must stay an object")
                })?)
            }
        };
        let changed = reflect::set_prototype_of(&ctx.original_obj, crossed)?;
        if changed {
            shadow.set_prototype(prototype);
        }
        Ok(changed)
    }

    fn do_is_extensible(&self, shadow: &ObjectRef) -> Result<bool> {
        let ctx = self.trap_guard(Trap::IsExtensible, shadow)?;
        if !shadow.extensible() {
            return Ok(false);
        }
        let extensible = reflect::is_extensible(&ctx.original_obj)?;
        if !extensible {
            self.lock_shadow(&ctx, shadow)?;
        }
        Ok(extensible)
    }

    fn do_prevent_extensions(&self, shadow: &ObjectRef) -> Result<bool> {
        let ctx = self.trap_guard(Trap::PreventExtensions, shadow)?;
        if !shadow.extensible() {
            return Ok(true);
        }
        let locked = reflect::prevent_extensions(&ctx.original_obj)?;
        if locked {
            self.lock_shadow(&ctx, shadow)?;
        }
        Ok(locked)
    }

    fn truncated_len(&self, ctx: &TrapContext, supplied: usize) -> Result<usize> {
        let arity = ctx
            .original_obj
            .function_slot()
            .map(|slot| slot.arity)
            .unwrap_or(0);
        let cyl = ctx.cylinder.borrow();
        let origin_limit = cyl.get_truncate_arg_list(&ctx.origin_graph)?.resolve(arity);
        let local_limit = cyl.get_truncate_arg_list(&self.graph_name)?.resolve(arity);
        let limit = match (origin_limit, local_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        Ok(limit.map_or(supplied, |limit| supplied.min(limit)))
    }

    fn do_apply(&self, shadow: &ObjectRef, this: Value, args: &[Value]) -> Result<Value> {
        let ctx = self.trap_guard(Trap::Apply, shadow)?;
        let len = self.truncated_len(&ctx, args.len())?;
        let wrapped_this = self.wrap_into_origin(&ctx, this)?;
        let wrapped_args = args[..len]
            .iter()
            .map(|arg| self.wrap_into_origin(&ctx, arg.clone()))
            .collect::<Result<Vec<_>>>()?;

        self.fire_function_event(&ctx, Trap::Apply, FunctionReason::Enter, FunctionOutcome::Pending);
        match reflect::apply(&ctx.original_obj, wrapped_this, &wrapped_args) {
            Ok(returned) => {
                let wrapped = self.wrap_into_this_graph(&ctx, returned)?;
                self.fire_function_event(
                    &ctx,
                    Trap::Apply,
                    FunctionReason::Return,
                    FunctionOutcome::Returned(&wrapped),
                );
                Ok(wrapped)
            }
            Err(error) => {
                self.fire_function_event(
                    &ctx,
                    Trap::Apply,
                    FunctionReason::Throw,
                    FunctionOutcome::Threw(&error),
                );
                Err(Error::Reflection(error))
            }
        }
    }

    fn do_construct(
        &self,
        shadow: &ObjectRef,
        args: &[Value],
        new_target: &ObjectRef,
    ) -> Result<Value> {
        let ctx = self.trap_guard(Trap::Construct, shadow)?;
        let len = self.truncated_len(&ctx, args.len())?;
        let wrapped_args = args[..len]
            .iter()
            .map(|arg| self.wrap_into_origin(&ctx, arg.clone()))
            .collect::<Result<Vec<_>>>()?;
        let wrapped_new_target = self
            .wrap_into_origin(&ctx, Value::Object(new_target.clone()))?
            .as_object()
            .cloned()
            .ok_or_else(|| Error::validation("new.target must wrap to an object"))?;

        self.fire_function_event(
            &ctx,
            Trap::Construct,
            FunctionReason::Enter,
            FunctionOutcome::Pending,
        );
        match reflect::construct(&ctx.original_obj, &wrapped_args, &wrapped_new_target) {
            Ok(created) => {
                let wrapped = self.wrap_into_this_graph(&ctx, created)?;
                self.fire_function_event(
                    &ctx,
                    Trap::Construct,
                    FunctionReason::Return,
                    FunctionOutcome::Returned(&wrapped),
                );
                Ok(wrapped)
            }
            Err(error) => {
                self.fire_function_event(
                    &ctx,
                    Trap::Construct,
                    FunctionReason::Throw,
                    FunctionOutcome::Threw(&error),
                );
                Err(Error::Reflection(error))
            }
        }
    }
}

impl ProxyTraps for GraphHandler {
    fn get(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        receiver: &Value,
    ) -> reflection::Result<Value> {
        self.do_get(target, key, receiver).map_err(Into::into)
    }

    fn set(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> reflection::Result<bool> {
        self.do_set(target, key, value, receiver).map_err(Into::into)
    }

    fn has(&self, target: &ObjectRef, key: &PropertyKey) -> reflection::Result<bool> {
        self.do_has(target, key).map_err(Into::into)
    }

    fn delete_property(&self, target: &ObjectRef, key: &PropertyKey) -> reflection::Result<bool> {
        self.do_delete(target, key).map_err(Into::into)
    }

    fn own_keys(&self, target: &ObjectRef) -> reflection::Result<Vec<PropertyKey>> {
        self.do_own_keys(target).map_err(Into::into)
    }

    fn get_own_property_descriptor(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> reflection::Result<Option<PropertyDescriptor>> {
        self.do_get_own(target, key).map_err(Into::into)
    }

    fn define_property(
        &self,
        target: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> reflection::Result<bool> {
        self.do_define(target, key, desc).map_err(Into::into)
    }

    fn get_prototype_of(&self, target: &ObjectRef) -> reflection::Result<Option<ObjectRef>> {
        self.do_get_prototype(target).map_err(Into::into)
    }

    fn set_prototype_of(
        &self,
        target: &ObjectRef,
        prototype: Option<ObjectRef>,
    ) -> reflection::Result<bool> {
        self.do_set_prototype(target, prototype).map_err(Into::into)
    }

    fn is_extensible(&self, target: &ObjectRef) -> reflection::Result<bool> {
        self.do_is_extensible(target).map_err(Into::into)
    }

    fn prevent_extensions(&self, target: &ObjectRef) -> reflection::Result<bool> {
        self.do_prevent_extensions(target).map_err(Into::into)
    }

    fn apply(&self, target: &ObjectRef, this: Value, args: &[Value]) -> reflection::Result<Value> {
        self.do_apply(target, this, args).map_err(Into::into)
    }

    fn construct(
        &self,
        target: &ObjectRef,
        args: &[Value],
        new_target: &ObjectRef,
    ) -> reflection::Result<Value> {
        self.do_construct(target, args, new_target).map_err(Into::into)
    }
}
