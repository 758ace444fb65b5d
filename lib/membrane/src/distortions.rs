//! Declarative distortion configuration.
//!
//! A [`DistortionsListener`] is a catalog of configurations keyed by
//! value, by prototype, or by predicate. Bound to a graph handler, it is
//! consulted on first crossing and translated into rule-modification
//! calls against the new proxy.

use std::{cell::RefCell, collections::HashSet, rc::Rc};

use serde::{Deserialize, Serialize};

use reflection::{reflect, ObjectRef, Trap, Value, ValueClass};

use crate::{
    cylinder::ArgumentLimit,
    error::{Error, Result},
    handler::GraphHandler,
    listeners::{ProxyListener, ProxyMessage, ShadowTargetMode},
    membrane::MembraneInner,
    rules::{ModifyRules, OwnKeysFilter},
};

/// `filterOwnKeys` setting: disabled, or an allow-list of string keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSetting {
    Off(bool),
    Keys(Vec<String>),
}

impl Default for FilterSetting {
    fn default() -> Self {
        FilterSetting::Off(false)
    }
}

/// `truncateArgList` setting: `false` (unlimited), `true` (declared
/// arity) or an explicit argument count.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TruncateSetting {
    Flag(bool),
    Limit(usize),
}

impl TruncateSetting {
    fn into_limit(self) -> ArgumentLimit {
        match self {
            TruncateSetting::Flag(false) => ArgumentLimit::Unlimited,
            TruncateSetting::Flag(true) => ArgumentLimit::DeclaredArity,
            TruncateSetting::Limit(limit) => ArgumentLimit::Exact(limit),
        }
    }
}

/// `useShadowTarget` setting: disabled, or a preparation mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShadowSetting {
    Off(bool),
    Mode(ShadowTargetMode),
}

impl Default for ShadowSetting {
    fn default() -> Self {
        ShadowSetting::Off(false)
    }
}

/// One distortion configuration, JSON-shaped and round-trippable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionsConfig {
    #[serde(default)]
    pub filter_own_keys: FilterSetting,
    pub proxy_traps: Vec<String>,
    #[serde(default)]
    pub store_unknown_as_local: bool,
    #[serde(default)]
    pub require_local_delete: bool,
    #[serde(default)]
    pub use_shadow_target: ShadowSetting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_arg_list: Option<TruncateSetting>,
}

/// The default configuration shape, with the function-only slot present
/// only when `is_function` is set.
pub fn sample_config(is_function: bool) -> DistortionsConfig {
    DistortionsConfig {
        filter_own_keys: FilterSetting::Off(false),
        proxy_traps: Trap::ALL.iter().map(|trap| trap.name().to_string()).collect(),
        store_unknown_as_local: false,
        require_local_delete: false,
        use_shadow_target: ShadowSetting::Off(false),
        truncate_arg_list: is_function.then_some(TruncateSetting::Flag(false)),
    }
}

fn validate_config(config: &DistortionsConfig) -> Result<HashSet<Trap>> {
    if matches!(config.filter_own_keys, FilterSetting::Off(true)) {
        return Err(Error::validation(
            "filterOwnKeys must be false or an array of keys",
        ));
    }
    if matches!(config.use_shadow_target, ShadowSetting::Off(true)) {
        return Err(Error::validation(
            "useShadowTarget must be false or one of frozen, sealed, prepared",
        ));
    }
    let mut enabled = HashSet::with_capacity(config.proxy_traps.len());
    for name in &config.proxy_traps {
        let trap: Trap = name
            .parse()
            .map_err(|_| Error::validation(format!("unknown trap name in proxyTraps: {name}")))?;
        enabled.insert(trap);
    }
    Ok(enabled)
}

/// Category under which [`DistortionsListener::add_listener`] files a
/// value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistortionCategory {
    /// Match the value itself.
    Value,
    /// The value is a prototype; match everything inheriting from it.
    Prototype,
    /// The value is an instance; match siblings sharing its prototype.
    Instance,
    /// The value is a container; file each of its own property values.
    Iterable,
}

/// Predicate used by filter-keyed configurations.
pub type ValuePredicate = Rc<dyn Fn(&Value) -> bool>;

#[derive(Default)]
struct Catalog {
    by_value: RefCell<Vec<(Value, DistortionsConfig)>>,
    by_prototype: RefCell<Vec<(ObjectRef, DistortionsConfig)>>,
    by_filter: RefCell<Vec<(ValuePredicate, DistortionsConfig)>>,
}

impl Catalog {
    /// Lookup order: exact value, then the prototype chain, then the
    /// first matching predicate.
    fn config_for(&self, value: &Value) -> Option<DistortionsConfig> {
        for (candidate, config) in self.by_value.borrow().iter() {
            if candidate.same(value) {
                return Some(config.clone());
            }
        }
        if let Some(object) = value.as_object() {
            let mut cursor = reflect::get_prototype_of(object).ok().flatten();
            while let Some(link) = cursor {
                for (prototype, config) in self.by_prototype.borrow().iter() {
                    if prototype.ptr_eq(&link) {
                        return Some(config.clone());
                    }
                }
                cursor = reflect::get_prototype_of(&link).ok().flatten();
            }
        }
        for (predicate, config) in self.by_filter.borrow().iter() {
            if predicate(value) {
                return Some(config.clone());
            }
        }
        None
    }
}

/// A declarative rule catalog applied at first-crossing time.
pub struct DistortionsListener {
    membrane: Rc<MembraneInner>,
    catalog: Rc<Catalog>,
}

impl DistortionsListener {
    pub(crate) fn new(membrane: Rc<MembraneInner>) -> Self {
        Self {
            membrane,
            catalog: Rc::new(Catalog::default()),
        }
    }

    /// Files `config` for `value` under `category`.
    pub fn add_listener(
        &self,
        value: &Value,
        category: DistortionCategory,
        config: DistortionsConfig,
    ) -> Result<()> {
        validate_config(&config)?;
        match category {
            DistortionCategory::Value => {
                self.catalog
                    .by_value
                    .borrow_mut()
                    .push((value.clone(), config));
            }
            DistortionCategory::Prototype => {
                let object = value
                    .as_object()
                    .ok_or_else(|| Error::validation("a prototype listener needs an object"))?;
                self.catalog
                    .by_prototype
                    .borrow_mut()
                    .push((object.clone(), config));
            }
            DistortionCategory::Instance => {
                let object = value
                    .as_object()
                    .ok_or_else(|| Error::validation("an instance listener needs an object"))?;
                let prototype = reflect::get_prototype_of(object)?.ok_or_else(|| {
                    Error::validation("an instance listener needs a value with a prototype")
                })?;
                self.catalog
                    .by_prototype
                    .borrow_mut()
                    .push((prototype, config));
            }
            DistortionCategory::Iterable => {
                let object = value
                    .as_object()
                    .ok_or_else(|| Error::validation("an iterable listener needs an object"))?;
                for key in reflect::own_keys(object)? {
                    let element = reflect::get(object, &key, value)?;
                    if !element.is_primitive() {
                        self.catalog
                            .by_value
                            .borrow_mut()
                            .push((element, config.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Files `config` under a predicate over crossing values.
    pub fn add_filter_listener(&self, predicate: ValuePredicate, config: DistortionsConfig) -> Result<()> {
        validate_config(&config)?;
        self.catalog
            .by_filter
            .borrow_mut()
            .push((predicate, config));
        Ok(())
    }

    /// Adds `value` to the membrane's pass-through set.
    pub fn ignore(&self, value: &Value) {
        self.membrane.add_ignorable(value);
    }

    /// Adds every primordial to the pass-through set.
    pub fn ignore_primordials(&self) {
        for object in self.membrane.intrinsics().all() {
            self.membrane.add_ignorable(&Value::Object(object));
        }
    }

    /// The configuration that would apply to `value`, if any.
    pub fn config_for(&self, value: &Value) -> Option<DistortionsConfig> {
        self.catalog.config_for(value)
    }

    /// Translates `config` into rule-modification calls against the
    /// graph `message` was fired for.
    pub fn apply_configuration(
        &self,
        config: &DistortionsConfig,
        message: &ProxyMessage,
    ) -> Result<()> {
        apply_configuration(&self.membrane, config, message)
    }

    /// Binds this catalog to `handler`: from now on, every first
    /// crossing into that graph consults the catalog.
    pub fn listen_to(&self, handler: &Rc<GraphHandler>) {
        let membrane = Rc::downgrade(&self.membrane);
        let catalog = Rc::clone(&self.catalog);
        let listener: ProxyListener = Rc::new(move |message| {
            let Some(membrane) = membrane.upgrade() else {
                return Ok(());
            };
            match catalog.config_for(&message.target()) {
                Some(config) => apply_configuration(&membrane, &config, message),
                None => Ok(()),
            }
        });
        handler.add_proxy_listener(listener);
    }
}

impl std::fmt::Debug for DistortionsListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistortionsListener")
            .field("values", &self.catalog.by_value.borrow().len())
            .field("prototypes", &self.catalog.by_prototype.borrow().len())
            .field("filters", &self.catalog.by_filter.borrow().len())
            .finish()
    }
}

/// Translates one configuration into rule-modification calls against
/// the graph being notified.
pub(crate) fn apply_configuration(
    membrane: &Rc<MembraneInner>,
    config: &DistortionsConfig,
    message: &ProxyMessage,
) -> Result<()> {
    let enabled = validate_config(config)?;
    let rules = ModifyRules::new(Rc::clone(membrane));
    let graph = message.graph_name().clone();
    let subject = if message.is_origin_graph() {
        message.target()
    } else {
        message.proxy()
    };

    if let FilterSetting::Keys(keys) = &config.filter_own_keys {
        rules.filter_own_keys(
            &graph,
            &subject,
            Some(OwnKeysFilter::allow_list(keys.iter().map(String::as_str))),
        )?;
    }
    let disabled: Vec<Trap> = Trap::ALL
        .into_iter()
        .filter(|trap| !enabled.contains(trap))
        .collect();
    if !disabled.is_empty() {
        rules.disable_traps(&graph, &subject, &disabled)?;
    }
    if config.store_unknown_as_local {
        rules.store_unknown_as_local(&graph, &subject)?;
    }
    if config.require_local_delete {
        rules.require_local_delete(&graph, &subject)?;
    }
    if let Some(setting) = config.truncate_arg_list {
        if subject.class() == ValueClass::Function && setting != TruncateSetting::Flag(false) {
            rules.truncate_arg_list(&graph, &subject, setting.into_limit())?;
        }
    }
    if let ShadowSetting::Mode(mode) = config.use_shadow_target {
        if !message.is_origin_graph() {
            message.use_shadow_target(mode)?;
        }
    }
    if !message.is_origin_graph() {
        if let Some(real) = message.target().as_object() {
            if !reflect::is_extensible(real)? {
                if let Some(proxy) = message.proxy().as_object() {
                    reflect::prevent_extensions(proxy)?;
                }
            }
        }
    }
    Ok(())
}
