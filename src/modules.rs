//! Target-module registry and cache.
//!
//! A target module is registered as a name plus a defaults function (and
//! optionally a statics function that derives attributes from the merged
//! namespace). The [`Registry`] owns the definitions, the cache of composed
//! modules, the process argument vector, and the composition flag: all the
//! process-wide state composition perturbs, gathered in one object with an
//! explicit lifecycle. `Registry::global()` is the process instance; tests
//! construct their own.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use strata_script::{Scope, ScriptError};
use thiserror::Error;

use crate::argv::ArgVector;
use crate::compose::ComposeError;
use crate::computed::ComputedError;
use crate::loader::{Source, SourceInfo};
use crate::namespace::{ComputedRegistry, Namespace};

/// Maximum nesting of computed-attribute evaluation. A computed attribute
/// that reads itself (directly or through a cycle) fails instead of
/// recursing forever.
const MAX_EVAL_DEPTH: usize = 32;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Option<DepthGuard> {
        EVAL_DEPTH.with(|depth| {
            if depth.get() >= MAX_EVAL_DEPTH {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Errors from attribute access on a composed module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{module}' has no attribute '{name}'")]
    NoAttribute { module: String, name: String },

    #[error("computed attribute '{name}' failed: {source}")]
    Computed {
        name: String,
        source: ComputedError,
    },

    #[error("computed attribute '{name}' exceeded the evaluation depth limit")]
    DepthExceeded { name: String },
}

/// A registered target module: defaults plus optional derived statics.
pub struct ModuleDef {
    name: String,
    defaults: Box<dyn Fn(&mut Namespace, &mut ComputedRegistry) + Send + Sync>,
    statics: Option<StaticsFn>,
}

type StaticsFn =
    Box<dyn Fn(&ComposedModule) -> Result<Vec<(String, Value)>, ModuleError> + Send + Sync>;

impl ModuleDef {
    /// Define a module. `defaults` populates the defaults namespace (and
    /// may register computed defaults) each time the module is built.
    pub fn new<F>(name: impl Into<String>, defaults: F) -> Self
    where
        F: Fn(&mut Namespace, &mut ComputedRegistry) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            defaults: Box::new(defaults),
            statics: None,
        }
    }

    /// Add a statics function: derived attributes recomputed from the
    /// merged namespace after every (re)build, so values that depend on
    /// overridden defaults stay consistent.
    pub fn with_statics<F>(mut self, statics: F) -> Self
    where
        F: Fn(&ComposedModule) -> Result<Vec<(String, Value)>, ModuleError> + Send + Sync + 'static,
    {
        self.statics = Some(Box::new(statics));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A fully composed module: merged plain attributes, computed registrations,
/// and the provenance of the sources that contributed.
pub struct ComposedModule {
    name: String,
    attrs: RwLock<Namespace>,
    computed: ComputedRegistry,
    sources: Vec<SourceInfo>,
    composed_at: DateTime<Utc>,
}

impl ComposedModule {
    pub(crate) fn new(
        name: impl Into<String>,
        namespace: Namespace,
        computed: ComputedRegistry,
        sources: Vec<SourceInfo>,
    ) -> Self {
        Self {
            name: name.into(),
            attrs: RwLock::new(namespace),
            computed,
            sources,
            composed_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contributing sources in precedence order.
    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn composed_at(&self) -> DateTime<Utc> {
        self.composed_at
    }

    /// Read an attribute: plain attributes first, then the computed
    /// registry. Computed attributes are evaluated against this module, so
    /// they may read other attributes, including other computed ones.
    pub fn get(&self, name: &str) -> Result<Value, ModuleError> {
        if let Some(value) = self
            .attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(value.clone());
        }
        if let Some(attr) = self.computed.get(name) {
            let attr = attr.clone();
            let _depth = DepthGuard::enter().ok_or_else(|| ModuleError::DepthExceeded {
                name: name.to_string(),
            })?;
            return attr.evaluate(self).map_err(|source| ModuleError::Computed {
                name: name.to_string(),
                source,
            });
        }
        Err(ModuleError::NoAttribute {
            module: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Set a plain attribute. A plain attribute shadows any computed
    /// registration of the same name on later reads.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.attrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(name, value);
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).ok().and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).ok().and_then(|v| v.as_u64())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).ok().and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).ok().and_then(|v| v.as_f64())
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Snapshot of the plain attributes.
    pub fn snapshot(&self) -> Namespace {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The computed-attribute registrations.
    pub fn computed(&self) -> &ComputedRegistry {
        &self.computed
    }
}

impl Scope for ComposedModule {
    fn lookup(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        match self.get(name) {
            Ok(value) => Ok(Some(value)),
            Err(ModuleError::NoAttribute { .. }) => Ok(None),
            Err(e) => Err(ScriptError::Host(e.to_string())),
        }
    }
}

/// Process-wide registry of target modules.
pub struct Registry {
    pub(crate) defs: Mutex<BTreeMap<String, Arc<ModuleDef>>>,
    pub(crate) cache: Mutex<BTreeMap<String, Arc<ComposedModule>>>,
    pub(crate) argv: ArgVector,
    pub(crate) composing: AtomicBool,
    /// Sources resolved by an in-flight composition, reused by module
    /// builds inside that session instead of reloading from disk.
    pub(crate) session_sources: Mutex<Vec<Arc<Source>>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// An empty registry with an empty argument vector.
    pub fn new() -> Self {
        Self::with_args(Vec::new())
    }

    /// An empty registry with the given argument vector.
    pub fn with_args(args: Vec<String>) -> Self {
        Self {
            defs: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(BTreeMap::new()),
            argv: ArgVector::new(args),
            composing: AtomicBool::new(false),
            session_sources: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide instance, seeded from the real process arguments.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Self {
            defs: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(BTreeMap::new()),
            argv: ArgVector::from_env(),
            composing: AtomicBool::new(false),
            session_sources: Mutex::new(Vec::new()),
        })
    }

    /// The registry's argument vector.
    pub fn argv(&self) -> &ArgVector {
        &self.argv
    }

    /// Register a module definition, replacing any previous definition of
    /// the same name. Does not touch an already cached build.
    pub fn register(&self, def: ModuleDef) {
        self.defs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def.name.clone(), Arc::new(def));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.defs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// The cached build of `name`, if any.
    pub fn cached(&self, name: &str) -> Option<Arc<ComposedModule>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Drop the cached build of `name` so the next import rebuilds it.
    pub fn invalidate(&self, name: &str) -> Option<Arc<ComposedModule>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Get-or-build a module. A defaults namespace is built once and then
    /// served from the cache for the process lifetime, until invalidated
    /// or evicted by a composition session.
    pub fn import(&self, name: &str) -> Result<Arc<ComposedModule>, ComposeError> {
        if let Some(module) = self.cached(name) {
            return Ok(module);
        }
        let module = Arc::new(self.build_module(name)?);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Build a module from scratch: defaults, then configuration overrides,
    /// then derived statics.
    pub(crate) fn build_module(&self, name: &str) -> Result<ComposedModule, ComposeError> {
        let def = self
            .defs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ComposeError::UnknownModule(name.to_string()))?;

        let mut namespace = Namespace::new(name);
        let mut computed = ComputedRegistry::new();
        (def.defaults)(&mut namespace, &mut computed);

        let infos = self.configure(name, &mut namespace, &mut computed, None)?;

        let module = ComposedModule::new(name, namespace, computed, infos);
        if let Some(statics) = &def.statics {
            let derived = statics(&module).map_err(|source| ComposeError::Statics {
                module: name.to_string(),
                source,
            })?;
            for (attr, value) in derived {
                module.set(attr, value);
            }
        }
        Ok(module)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Saves cache entries on eviction and restores them on drop: pre-existing
/// entries return, entries created during the scope are removed.
pub(crate) struct CacheGuard<'a> {
    registry: &'a Registry,
    saved: BTreeMap<String, Option<Arc<ComposedModule>>>,
}

impl<'a> CacheGuard<'a> {
    pub(crate) fn evict(
        registry: &'a Registry,
        names: impl IntoIterator<Item = String>,
    ) -> CacheGuard<'a> {
        let mut cache = registry
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut saved = BTreeMap::new();
        for name in names {
            let previous = cache.remove(&name);
            saved.insert(name, previous);
        }
        drop(cache);
        CacheGuard { registry, saved }
    }
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        let mut cache = self
            .registry
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, previous) in std::mem::take(&mut self.saved) {
            match previous {
                Some(module) => {
                    cache.insert(name, module);
                }
                None => {
                    cache.remove(&name);
                }
            }
        }
    }
}
