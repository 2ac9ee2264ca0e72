//! Composition sessions.
//!
//! `compose` rebuilds a target module against an explicit list of
//! configuration sources without disturbing the module the rest of the
//! process sees. The session holds a process-wide flag for its whole
//! duration; compositions of different targets also conflict and the
//! second fails fast. That coarseness is a deliberate safety net over the
//! shared cache and argument vector, not a scheduler, and is a known
//! limitation.
//!
//! Every piece of shared state the session touches is restored by a guard:
//! the spliced argument vector, the evicted cache entries, the session's
//! resolved sources, and the flag itself all revert on success, early
//! return, and error alike.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use thiserror::Error;

use crate::argv::ArgvError;
use crate::loader::{self, LoadError, Source, SourceInfo};
use crate::merge::apply_source;
use crate::modules::{CacheGuard, ComposedModule, ModuleError, Registry};
use crate::namespace::{ComputedRegistry, Namespace};

/// Errors from composing or configuring a module.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("a composition is already in flight")]
    ConcurrentCompose,

    #[error("compose requires at least one configuration source path")]
    EmptySourceList,

    #[error("no module named '{0}' is registered")]
    UnknownModule(String),

    #[error(transparent)]
    Argv(#[from] ArgvError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to derive static attributes of '{module}': {source}")]
    Statics {
        module: String,
        source: ModuleError,
    },
}

impl Registry {
    /// Compose `target` against `source_paths`, in caller order.
    ///
    /// The sources are loaded once and resolved by declared target; the
    /// target module is then rebuilt from its defaults with the matching
    /// sources merged in, and any cached module belonging to a target
    /// mentioned by the sources is evicted for the duration of the build so
    /// dependent modules re-resolve their own configuration. The cache and
    /// argument vector are restored before returning: the composed module
    /// is handed back to the caller only, and the previously cached build,
    /// if any, is untouched.
    pub fn compose(
        &self,
        target: &str,
        source_paths: &[PathBuf],
    ) -> Result<Arc<ComposedModule>, ComposeError> {
        let _session = ComposeGuard::acquire(&self.composing)?;

        if source_paths.is_empty() {
            return Err(ComposeError::EmptySourceList);
        }
        if !self.is_registered(target) {
            return Err(ComposeError::UnknownModule(target.to_string()));
        }

        let sources = source_paths
            .iter()
            .map(|path| loader::load(path).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        // Every target mentioned by a source reloads fresh, as does the
        // composed target itself.
        let mut evict: BTreeSet<String> =
            sources.iter().map(|s| s.target().to_string()).collect();
        evict.insert(target.to_string());

        let _argv = self.argv.splice_config(source_paths)?;
        let _cache = CacheGuard::evict(self, evict);
        let _overrides = SessionGuard::set(self, sources);

        self.import(target)
    }

    /// Merge the sources that declare `target` onto a defaults namespace
    /// and computed registry, returning provenance for the applied sources.
    ///
    /// With explicit `paths`, those files are loaded and applied. Without,
    /// the sources resolved by an in-flight composition are used if one is
    /// active; otherwise the `--config` flag of the process argument vector
    /// is consulted, and its absence makes this a no-op. Sources whose
    /// declared target differs are skipped entirely.
    pub fn configure(
        &self,
        target: &str,
        defaults: &mut Namespace,
        registry: &mut ComputedRegistry,
        paths: Option<&[PathBuf]>,
    ) -> Result<Vec<SourceInfo>, ComposeError> {
        let sources: Vec<Arc<Source>> = match paths {
            Some(paths) => paths
                .iter()
                .map(|path| loader::load(path).map(Arc::new))
                .collect::<Result<_, _>>()?,
            None => {
                let session = self
                    .session_sources
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if !session.is_empty() {
                    session
                } else {
                    match self.argv.config_paths()? {
                        Some(paths) => paths
                            .iter()
                            .map(|path| loader::load(path).map(Arc::new))
                            .collect::<Result<_, _>>()?,
                        None => return Ok(Vec::new()),
                    }
                }
            }
        };

        let mut applied = Vec::new();
        for source in sources.iter().filter(|s| s.target() == target) {
            apply_source(defaults, registry, source.as_ref());
            applied.push(source.info());
        }
        Ok(applied)
    }
}

/// Holds the process-wide composition flag; released on drop.
pub(crate) struct ComposeGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ComposeGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Result<ComposeGuard<'a>, ComposeError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ComposeError::ConcurrentCompose)?;
        Ok(ComposeGuard { flag })
    }
}

impl Drop for ComposeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Publishes the session's resolved sources; cleared on drop.
pub(crate) struct SessionGuard<'a> {
    registry: &'a Registry,
}

impl<'a> SessionGuard<'a> {
    pub(crate) fn set(registry: &'a Registry, sources: Vec<Arc<Source>>) -> SessionGuard<'a> {
        *registry
            .session_sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sources;
        SessionGuard { registry }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .session_sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleDef;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn weather_registry() -> Registry {
        let registry = Registry::new();
        registry.register(ModuleDef::new("weather", |ns, _| {
            ns.set("BATCH_SIZE", json!(64));
            ns.set("TODAYS_TEMP_FEATURE", json!(true));
        }));
        registry
    }

    fn write_config(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_empty_source_list() {
        let registry = weather_registry();
        assert!(matches!(
            registry.compose("weather", &[]),
            Err(ComposeError::EmptySourceList)
        ));
    }

    #[test]
    fn test_unknown_target() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "c.cfg", "MODULE = \"weather\"\n");
        let registry = weather_registry();
        assert!(matches!(
            registry.compose("climate", &[config]),
            Err(ComposeError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_concurrent_compose_rejected() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "c.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 128\n");
        let registry = weather_registry();

        // Simulate an in-flight composition by holding the flag.
        let held = ComposeGuard::acquire(&registry.composing).unwrap();
        assert!(matches!(
            registry.compose("weather", &[config.clone()]),
            Err(ComposeError::ConcurrentCompose)
        ));
        drop(held);

        // Releasing the flag makes composition possible again.
        let module = registry.compose("weather", &[config]).unwrap();
        assert_eq!(module.get_u64("BATCH_SIZE"), Some(128));
    }

    #[test]
    fn test_state_restored_after_failed_compose() {
        let dir = TempDir::new().unwrap();
        let good = write_config(&dir, "good.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 128\n");
        let registry = weather_registry();
        let original = registry.import("weather").unwrap();
        let argv_before = registry.argv().snapshot();

        // The second path does not exist, so loading fails after the guard
        // for the flag is held.
        let missing = dir.path().join("missing.cfg");
        let result = registry.compose("weather", &[good.clone(), missing]);
        assert!(matches!(result, Err(ComposeError::Load(_))));

        assert_eq!(registry.argv().snapshot(), argv_before, "argv restored");
        let cached = registry.cached("weather").unwrap();
        assert!(Arc::ptr_eq(&original, &cached), "cache restored");

        // The flag was released, so a new composition succeeds.
        assert!(registry.compose("weather", &[good]).is_ok());
    }

    #[test]
    fn test_configure_no_op_without_flag() {
        let registry = weather_registry();
        let mut ns = Namespace::new("weather");
        ns.set("BATCH_SIZE", json!(64));
        let mut computed = ComputedRegistry::new();

        let applied = registry
            .configure("weather", &mut ns, &mut computed, None)
            .unwrap();
        assert!(applied.is_empty());
        assert_eq!(ns.get("BATCH_SIZE"), Some(&json!(64)));
    }

    #[test]
    fn test_configure_with_explicit_paths() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            &dir,
            "c.cfg",
            "MODULE = \"weather\"\nBATCH_SIZE = 256\nIGNORED = 1\n",
        );
        let registry = weather_registry();
        let mut ns = Namespace::new("weather");
        ns.set("BATCH_SIZE", json!(64));
        let mut computed = ComputedRegistry::new();

        let applied = registry
            .configure("weather", &mut ns, &mut computed, Some(&[config]))
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].target, "weather");
        assert_eq!(ns.get("BATCH_SIZE"), Some(&json!(256)));
        assert!(!ns.contains("IGNORED"));
    }

    #[test]
    fn test_configure_skips_mismatched_target() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            &dir,
            "other.cfg",
            "MODULE = \"climate\"\nBATCH_SIZE = 999\n",
        );
        let registry = weather_registry();
        let mut ns = Namespace::new("weather");
        ns.set("BATCH_SIZE", json!(64));
        let mut computed = ComputedRegistry::new();

        let applied = registry
            .configure("weather", &mut ns, &mut computed, Some(&[config]))
            .unwrap();
        assert!(applied.is_empty(), "mismatched source skipped entirely");
        assert_eq!(ns.get("BATCH_SIZE"), Some(&json!(64)));
    }

    #[test]
    fn test_configure_reads_argv() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "c.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 512\n");
        let registry = Registry::with_args(vec![
            "prog".to_string(),
            "--config".to_string(),
            config.to_string_lossy().to_string(),
        ]);
        registry.register(ModuleDef::new("weather", |ns, _| {
            ns.set("BATCH_SIZE", json!(64));
        }));

        let module = registry.import("weather").unwrap();
        assert_eq!(module.get_u64("BATCH_SIZE"), Some(512));
        assert_eq!(module.sources().len(), 1);
    }
}
