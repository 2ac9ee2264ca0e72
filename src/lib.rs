//! Strata - layered experiment configuration.
//!
//! A registered target module's attributes act as configuration defaults;
//! external configuration sources, written as small trusted scripts,
//! override them by name in a deterministic last-wins order. Computed
//! attributes are evaluated lazily against the composed namespace, and a
//! durable grid-search tracker hands out sweep combinations across
//! repeated, possibly concurrent, runs.
//!
//! The pieces:
//!
//! - [`loader`]: loads a source file into an isolated set of bindings
//! - [`computed`]: lazily evaluated, optionally memoized attributes
//! - [`merge`]: folds override sources onto a defaults namespace
//! - [`modules`] and [`compose`]: the module registry, cache, and the
//!   isolated composition session over them
//! - [`sweep`]: the file-locked grid-search progress tracker
//! - [`args`] and [`argv`]: the `--config` command-line surface

pub mod args;
pub mod argv;
pub mod compose;
pub mod computed;
pub mod loader;
pub mod merge;
pub mod modules;
pub mod namespace;
pub mod sweep;

pub use argv::{ArgVector, ArgvError};
pub use compose::ComposeError;
pub use computed::{ComputedAttr, ComputedError, EvalState, Producer};
pub use loader::{load, LoadError, Source, SourceBinding, SourceInfo};
pub use merge::{apply_source, apply_sources, RESERVED_NAMES};
pub use modules::{ComposedModule, ModuleDef, ModuleError, Registry};
pub use namespace::{ComputedRegistry, Namespace};
pub use sweep::{LockError, SweepError, SweepLock};
