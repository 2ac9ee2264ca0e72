//! Computed attributes.
//!
//! A computed attribute wraps a producer that is invoked on demand when the
//! attribute is read. Lifecycle: UNBOUND → BOUND → CACHED. Binding happens
//! exactly once; the CACHED state is reached only when `memoize` is set, in
//! which case the producer runs once and every later read returns the
//! stored value. Without `memoize` the producer runs on every read.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde_json::Value;
use strata_script::{eval, Expr, Host, Scope, ScriptError};
use thiserror::Error;

/// Evaluation lifecycle of a [`ComputedAttr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    /// Constructed, no producer bound yet.
    Unbound,
    /// Producer bound, not yet evaluated (or not memoized).
    Bound,
    /// Memoized value stored; the producer will not run again.
    Cached,
}

/// Errors from computed-attribute operations.
#[derive(Debug, Error)]
pub enum ComputedError {
    #[error("computed attribute is already bound to a producer")]
    AlreadyBound,

    #[error("computed attribute was evaluated before a producer was bound")]
    NotBound,

    #[error(transparent)]
    Eval(#[from] ScriptError),
}

/// The function a computed attribute invokes to produce its value.
///
/// Script producers hold the captured expression plus the host that
/// provides `sweep`/`env` for it; native producers are Rust closures used
/// by programmatically registered defaults. Both read the owning module's
/// attributes through a [`Scope`] at evaluation time.
pub enum Producer {
    Expr {
        expr: Expr,
        host: Arc<dyn Host>,
    },
    Native(Box<dyn Fn(&dyn Scope) -> Result<Value, ComputedError> + Send + Sync>),
}

impl Producer {
    fn invoke(&self, view: &dyn Scope) -> Result<Value, ComputedError> {
        match self {
            Producer::Expr { expr, host } => Ok(eval(expr, view, host.as_ref())?),
            Producer::Native(f) => f(view),
        }
    }
}

/// A lazily evaluated, optionally memoized attribute.
pub struct ComputedAttr {
    memoize: bool,
    producer: OnceLock<Producer>,
    cache: Mutex<Option<Value>>,
}

impl ComputedAttr {
    /// Create an unbound wrapper. `memoize` controls whether the first
    /// evaluation caches its result.
    pub fn new(memoize: bool) -> Self {
        Self {
            memoize,
            producer: OnceLock::new(),
            cache: Mutex::new(None),
        }
    }

    /// Create a wrapper already bound to a captured script expression.
    pub fn from_expr(memoize: bool, expr: Expr, host: Arc<dyn Host>) -> Self {
        let attr = Self::new(memoize);
        // A fresh OnceLock cannot already be set.
        let _ = attr.producer.set(Producer::Expr { expr, host });
        attr
    }

    /// Create a wrapper already bound to a native closure.
    pub fn from_fn<F>(memoize: bool, f: F) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value, ComputedError> + Send + Sync + 'static,
    {
        let attr = Self::new(memoize);
        let _ = attr.producer.set(Producer::Native(Box::new(f)));
        attr
    }

    /// Bind the producer. Allowed exactly once.
    pub fn bind(&self, producer: Producer) -> Result<(), ComputedError> {
        self.producer
            .set(producer)
            .map_err(|_| ComputedError::AlreadyBound)
    }

    pub fn memoize(&self) -> bool {
        self.memoize
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EvalState {
        if self.cached_value().is_some() {
            EvalState::Cached
        } else if self.producer.get().is_some() {
            EvalState::Bound
        } else {
            EvalState::Unbound
        }
    }

    fn cached_value(&self) -> Option<Value> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evaluate the attribute against `view`.
    ///
    /// Returns the cached value when one is stored; otherwise invokes the
    /// producer, caching the result first when `memoize` is set. The
    /// producer is not invoked while any internal lock is held, so a
    /// producer may itself read other computed attributes.
    pub fn evaluate(&self, view: &dyn Scope) -> Result<Value, ComputedError> {
        if let Some(value) = self.cached_value() {
            return Ok(value);
        }
        let producer = self.producer.get().ok_or(ComputedError::NotBound)?;
        let value = producer.invoke(view)?;
        if self.memoize {
            *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        }
        Ok(value)
    }
}

impl fmt::Debug for ComputedAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAttr")
            .field("memoize", &self.memoize)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_producer(counter: Arc<AtomicUsize>) -> Producer {
        Producer::Native(Box::new(move |view| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(view.lookup("BASE")?.unwrap_or(json!(0)))
        }))
    }

    fn scope_with_base(value: Value) -> BTreeMap<String, Value> {
        let mut scope = BTreeMap::new();
        scope.insert("BASE".to_string(), value);
        scope
    }

    #[test]
    fn test_state_transitions() {
        let attr = ComputedAttr::new(true);
        assert_eq!(attr.state(), EvalState::Unbound);

        attr.bind(counting_producer(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        assert_eq!(attr.state(), EvalState::Bound);

        attr.evaluate(&scope_with_base(json!(5))).unwrap();
        assert_eq!(attr.state(), EvalState::Cached);
    }

    #[test]
    fn test_bind_exactly_once() {
        let attr = ComputedAttr::new(false);
        attr.bind(counting_producer(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let second = attr.bind(counting_producer(Arc::new(AtomicUsize::new(0))));
        assert!(matches!(second, Err(ComputedError::AlreadyBound)));
    }

    #[test]
    fn test_evaluate_unbound_fails() {
        let attr = ComputedAttr::new(true);
        let result = attr.evaluate(&scope_with_base(json!(1)));
        assert!(matches!(result, Err(ComputedError::NotBound)));
    }

    #[test]
    fn test_memoized_evaluates_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let attr = ComputedAttr::new(true);
        attr.bind(counting_producer(counter.clone())).unwrap();

        assert_eq!(attr.evaluate(&scope_with_base(json!(1))).unwrap(), json!(1));
        // The dependency changed, but the cached value wins.
        assert_eq!(attr.evaluate(&scope_with_base(json!(2))).unwrap(), json!(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unmemoized_reevaluates() {
        let counter = Arc::new(AtomicUsize::new(0));
        let attr = ComputedAttr::new(false);
        attr.bind(counting_producer(counter.clone())).unwrap();

        assert_eq!(attr.evaluate(&scope_with_base(json!(1))).unwrap(), json!(1));
        assert_eq!(attr.evaluate(&scope_with_base(json!(2))).unwrap(), json!(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(attr.state(), EvalState::Bound);
    }

    #[test]
    fn test_from_expr_is_bound() {
        let expr = match strata_script::parse("X = BASE").unwrap().stmts.remove(0) {
            strata_script::Stmt::Assign { expr, .. } => expr,
            other => panic!("expected assignment, got {:?}", other),
        };
        let attr = ComputedAttr::from_expr(false, expr, Arc::new(strata_script::NoHost));
        assert_eq!(attr.state(), EvalState::Bound);
        assert_eq!(attr.evaluate(&scope_with_base(json!(7))).unwrap(), json!(7));
    }
}
