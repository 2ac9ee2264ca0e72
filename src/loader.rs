//! Source loader.
//!
//! Loads a configuration source file into an isolated set of bindings.
//! Every call parses and executes the script from scratch; nothing is
//! cached, so two loads of the same path in one process are fully
//! independent and load-time effects (a `sweep` call deciding the
//! source's own values) happen on every load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use strata_script::{eval, Host, HostError, ScriptError, Stmt};
use thiserror::Error;

use crate::computed::ComputedAttr;
use crate::sweep;

/// Errors from loading a configuration source.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration source {0} does not exist")]
    SourceNotFound(PathBuf),

    #[error("configuration source {0} does not declare MODULE as a string")]
    MissingTargetDeclaration(PathBuf),

    #[error("configuration source {path} is not valid UTF-8")]
    InvalidUtf8 { path: PathBuf },

    #[error("{path}: {source}")]
    Script {
        path: PathBuf,
        source: ScriptError,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One attribute binding produced by a source.
#[derive(Debug, Clone)]
pub enum SourceBinding {
    /// A plain value, evaluated at load time.
    Plain(Value),
    /// A computed attribute, captured unevaluated.
    Computed(Arc<ComputedAttr>),
}

/// A loaded configuration source: its declared target plus bindings in
/// source order. Discarded after the merge that consumes it.
#[derive(Debug, Clone)]
pub struct Source {
    path: PathBuf,
    target: String,
    digest: String,
    bindings: Vec<(String, SourceBinding)>,
}

impl Source {
    /// The file this source was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The target module name declared by the required `MODULE` binding.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// SHA-256 digest of the raw source bytes, hex encoded.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Bindings in source order, metadata excluded.
    pub fn bindings(&self) -> impl Iterator<Item = &(String, SourceBinding)> {
        self.bindings.iter()
    }

    /// Provenance record for this source.
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            path: self.path.to_string_lossy().to_string(),
            target: self.target.clone(),
            digest: self.digest.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(target: &str, bindings: Vec<(String, SourceBinding)>) -> Self {
        Self {
            path: PathBuf::from("<test>"),
            target: target.to_string(),
            digest: String::new(),
            bindings,
        }
    }
}

/// Provenance for one contributing source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// File path as supplied by the caller.
    pub path: String,
    /// Declared target module name.
    pub target: String,
    /// SHA-256 digest of raw file bytes.
    pub digest: String,
}

/// Host functions available to configuration scripts.
///
/// `sweep(progress_file, axis…)` advances the grid-search tracker; a
/// relative progress path resolves against the script's own directory.
/// `env(name)` reads a process environment variable.
struct LoaderHost {
    dir: PathBuf,
}

impl Host for LoaderHost {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, HostError> {
        match name {
            "sweep" => self.sweep(args),
            "env" => self.env(args),
            _ => Err(HostError::Unknown),
        }
    }
}

impl LoaderHost {
    fn sweep(&self, args: Vec<Value>) -> Result<Value, HostError> {
        let mut args = args.into_iter();
        let progress = match args.next() {
            Some(Value::String(path)) => path,
            _ => {
                return Err(HostError::Failed(
                    "sweep() requires a progress file path as its first argument".to_string(),
                ))
            }
        };
        let mut axes = Vec::new();
        for arg in args {
            match arg {
                Value::Array(items) => axes.push(items),
                other => {
                    return Err(HostError::Failed(format!(
                        "sweep() axes must be lists, got {}",
                        other
                    )))
                }
            }
        }
        let progress_path = self.resolve(Path::new(&progress));
        let combination = sweep::advance(&progress_path, &axes)
            .map_err(|e| HostError::Failed(e.to_string()))?;
        Ok(Value::Array(combination))
    }

    fn env(&self, args: Vec<Value>) -> Result<Value, HostError> {
        match args.as_slice() {
            [Value::String(name)] => std::env::var(name)
                .map(Value::String)
                .map_err(|_| HostError::Failed(format!("environment variable '{}' is not set", name))),
            _ => Err(HostError::Failed(
                "env() requires a single variable name".to_string(),
            )),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

/// Load the configuration source at `path`.
pub fn load(path: &Path) -> Result<Source, LoadError> {
    if !path.is_file() {
        return Err(LoadError::SourceNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let text = String::from_utf8(bytes).map_err(|_| LoadError::InvalidUtf8 {
        path: path.to_path_buf(),
    })?;

    let script = strata_script::parse(&text).map_err(|source| LoadError::Script {
        path: path.to_path_buf(),
        source,
    })?;

    let host: Arc<dyn Host> = Arc::new(LoaderHost {
        dir: path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    });

    let mut scope: BTreeMap<String, Value> = BTreeMap::new();
    let mut bindings: Vec<(String, SourceBinding)> = Vec::new();
    let mut target: Option<String> = None;

    let wrap = |source: ScriptError| LoadError::Script {
        path: path.to_path_buf(),
        source,
    };

    for stmt in script.stmts {
        match stmt {
            Stmt::Assign { name, expr, .. } => {
                let value = eval(&expr, &scope, host.as_ref()).map_err(wrap)?;
                if name == "MODULE" {
                    match &value {
                        Value::String(s) => target = Some(s.clone()),
                        _ => return Err(LoadError::MissingTargetDeclaration(path.to_path_buf())),
                    }
                } else {
                    bindings.push((name.clone(), SourceBinding::Plain(value.clone())));
                }
                scope.insert(name, value);
            }
            Stmt::Computed {
                name,
                memoize,
                expr,
                ..
            } => {
                let attr = ComputedAttr::from_expr(memoize, expr, host.clone());
                bindings.push((name, SourceBinding::Computed(Arc::new(attr))));
            }
            Stmt::TupleAssign { names, expr, line } => {
                let value = eval(&expr, &scope, host.as_ref()).map_err(wrap)?;
                let items = match value {
                    Value::Array(items) if items.len() == names.len() => items,
                    Value::Array(items) => {
                        return Err(wrap(ScriptError::Type(format!(
                            "line {}: expected {} values to unpack, got {}",
                            line,
                            names.len(),
                            items.len()
                        ))))
                    }
                    _ => {
                        return Err(wrap(ScriptError::Type(format!(
                            "line {}: only a list can be unpacked into multiple names",
                            line
                        ))))
                    }
                };
                for (name, item) in names.into_iter().zip(items) {
                    bindings.push((name.clone(), SourceBinding::Plain(item.clone())));
                    scope.insert(name, item);
                }
            }
        }
    }

    let target = target.ok_or_else(|| LoadError::MissingTargetDeclaration(path.to_path_buf()))?;
    Ok(Source {
        path: path.to_path_buf(),
        target,
        digest,
        bindings,
    })
}
