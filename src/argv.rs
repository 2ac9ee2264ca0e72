//! Process argument vector.
//!
//! Composition needs code paths that read `--config` from the command line
//! to observe the session's sources, so the registry owns an explicit
//! argument vector rather than ambient global state. Splicing is scoped: a
//! guard appends `--config <paths…>` and truncates back to the original
//! length when dropped, on every exit path.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::loader::LoadError;

/// Errors from argument-vector operations.
#[derive(Debug, Error)]
pub enum ArgvError {
    #[error("--config must not already be set in the process argument vector")]
    ConfigFlagPresent,
}

/// A mutable copy of the process argument vector.
#[derive(Debug, Default)]
pub struct ArgVector {
    args: Mutex<Vec<String>>,
}

impl ArgVector {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args: Mutex::new(args),
        }
    }

    /// Seed from the real process arguments.
    pub fn from_env() -> Self {
        Self::new(std::env::args().collect())
    }

    /// A copy of the current arguments.
    pub fn snapshot(&self) -> Vec<String> {
        self.args
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Extract the `--config` path list, if the flag is present with at
    /// least one path. Paths run from the token after the flag up to the
    /// next `--`-prefixed token. Each named file must exist.
    pub fn config_paths(&self) -> Result<Option<Vec<PathBuf>>, LoadError> {
        config_paths_in(&self.snapshot())
    }

    /// Append `--config <paths…>`, returning a guard that truncates the
    /// vector back to its pre-splice length on drop.
    pub fn splice_config<'a>(
        &'a self,
        paths: &[PathBuf],
    ) -> Result<SpliceGuard<'a>, ArgvError> {
        let mut args = self.args.lock().unwrap_or_else(PoisonError::into_inner);
        if args.iter().any(|a| a == "--config") {
            return Err(ArgvError::ConfigFlagPresent);
        }
        let original_len = args.len();
        args.push("--config".to_string());
        for path in paths {
            args.push(path.to_string_lossy().to_string());
        }
        Ok(SpliceGuard {
            vector: self,
            original_len,
        })
    }
}

/// Scan an argument slice for `--config` and collect the paths that follow.
pub fn config_paths_in(args: &[String]) -> Result<Option<Vec<PathBuf>>, LoadError> {
    let index = match args.iter().position(|a| a == "--config") {
        Some(index) => index,
        None => return Ok(None),
    };

    let mut paths = Vec::new();
    for arg in &args[index + 1..] {
        if arg.starts_with("--") {
            break;
        }
        let path = PathBuf::from(arg);
        if !path.is_file() {
            return Err(LoadError::SourceNotFound(path));
        }
        paths.push(path);
    }

    if paths.is_empty() {
        Ok(None)
    } else {
        Ok(Some(paths))
    }
}

/// Restores the argument vector to its pre-splice length.
#[must_use = "dropping the guard immediately undoes the splice"]
pub struct SpliceGuard<'a> {
    vector: &'a ArgVector,
    original_len: usize,
}

impl Drop for SpliceGuard<'_> {
    fn drop(&mut self) {
        let mut args = self
            .vector
            .args
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        args.truncate(self.original_len);
    }
}
