//! Grid-search sweep tracker.
//!
//! Persists an index into the Cartesian product of sweep axes and advances
//! it atomically across processes. The progress file holds a single decimal
//! integer; a co-located `<file>.lock` advisory lock serializes the
//! read-modify-write. Combinations follow odometer ordering: the last axis
//! varies fastest.

mod lock;

pub use lock::{LockError, SweepLock};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// How long to wait for the progress-file lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from advancing a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep requires at least one axis and no empty axes")]
    EmptyAxes,

    #[error("sweep over {total} combinations is exhausted")]
    Exhausted { total: u64 },

    #[error("sweep has too many combinations to track")]
    Overflow,

    #[error("progress file {path} is corrupt: {reason}")]
    CorruptProgress { path: PathBuf, reason: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Total number of combinations across `axes`.
pub fn combination_count(axes: &[Vec<Value>]) -> Result<u64, SweepError> {
    if axes.is_empty() || axes.iter().any(Vec::is_empty) {
        return Err(SweepError::EmptyAxes);
    }
    axes.iter()
        .try_fold(1u64, |acc, axis| acc.checked_mul(axis.len() as u64))
        .ok_or(SweepError::Overflow)
}

/// The combination at `index` in odometer order: the value for axis `a` is
/// `axes[a][(index / stride(a)) % len(a)]` where `stride(a)` is the product
/// of the lengths of the axes after `a`.
pub fn combination(axes: &[Vec<Value>], index: u64) -> Vec<Value> {
    let mut values = Vec::with_capacity(axes.len());
    let mut stride: u64 = axes.iter().map(|axis| axis.len() as u64).product();
    for axis in axes {
        stride /= axis.len() as u64;
        let position = ((index / stride) % axis.len() as u64) as usize;
        values.push(axis[position].clone());
    }
    values
}

/// Advance the sweep at `progress_file` and return the combination for the
/// current process.
///
/// Acquires the co-located advisory lock for the whole read-modify-write:
/// concurrent callers each receive a distinct, monotonically increasing
/// index. A missing progress file reads as zero. Once every combination has
/// been handed out, further calls fail with [`SweepError::Exhausted`] and
/// leave the progress file untouched.
pub fn advance(progress_file: &Path, axes: &[Vec<Value>]) -> Result<Vec<Value>, SweepError> {
    let total = combination_count(axes)?;

    let _lock = SweepLock::acquire(&lock_path(progress_file), LOCK_TIMEOUT)?;

    let progress = read_progress(progress_file)?;
    if progress >= total {
        return Err(SweepError::Exhausted { total });
    }

    fs::write(progress_file, format!("{}", progress + 1))?;

    Ok(combination(axes, progress))
}

/// The lock file co-located with a progress file.
pub fn lock_path(progress_file: &Path) -> PathBuf {
    let mut name = progress_file.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn read_progress(progress_file: &Path) -> Result<u64, SweepError> {
    if !progress_file.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(progress_file)?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| SweepError::CorruptProgress {
            path: progress_file.to_path_buf(),
            reason: e.to_string(),
        })
}
