//! Per-path advisory lock, distinct from `utils::lock::FileLock`'s
//! whole-directory lockfile: the orchestrator needs independent locks on
//! many paths at once, held for the duration of a single local-event or
//! inbound-delta pipeline run (spec.md §4.5 steps "Lock" / "Release lock").
//!
//! Grounded on the teacher's `utils::lock` polling-backoff idiom, generalized
//! from one global lock to a `HashMap<PathBuf, _>` of independent ones
//! (spec.md §5: "`locker.acquire` (polling flock with 10ms backoff up to
//! configured timeout)").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StateError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lock mode requested (spec.md §4.5 only ever takes `Write`, but the type
/// exists so a future reader-path doesn't need a new primitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
	Read,
	Write,
}

/// Holds the per-path lock for as long as it's alive; dropping it releases
/// the path for the next waiter.
pub struct PathGuard {
	_guard: OwnedMutexGuard<()>,
}

/// Registry of per-path advisory locks, lazily created on first use and
/// never removed (a long-lived node touches a bounded working set of paths).
#[derive(Default)]
pub struct PathLocker {
	locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocker {
	pub fn new() -> Self {
		Self::default()
	}

	async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock().await;
		locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
	}

	/// Acquire the lock for `path`, polling at `POLL_INTERVAL` until either
	/// it becomes free or `timeout` elapses (spec.md §5).
	pub async fn acquire(
		&self,
		path: &Path,
		_mode: LockMode,
		timeout: Duration,
	) -> Result<PathGuard, StateError> {
		let lock = self.lock_for(path).await;
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			if let Ok(guard) = lock.clone().try_lock_owned() {
				return Ok(PathGuard { _guard: guard });
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(StateError::LockFailed {
					message: format!("timed out acquiring lock for {}", path.display()),
				});
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn acquire_then_release_allows_reacquire() {
		let locker = PathLocker::new();
		let path = PathBuf::from("a/b.txt");
		{
			let _guard = locker.acquire(&path, LockMode::Write, Duration::from_secs(1)).await.unwrap();
		}
		let _guard2 = locker.acquire(&path, LockMode::Write, Duration::from_secs(1)).await.unwrap();
	}

	#[tokio::test]
	async fn concurrent_acquire_times_out() {
		let locker = PathLocker::new();
		let path = PathBuf::from("contended.txt");
		let _held = locker.acquire(&path, LockMode::Write, Duration::from_secs(1)).await.unwrap();

		let result = locker.acquire(&path, LockMode::Write, Duration::from_millis(30)).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn independent_paths_dont_contend() {
		let locker = PathLocker::new();
		let _a = locker.acquire(Path::new("a.txt"), LockMode::Write, Duration::from_millis(50)).await.unwrap();
		let _b = locker.acquire(Path::new("b.txt"), LockMode::Write, Duration::from_millis(50)).await.unwrap();
	}
}
