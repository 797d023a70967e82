//! Durable key-value collaborator contract and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::Result;

/// Durable string key-value storage surviving restarts (cookie/local-storage-like).
///
/// Implementations must be safe to share between tasks. A `ttl_days` of `None`
/// keeps the entry until it is removed.
pub trait KvStore: Send + Sync {
	/// Returns the stored value, or `None` when absent or expired.
	fn get(&self, key: &str) -> Result<Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set(&self, key: &str, value: &str, ttl_days: Option<u32>) -> Result<()>;

	/// Removes `key`. Removing an absent key is not an error.
	fn remove(&self, key: &str) -> Result<()>;
}

/// Time source used for entry expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub(crate) fn expiry(now: DateTime<Utc>, ttl_days: Option<u32>) -> Option<DateTime<Utc>> {
	ttl_days.map(|days| now + Duration::days(i64::from(days)))
}

#[derive(Debug, Clone)]
struct Entry {
	value: String,
	expires_at: Option<DateTime<Utc>>,
}

/// Process-local [`KvStore`], used in tests and for ephemeral sessions.
pub struct MemoryKvStore {
	entries: Mutex<HashMap<String, Entry>>,
	clock: Clock,
}

impl MemoryKvStore {
	/// Creates an empty store using the wall clock.
	pub fn new() -> Self {
		Self::with_clock(Arc::new(Utc::now))
	}

	/// Creates an empty store with an injected clock.
	pub fn with_clock(clock: Clock) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			clock,
		}
	}

	/// Number of live (unexpired) entries.
	pub fn len(&self) -> usize {
		let now = (self.clock)();
		self.entries
			.lock()
			.values()
			.filter(|e| e.expires_at.is_none_or(|at| at > now))
			.count()
	}

	/// Returns `true` when no live entries remain.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for MemoryKvStore {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MemoryKvStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryKvStore").field("entries", &self.entries.lock().len()).finish_non_exhaustive()
	}
}

impl KvStore for MemoryKvStore {
	fn get(&self, key: &str) -> Result<Option<String>> {
		let now = (self.clock)();
		let mut entries = self.entries.lock();
		match entries.get(key) {
			Some(entry) if entry.expires_at.is_some_and(|at| at <= now) => {
				entries.remove(key);
				Ok(None)
			}
			Some(entry) => Ok(Some(entry.value.clone())),
			None => Ok(None),
		}
	}

	fn set(&self, key: &str, value: &str, ttl_days: Option<u32>) -> Result<()> {
		let expires_at = expiry((self.clock)(), ttl_days);
		self.entries.lock().insert(
			key.to_string(),
			Entry {
				value: value.to_string(),
				expires_at,
			},
		);
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.entries.lock().remove(key);
		Ok(())
	}
}
