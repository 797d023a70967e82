//! File-backed [`KvStore`].
//!
//! All entries live in one JSON document. Every write replaces the document
//! atomically (temp file + rename) so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::kv::{KvStore, expiry};
use crate::{Error, Result};

const DOCUMENT_NAME: &str = "session.json";

/// Returns the platform data directory for session files, if one exists.
pub fn default_storage_dir() -> Option<PathBuf> {
	dirs::data_dir().map(|dir| dir.join("newsfeed"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
	value: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	expires_at: Option<DateTime<Utc>>,
}

type Document = BTreeMap<String, StoredEntry>;

/// [`KvStore`] persisting to `<dir>/session.json`.
#[derive(Debug)]
pub struct FileKvStore {
	path: PathBuf,
	/// Serializes read-modify-write cycles within the process.
	lock: Mutex<()>,
}

impl FileKvStore {
	/// Opens (creating the directory if needed) the store rooted at `dir`.
	pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
		let dir = dir.as_ref();
		std::fs::create_dir_all(dir).map_err(|source| Error::Io {
			path: dir.to_path_buf(),
			source,
		})?;
		Ok(Self {
			path: dir.join(DOCUMENT_NAME),
			lock: Mutex::new(()),
		})
	}

	/// Path of the backing document.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load(&self) -> Result<Document> {
		let bytes = match std::fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Document::new()),
			Err(source) => {
				return Err(Error::Io {
					path: self.path.clone(),
					source,
				});
			}
		};
		match serde_json::from_slice(&bytes) {
			Ok(doc) => Ok(doc),
			Err(err) => {
				warn!(path = %self.path.display(), error = %err, "session.file.corrupt");
				Ok(Document::new())
			}
		}
	}

	fn save(&self, doc: &Document) -> Result<()> {
		let tmp = self.path.with_extension("json.tmp");
		let bytes = serde_json::to_vec_pretty(doc)?;
		std::fs::write(&tmp, bytes).map_err(|source| Error::Io { path: tmp.clone(), source })?;
		std::fs::rename(&tmp, &self.path).map_err(|source| Error::Io {
			path: self.path.clone(),
			source,
		})
	}
}

impl KvStore for FileKvStore {
	fn get(&self, key: &str) -> Result<Option<String>> {
		let _guard = self.lock.lock();
		let mut doc = self.load()?;
		let now = Utc::now();
		match doc.get(key) {
			Some(entry) if entry.expires_at.is_some_and(|at| at <= now) => {
				debug!(key, "session.file.expired");
				doc.remove(key);
				self.save(&doc)?;
				Ok(None)
			}
			Some(entry) => Ok(Some(entry.value.clone())),
			None => Ok(None),
		}
	}

	fn set(&self, key: &str, value: &str, ttl_days: Option<u32>) -> Result<()> {
		let _guard = self.lock.lock();
		let mut doc = self.load()?;
		doc.insert(
			key.to_string(),
			StoredEntry {
				value: value.to_string(),
				expires_at: expiry(Utc::now(), ttl_days),
			},
		);
		self.save(&doc)
	}

	fn remove(&self, key: &str) -> Result<()> {
		let _guard = self.lock.lock();
		let mut doc = self.load()?;
		if doc.remove(key).is_some() {
			self.save(&doc)?;
		}
		Ok(())
	}
}
