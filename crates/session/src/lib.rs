//! Session state for the newsfeed client.
//!
//! This crate owns the signed-in credential and is the only component allowed
//! to write session state:
//! * [`CredentialStore`]: latest credential, write-through to durable storage
//! * [`KvStore`]: durable key-value collaborator (cookie/local-storage-like)
//! * [`MemoryKvStore`] and [`FileKvStore`]: the two shipped backends
//!
//! The store is shared as a [`Session`] handle that callers pass explicitly;
//! there is no process-global session.

#![warn(missing_docs)]

use std::path::PathBuf;

mod credential;
mod file;
mod kv;

pub use credential::{AUTH_TOKEN_KEY, Credential, CredentialStore, Session, TOKEN_TTL_DAYS, USER_DATA_KEY, UserProfile};
pub use file::{FileKvStore, default_storage_dir};
pub use kv::{Clock, KvStore, MemoryKvStore};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Session storage errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Reading or writing the backing file failed.
	#[error("session storage i/o failed at {}: {source}", path.display())]
	Io {
		/// File the operation targeted.
		path: PathBuf,
		/// Underlying i/o error.
		#[source]
		source: std::io::Error,
	},
	/// A stored document or profile could not be encoded or decoded.
	#[error("session storage is malformed: {0}")]
	Format(#[from] serde_json::Error),
}
