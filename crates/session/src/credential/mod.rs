//! Signed-in credential and its process-wide store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{KvStore, Result};

/// Storage key of the session token.
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Storage key of the serialized user profile.
pub const USER_DATA_KEY: &str = "userData";

/// Default lifetime of a persisted token.
pub const TOKEN_TTL_DAYS: u32 = 7;

/// Profile of the signed-in user, as returned by login/signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
	/// Server user id.
	pub id: String,
	/// Login name.
	pub username: String,
	/// Email address.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Given name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub first_name: Option<String>,
	/// Family name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_name: Option<String>,
}

impl UserProfile {
	/// Creates a profile with only the required fields.
	pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			username: username.into(),
			email: None,
			first_name: None,
			last_name: None,
		}
	}
}

/// A session token together with the user it was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
	/// Bearer token attached to outgoing operations.
	pub token: String,
	/// Owner of the token.
	pub issued_to: UserProfile,
}

impl Credential {
	/// Creates a credential.
	pub fn new(token: impl Into<String>, issued_to: UserProfile) -> Self {
		Self {
			token: token.into(),
			issued_to,
		}
	}
}

/// Shared handle to the session's credential store.
pub type Session = Arc<CredentialStore>;

/// Single source of truth for session state.
///
/// Holds only the latest credential; every mutation writes through to the
/// durable [`KvStore`]. Memory is updated first, so reads always observe the
/// most recent write even when persistence reports an error.
///
/// Each `set`/`clear` bumps a generation counter. Callers that captured the
/// generation before a suspension point can tell whether the credential
/// changed underneath them.
pub struct CredentialStore {
	kv: Arc<dyn KvStore>,
	current: RwLock<Option<Credential>>,
	generation: AtomicU64,
	user_tx: watch::Sender<Option<UserProfile>>,
	token_ttl_days: u32,
}

impl CredentialStore {
	/// Restores session state from `kv`.
	///
	/// A token without a readable profile is treated as signed out and the
	/// leftover entries are removed.
	pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
		Self::open_with_ttl(kv, TOKEN_TTL_DAYS)
	}

	/// Like [`CredentialStore::open`], persisting tokens for `token_ttl_days`.
	pub fn open_with_ttl(kv: Arc<dyn KvStore>, token_ttl_days: u32) -> Result<Self> {
		let restored = restore(kv.as_ref())?;
		if restored.is_none() {
			kv.remove(AUTH_TOKEN_KEY)?;
			kv.remove(USER_DATA_KEY)?;
		}
		let user = restored.as_ref().map(|c| c.issued_to.clone());
		debug!(signed_in = restored.is_some(), "session.open");
		Ok(Self {
			kv,
			current: RwLock::new(restored),
			generation: AtomicU64::new(0),
			user_tx: watch::Sender::new(user),
			token_ttl_days,
		})
	}

	/// Opens the store and wraps it in a shareable [`Session`].
	pub fn shared(kv: Arc<dyn KvStore>) -> Result<Session> {
		Self::open(kv).map(Arc::new)
	}

	/// Returns the latest credential.
	pub fn get(&self) -> Option<Credential> {
		self.current.read().clone()
	}

	/// Returns the latest token.
	pub fn token(&self) -> Option<String> {
		self.current.read().as_ref().map(|c| c.token.clone())
	}

	/// Returns the signed-in user.
	pub fn user(&self) -> Option<UserProfile> {
		self.current.read().as_ref().map(|c| c.issued_to.clone())
	}

	/// Returns `true` while a credential is held.
	pub fn is_authenticated(&self) -> bool {
		self.current.read().is_some()
	}

	/// Generation of the current credential. Changes on every `set`/`clear`.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	/// Subscribes to signed-in user changes.
	pub fn subscribe(&self) -> watch::Receiver<Option<UserProfile>> {
		self.user_tx.subscribe()
	}

	/// Replaces the credential (login, signup).
	///
	/// The in-memory credential is replaced before it is persisted, so an
	/// `Err` means only the stored copy is stale: the session is signed in
	/// until the process exits.
	pub fn set(&self, credential: Credential) -> Result<()> {
		let profile = credential.issued_to.clone();
		let token = credential.token.clone();
		*self.current.write() = Some(credential);
		self.bump();
		self.user_tx.send_replace(Some(profile.clone()));
		info!(user = %profile.username, "session.set");
		self.persist(&token, Some(&profile))
	}

	/// Swaps in a refreshed token for the current user.
	///
	/// Returns `None` without writing when the session was cleared in the
	/// meantime; a refresh must never resurrect a signed-out session.
	pub fn replace_token(&self, token: impl Into<String>) -> Result<Option<Credential>> {
		let token = token.into();
		let updated = {
			let mut current = self.current.write();
			let Some(credential) = current.as_mut() else {
				return Ok(None);
			};
			credential.token = token.clone();
			credential.clone()
		};
		self.bump();
		debug!(user = %updated.issued_to.username, "session.token.replaced");
		self.persist(&token, None)?;
		Ok(Some(updated))
	}

	/// Drops the credential and both persisted entries (logout, failed refresh).
	pub fn clear(&self) -> Result<()> {
		let had = self.current.write().take().is_some();
		self.bump();
		self.user_tx.send_replace(None);
		if had {
			info!("session.cleared");
		}
		let token = self.kv.remove(AUTH_TOKEN_KEY);
		let user = self.kv.remove(USER_DATA_KEY);
		token.and(user)
	}

	fn bump(&self) {
		self.generation.fetch_add(1, Ordering::AcqRel);
	}

	fn persist(&self, token: &str, profile: Option<&UserProfile>) -> Result<()> {
		self.kv.set(AUTH_TOKEN_KEY, token, Some(self.token_ttl_days))?;
		if let Some(profile) = profile {
			let encoded = serde_json::to_string(profile)?;
			self.kv.set(USER_DATA_KEY, &encoded, None)?;
		}
		Ok(())
	}
}

impl std::fmt::Debug for CredentialStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CredentialStore")
			.field("signed_in", &self.is_authenticated())
			.field("generation", &self.generation())
			.finish_non_exhaustive()
	}
}

fn restore(kv: &dyn KvStore) -> Result<Option<Credential>> {
	let Some(token) = kv.get(AUTH_TOKEN_KEY)? else {
		return Ok(None);
	};
	let Some(raw) = kv.get(USER_DATA_KEY)? else {
		return Ok(None);
	};
	match serde_json::from_str::<UserProfile>(&raw) {
		Ok(profile) => Ok(Some(Credential::new(token, profile))),
		Err(err) => {
			warn!(error = %err, "session.profile.corrupt");
			Ok(None)
		}
	}
}
