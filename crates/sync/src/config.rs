//! Client configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use newsfeed_session::TOKEN_TTL_DAYS;
use newsfeed_transport::AuthFailurePolicy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Client configuration.
///
/// Every field has a default, so a partial file only overrides what it names:
///
/// ```toml
/// endpoint = "https://news.example/graphql/"
/// request_timeout_secs = 10
///
/// [auth]
/// codes = ["UNAUTHENTICATED"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
	/// Query API endpoint.
	pub endpoint: String,
	/// Authorization scheme prefixed to the token.
	pub auth_scheme: String,
	/// Lifetime of the persisted token, in days.
	pub token_ttl_days: u32,
	/// Per-request timeout, in seconds.
	pub request_timeout_secs: u64,
	/// Directory of the session file; the platform data directory when unset.
	pub storage_dir: Option<PathBuf>,
	/// Authentication-failure classification.
	pub auth: AuthFailurePolicy,
}

impl Default for FeedConfig {
	fn default() -> Self {
		Self {
			endpoint: "http://localhost:8000/graphql/".into(),
			auth_scheme: "JWT".into(),
			token_ttl_days: TOKEN_TTL_DAYS,
			request_timeout_secs: 30,
			storage_dir: None,
			auth: AuthFailurePolicy::default(),
		}
	}
}

impl FeedConfig {
	/// Parses a TOML document.
	pub fn from_toml(text: &str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml(&text)
	}

	/// Default location of the config file: `<config dir>/newsfeed/config.toml`.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("newsfeed").join("config.toml"))
	}

	/// Request timeout as a [`Duration`].
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	/// Session storage directory, falling back to the platform data directory.
	pub fn storage_dir(&self) -> Option<PathBuf> {
		self.storage_dir.clone().or_else(newsfeed_session::default_storage_dir)
	}
}
