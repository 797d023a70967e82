//! Error types surfaced to callers of the sync layer.

use std::path::PathBuf;

use crate::coordinator::{MutationId, MutationState};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`], for user-visible messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// The server rejected the credential and a refresh did not help.
	AuthExpired,
	/// Renewing the credential failed; the session was cleared.
	AuthRefreshFailed,
	/// Network-level failure.
	Transport,
	/// Local input check failed; nothing was sent.
	Validation,
	/// Server values differed from the optimistic guess. Reported on a
	/// committed outcome, never as an `Err`.
	ConflictOnCommit,
	/// The server reported an error or returned no payload.
	Application,
	/// Session or configuration storage failed.
	Storage,
	/// The mutation machinery itself misbehaved.
	Internal,
}

/// Errors surfaced by the sync layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Sending through the authenticated pipeline failed.
	#[error(transparent)]
	Api(#[from] newsfeed_transport::Error),
	/// The operation succeeded but its result field was `null`.
	#[error("{operation} returned no result")]
	NullPayload {
		/// Operation name.
		operation: String,
	},
	/// An account payload lacked its token or user.
	#[error("{operation} returned a malformed payload: {reason}")]
	MalformedPayload {
		/// Operation name.
		operation: String,
		/// What was wrong.
		reason: String,
	},
	/// The server payload could not be normalized.
	#[error("malformed server payload: {0}")]
	Payload(#[from] newsfeed_cache::Error),
	/// Local input validation failed.
	#[error("{0}")]
	Validation(String),
	/// Session storage failed.
	#[error(transparent)]
	Session(#[from] newsfeed_session::Error),
	/// The configuration file could not be read.
	#[error("failed to read {}: {source}", path.display())]
	ConfigRead {
		/// Config file path.
		path: PathBuf,
		/// Underlying i/o error.
		#[source]
		source: std::io::Error,
	},
	/// The configuration file is not valid TOML for [`FeedConfig`](crate::FeedConfig).
	#[error("failed to parse config: {0}")]
	ConfigParse(#[from] toml::de::Error),
	/// A mutation was asked to move between states it cannot connect.
	#[error("mutation {id}: illegal transition {from:?} -> {to:?}")]
	IllegalTransition {
		/// Mutation id.
		id: MutationId,
		/// Current state.
		from: MutationState,
		/// Requested state.
		to: MutationState,
	},
	/// The mutation task ended without reporting a result.
	#[error("mutation {id} was aborted")]
	Aborted {
		/// Mutation id.
		id: MutationId,
	},
}

impl Error {
	/// Classifies the error.
	pub fn kind(&self) -> ErrorKind {
		use newsfeed_transport::Error as Api;
		match self {
			Self::Api(Api::AuthExpired { .. }) => ErrorKind::AuthExpired,
			Self::Api(Api::AuthRefreshFailed { .. }) => ErrorKind::AuthRefreshFailed,
			Self::Api(Api::Transport(_)) => ErrorKind::Transport,
			Self::Api(_) | Self::NullPayload { .. } | Self::MalformedPayload { .. } | Self::Payload(_) => ErrorKind::Application,
			Self::Validation(_) => ErrorKind::Validation,
			Self::Session(_) | Self::ConfigRead { .. } | Self::ConfigParse(_) => ErrorKind::Storage,
			Self::IllegalTransition { .. } | Self::Aborted { .. } => ErrorKind::Internal,
		}
	}

	/// Shorthand for a [`Error::Validation`].
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::Validation(message.into())
	}
}
