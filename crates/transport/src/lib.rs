//! Outgoing operation pipeline for the newsfeed client.
//!
//! * [`Operation`] / [`Response`]: the query-API wire model, opaque to callers
//! * [`Transport`]: the network collaborator
//! * [`AuthFailurePolicy`]: decides which responses are authentication failures
//! * [`RefreshEndpoint`]: renews an expired token
//! * [`AuthInterceptor`]: attaches the session credential to every operation and
//!   recovers from one authentication failure by refreshing (single-flight) and
//!   resending once
//!
//! ## Cargo features
//!
//! - `http`: [`HttpTransport`] over `reqwest`. *Disabled by default.*

#![warn(missing_docs)]

mod interceptor;
mod operation;
mod policy;
mod refresh;
mod transport;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use interceptor::{AuthInterceptor, RefreshOutcome};
pub use operation::{ApiError, ApiErrorExtensions, Headers, Operation, Response};
pub use policy::AuthFailurePolicy;
pub use refresh::{OperationRefresh, REFRESH_TOKEN_DOCUMENT, RefreshEndpoint, RefreshError};
pub use transport::{Transport, TransportError};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by [`AuthInterceptor::send`].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The server rejected the credential and no refresh could help: either
	/// no credential was attached, or the retry after a refresh was rejected
	/// again.
	#[error("not authenticated: {message}")]
	AuthExpired {
		/// Message of the rejecting error.
		message: String,
	},
	/// Renewing the credential failed; the session has been cleared.
	#[error("not authenticated: {message} (refresh failed: {reason})")]
	AuthRefreshFailed {
		/// Message of the original authentication error.
		message: String,
		/// Why the refresh failed.
		reason: String,
	},
	/// Network-level failure.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The server reported non-authentication errors.
	#[error("{operation} failed: {}", join_messages(errors))]
	Application {
		/// Operation name.
		operation: String,
		/// Errors reported by the server.
		errors: Vec<ApiError>,
	},
}

fn join_messages(errors: &[ApiError]) -> String {
	errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
}
