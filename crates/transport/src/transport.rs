//! Network collaborator contract.

use async_trait::async_trait;

use crate::{Headers, Operation, Response};

/// Network-level failures. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
	/// The server could not be reached.
	#[error("connection failed: {0}")]
	Connect(String),
	/// The request exceeded its deadline.
	#[error("request timed out")]
	Timeout,
	/// The server answered with a non-success status and no decodable body.
	#[error("server returned status {status}: {body}")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Raw response body.
		body: String,
	},
	/// The response body was not a valid response document.
	#[error("undecodable response: {0}")]
	Decode(String),
}

/// Executes operations against the remote API.
///
/// Implementations treat the operation as opaque and report server-side
/// errors inside [`Response::errors`]; only failures to obtain a response at
/// all are returned as [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
	/// Sends `operation` with `headers` and returns the server response.
	async fn execute(&self, operation: &Operation, headers: &Headers) -> Result<Response, TransportError>;
}
