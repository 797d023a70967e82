//! Credential refresh endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::{Headers, Operation, Transport, TransportError};

/// Mutation document exchanging a (possibly expired) token for a fresh one.
pub const REFRESH_TOKEN_DOCUMENT: &str = "mutation RefreshToken($token: String!) {\n  refreshToken(token: $token)\n}";

/// Why a refresh did not produce a new token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RefreshError {
	/// The endpoint answered but issued no token.
	#[error("refresh rejected by server")]
	Rejected,
	/// The endpoint reported an error.
	#[error("refresh error: {0}")]
	Application(String),
	/// The endpoint could not be reached.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Renews an expired credential.
///
/// Called at most once per expiry window by the interceptor; implementations
/// need not deduplicate concurrent calls themselves.
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
	/// Exchanges `token` for a new token.
	async fn refresh(&self, token: &str) -> Result<String, RefreshError>;
}

/// [`RefreshEndpoint`] sending the `RefreshToken` mutation over a raw transport.
///
/// The call bypasses the interceptor so a rejected refresh can never trigger
/// another refresh.
pub struct OperationRefresh {
	transport: Arc<dyn Transport>,
}

impl OperationRefresh {
	/// Creates a refresh endpoint on `transport`.
	pub fn new(transport: Arc<dyn Transport>) -> Self {
		Self { transport }
	}

	/// The refresh operation for `token`.
	pub fn operation(token: &str) -> Operation {
		Operation::new("RefreshToken", REFRESH_TOKEN_DOCUMENT, "refreshToken").variables(json!({ "token": token }))
	}
}

#[async_trait]
impl RefreshEndpoint for OperationRefresh {
	async fn refresh(&self, token: &str) -> Result<String, RefreshError> {
		let op = Self::operation(token);
		let response = self.transport.execute(&op, &Headers::new()).await?;
		if let Some(err) = response.errors.first() {
			return Err(RefreshError::Application(err.message.clone()));
		}
		response
			.root(&op)
			.and_then(|v| v.as_str())
			.filter(|t| !t.is_empty())
			.map(str::to_owned)
			.ok_or(RefreshError::Rejected)
	}
}
