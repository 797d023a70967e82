//! Authentication-failure classification.

use serde::{Deserialize, Serialize};

use crate::{ApiError, Response};

/// Decides whether a response is an authentication rejection.
///
/// Structured error codes are checked first. Servers that only report
/// free-text messages are matched by case-insensitive substrings, which is
/// fragile: any wording change on the server silently disables refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthFailurePolicy {
	/// Error codes (`extensions.code`) that denote an authentication failure.
	pub codes: Vec<String>,
	/// Message fragments that denote an authentication failure.
	pub needles: Vec<String>,
}

impl Default for AuthFailurePolicy {
	fn default() -> Self {
		Self {
			codes: vec!["UNAUTHENTICATED".into(), "TOKEN_EXPIRED".into()],
			needles: vec!["not authenticated".into(), "unauthorized".into(), "token is expired".into()],
		}
	}
}

impl AuthFailurePolicy {
	/// Policy that only trusts structured codes.
	pub fn codes_only(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			codes: codes.into_iter().map(Into::into).collect(),
			needles: Vec::new(),
		}
	}

	/// Returns `true` if `error` is an authentication failure.
	pub fn is_auth_failure(&self, error: &ApiError) -> bool {
		if let Some(code) = error.code()
			&& self.codes.iter().any(|c| c.eq_ignore_ascii_case(code))
		{
			return true;
		}
		let message = error.message.to_lowercase();
		self.needles.iter().any(|needle| message.contains(&needle.to_lowercase()))
	}

	/// Returns the first authentication error in `response`.
	pub fn classify<'a>(&self, response: &'a Response) -> Option<&'a ApiError> {
		response.errors.iter().find(|e| self.is_auth_failure(e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_message_match_is_case_insensitive() {
		let policy = AuthFailurePolicy::default();
		assert!(policy.is_auth_failure(&ApiError::new("Not Authenticated")));
		assert!(policy.is_auth_failure(&ApiError::new("Signature has expired: Token is expired")));
		assert!(policy.is_auth_failure(&ApiError::new("UNAUTHORIZED request")));
		assert!(!policy.is_auth_failure(&ApiError::new("Post matching query does not exist")));
	}

	#[test]
	fn test_structured_code_wins_over_message() {
		let policy = AuthFailurePolicy::default();
		assert!(policy.is_auth_failure(&ApiError::new("session gone").with_code("unauthenticated")));

		let strict = AuthFailurePolicy::codes_only(["UNAUTHENTICATED"]);
		assert!(!strict.is_auth_failure(&ApiError::new("not authenticated")));
		assert!(strict.is_auth_failure(&ApiError::new("whatever").with_code("UNAUTHENTICATED")));
	}

	#[test]
	fn test_classify_finds_first_auth_error() {
		let policy = AuthFailurePolicy::default();
		let resp = Response::failed(vec![ApiError::new("boom"), ApiError::new("not authenticated")]);
		assert_eq!(policy.classify(&resp).map(|e| e.message.as_str()), Some("not authenticated"));
		assert!(policy.classify(&Response::failed(vec![ApiError::new("boom")])).is_none());
	}

	#[test]
	fn test_deserialize_partial_policy_keeps_defaults() {
		let policy: AuthFailurePolicy = serde_json::from_str(r#"{ "codes": ["EXPIRED"] }"#).unwrap();
		assert_eq!(policy.codes, vec!["EXPIRED"]);
		assert_eq!(policy.needles, AuthFailurePolicy::default().needles);
	}
}
