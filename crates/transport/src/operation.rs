//! Wire model of the query API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named query or mutation.
///
/// `root_field` names the top-level field of the response `data` object that
/// carries the result, so callers never need to know the document's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
	/// Operation name (e.g. `LikePost`).
	pub name: String,
	/// Query document text.
	pub document: String,
	/// Variables bound to the document.
	pub variables: Value,
	/// Top-level response field holding the result.
	pub root_field: String,
}

impl Operation {
	/// Creates an operation without variables.
	pub fn new(name: impl Into<String>, document: impl Into<String>, root_field: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			document: document.into(),
			variables: Value::Object(Default::default()),
			root_field: root_field.into(),
		}
	}

	/// Sets the operation variables.
	pub fn variables(mut self, variables: Value) -> Self {
		self.variables = variables;
		self
	}

	/// JSON request body in the conventional `{operationName, query, variables}` shape.
	pub fn request_body(&self) -> Value {
		serde_json::json!({
			"operationName": self.name,
			"query": self.document,
			"variables": self.variables,
		})
	}
}

/// Request headers attached to an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
	/// Header carrying the session credential.
	pub const AUTHORIZATION: &'static str = "authorization";

	/// Creates an empty header set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces a header.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.0.insert(name.into(), value.into());
	}

	/// Returns a header value.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}

	/// Returns the authorization header, if any.
	pub fn authorization(&self) -> Option<&str> {
		self.get(Self::AUTHORIZATION)
	}

	/// Iterates over `(name, value)` pairs.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}
}

/// Structured extensions of an [`ApiError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorExtensions {
	/// Machine-readable error code, when the server provides one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
}

/// One error reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
	/// Human-readable message.
	pub message: String,
	/// Response path the error applies to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<Vec<Value>>,
	/// Structured details.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extensions: Option<ApiErrorExtensions>,
}

impl ApiError {
	/// Creates an error carrying only a message.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			path: None,
			extensions: None,
		}
	}

	/// Attaches a structured error code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.extensions = Some(ApiErrorExtensions { code: Some(code.into()) });
		self
	}

	/// Structured error code, if any.
	pub fn code(&self) -> Option<&str> {
		self.extensions.as_ref()?.code.as_deref()
	}
}

/// Server response to an [`Operation`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
	/// Result payload.
	#[serde(default)]
	pub data: Option<Value>,
	/// Errors reported alongside (or instead of) the payload.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<ApiError>,
}

impl Response {
	/// A successful response carrying `data`.
	pub fn ok(data: Value) -> Self {
		Self { data: Some(data), errors: Vec::new() }
	}

	/// A failed response carrying `errors` and no payload.
	pub fn failed(errors: Vec<ApiError>) -> Self {
		Self { data: None, errors }
	}

	/// Returns the non-null value of `field` inside `data`.
	pub fn field(&self, field: &str) -> Option<&Value> {
		self.data.as_ref()?.get(field).filter(|v| !v.is_null())
	}

	/// Returns the non-null result of `operation`.
	pub fn root(&self, operation: &Operation) -> Option<&Value> {
		self.field(&operation.root_field)
	}
}
