//! JSON-over-HTTP [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::{Headers, Operation, Response, Transport, TransportError};

/// Posts operations as JSON to a single API endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
	endpoint: String,
}

impl HttpTransport {
	/// Creates a transport for `endpoint` with a per-request `timeout`.
	pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| TransportError::Connect(e.to_string()))?;
		Ok(Self {
			client,
			endpoint: endpoint.into(),
		})
	}

	/// The endpoint URL.
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}

fn classify(err: reqwest::Error) -> TransportError {
	if err.is_timeout() {
		TransportError::Timeout
	} else {
		TransportError::Connect(err.to_string())
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn execute(&self, operation: &Operation, headers: &Headers) -> Result<Response, TransportError> {
		let mut request = self
			.client
			.post(&self.endpoint)
			.header(CONTENT_TYPE, "application/json")
			.json(&operation.request_body());
		for (name, value) in headers.iter() {
			request = request.header(name, value);
		}

		let response = request.send().await.map_err(classify)?;
		let status = response.status();
		let body = response.bytes().await.map_err(classify)?;
		debug!(operation = %operation.name, status = status.as_u16(), bytes = body.len(), "http.response");

		decode(status, &body)
	}
}

/// Maps a status and body to a response.
///
/// Error entries are returned even on a failure status so auth failures stay
/// classifiable; any other non-success status is a [`TransportError::Status`].
fn decode(status: StatusCode, body: &[u8]) -> Result<Response, TransportError> {
	let failed = || TransportError::Status {
		status: status.as_u16(),
		body: String::from_utf8_lossy(body).into_owned(),
	};
	match serde_json::from_slice::<Response>(body) {
		Ok(decoded) if status.is_success() || !decoded.errors.is_empty() => Ok(decoded),
		Ok(_) => Err(failed()),
		Err(_) if !status.is_success() => Err(failed()),
		Err(err) => Err(TransportError::Decode(err.to_string())),
	}
}
