//! Credential attachment and transparent refresh-and-retry.
//!
//! # Refresh protocol
//!
//! 1. Attach the latest credential and send.
//! 2. Non-authentication outcomes are returned as they are.
//! 3. On an authentication failure:
//!    - no credential was attached: nothing to refresh, surface the error
//!    - the credential changed since sending (someone else refreshed or signed
//!      in): resend once with the current credential
//!    - otherwise join the in-flight refresh, or lead one
//! 4. After a successful refresh the operation is resent exactly once; a
//!    second rejection is surfaced without further refresh.
//!
//! # Single-flight
//!
//! At most one refresh call runs at a time. The leader publishes its outcome
//! through a `watch` channel that every waiter holds, then vacates the slot.
//! A [`RefreshGuard`] publishes an aborted outcome if the leader is dropped
//! mid-refresh, so waiters never hang and the next window can refresh again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use newsfeed_session::Session;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{AuthFailurePolicy, Error, Headers, Operation, RefreshEndpoint, Response, Result, Transport};

/// Authorization scheme used by the newsfeed API.
const DEFAULT_SCHEME: &str = "JWT";

/// Result of one refresh attempt, shared by every operation that awaited it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A new credential is in the session.
	Refreshed,
	/// No new credential; the reason is surfaced to callers.
	Failed(String),
}

struct InFlightRefresh {
	tx: watch::Sender<Option<RefreshOutcome>>,
}

/// Single-flight slot for the credential refresh.
#[derive(Default)]
struct RefreshGate {
	inflight: Mutex<Option<Arc<InFlightRefresh>>>,
	calls: AtomicU64,
}

impl RefreshGate {
	async fn refresh(&self, session: &Session, endpoint: &dyn RefreshEndpoint) -> RefreshOutcome {
		let (inflight, is_leader) = {
			let mut slot = self.inflight.lock();
			match slot.as_ref() {
				Some(f) => (f.clone(), false),
				None => {
					let f = Arc::new(InFlightRefresh {
						tx: watch::Sender::new(None),
					});
					*slot = Some(f.clone());
					(f, true)
				}
			}
		};

		if !is_leader {
			trace!("auth.refresh.join");
			let mut rx = inflight.tx.subscribe();
			loop {
				if let Some(outcome) = rx.borrow_and_update().clone() {
					return outcome;
				}
				if rx.changed().await.is_err() {
					return RefreshOutcome::Failed("refresh abandoned".into());
				}
			}
		}

		let guard = RefreshGuard {
			gate: self,
			inflight,
			completed: false,
		};
		let outcome = self.lead(session, endpoint).await;
		guard.complete(outcome)
	}

	async fn lead(&self, session: &Session, endpoint: &dyn RefreshEndpoint) -> RefreshOutcome {
		let Some(token) = session.token() else {
			return RefreshOutcome::Failed("no credential to refresh".into());
		};

		self.calls.fetch_add(1, Ordering::AcqRel);
		info!("auth.refresh.start");
		match endpoint.refresh(&token).await {
			Ok(fresh) => match session.replace_token(fresh) {
				Ok(Some(_)) => {
					info!("auth.refresh.done");
					RefreshOutcome::Refreshed
				}
				Ok(None) => RefreshOutcome::Failed("session ended during refresh".into()),
				Err(err) => {
					// The in-memory credential is already replaced.
					warn!(error = %err, "auth.refresh.persist_failed");
					RefreshOutcome::Refreshed
				}
			},
			Err(err) => {
				warn!(error = %err, "auth.refresh.failed");
				if let Err(clear_err) = session.clear() {
					warn!(error = %clear_err, "auth.session.clear_failed");
				}
				RefreshOutcome::Failed(err.to_string())
			}
		}
	}

	fn vacate(&self, inflight: &Arc<InFlightRefresh>) {
		let mut slot = self.inflight.lock();
		if slot.as_ref().is_some_and(|f| Arc::ptr_eq(f, inflight)) {
			*slot = None;
		}
	}
}

/// Resolves the in-flight refresh even if the leader is dropped mid-call.
struct RefreshGuard<'a> {
	gate: &'a RefreshGate,
	inflight: Arc<InFlightRefresh>,
	completed: bool,
}

impl RefreshGuard<'_> {
	fn complete(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
		self.completed = true;
		self.inflight.tx.send_replace(Some(outcome.clone()));
		self.gate.vacate(&self.inflight);
		outcome
	}
}

impl Drop for RefreshGuard<'_> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		debug!("auth.refresh.aborted");
		self.inflight.tx.send_replace(Some(RefreshOutcome::Failed("refresh aborted".into())));
		self.gate.vacate(&self.inflight);
	}
}

struct Attempt {
	response: Response,
	/// Whether a credential was attached.
	authenticated: bool,
	/// Session generation observed when the credential was read.
	generation: u64,
}

/// Wraps a [`Transport`] with session credentials and one-shot auth recovery.
///
/// Cheap to share behind an `Arc`; all state lives in the session and the
/// refresh slot.
pub struct AuthInterceptor {
	transport: Arc<dyn Transport>,
	refresher: Arc<dyn RefreshEndpoint>,
	session: Session,
	policy: AuthFailurePolicy,
	scheme: String,
	gate: RefreshGate,
}

impl std::fmt::Debug for AuthInterceptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AuthInterceptor")
			.field("scheme", &self.scheme)
			.field("policy", &self.policy)
			.field("refresh_calls", &self.refresh_calls())
			.finish_non_exhaustive()
	}
}

impl AuthInterceptor {
	/// Creates an interceptor with the default policy and `JWT` scheme.
	pub fn new(transport: Arc<dyn Transport>, refresher: Arc<dyn RefreshEndpoint>, session: Session) -> Self {
		Self {
			transport,
			refresher,
			session,
			policy: AuthFailurePolicy::default(),
			scheme: DEFAULT_SCHEME.into(),
			gate: RefreshGate::default(),
		}
	}

	/// Replaces the authentication-failure policy.
	pub fn with_policy(mut self, policy: AuthFailurePolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Replaces the authorization scheme prefix.
	pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
		self.scheme = scheme.into();
		self
	}

	/// The session this interceptor reads credentials from.
	pub fn session(&self) -> &Session {
		&self.session
	}

	/// Number of refresh endpoint calls made so far.
	pub fn refresh_calls(&self) -> u64 {
		self.gate.calls.load(Ordering::Acquire)
	}

	/// Renews the session credential now, joining a refresh already in flight.
	pub async fn refresh(&self) -> RefreshOutcome {
		self.gate.refresh(&self.session, self.refresher.as_ref()).await
	}

	/// Sends `operation`, recovering once from an authentication failure.
	pub async fn send(&self, operation: &Operation) -> Result<Response> {
		let first = self.attempt(operation).await?;
		let Some(rejection) = self.policy.classify(&first.response) else {
			return finish(operation, first.response);
		};
		let message = rejection.message.clone();

		if !first.authenticated {
			debug!(operation = %operation.name, "auth.rejected.anonymous");
			return Err(Error::AuthExpired { message });
		}

		let changed = self.session.generation() != first.generation && self.session.is_authenticated();
		let outcome = if changed {
			debug!(operation = %operation.name, "auth.retry.credential_changed");
			RefreshOutcome::Refreshed
		} else {
			self.gate.refresh(&self.session, self.refresher.as_ref()).await
		};

		if let RefreshOutcome::Failed(reason) = outcome {
			return Err(Error::AuthRefreshFailed { message, reason });
		}

		debug!(operation = %operation.name, "auth.retry");
		let second = self.attempt(operation).await?;
		if let Some(rejection) = self.policy.classify(&second.response) {
			warn!(operation = %operation.name, "auth.retry.rejected");
			return Err(Error::AuthExpired {
				message: rejection.message.clone(),
			});
		}
		finish(operation, second.response)
	}

	/// Sends `operation` once with the latest credential, without recovery.
	pub async fn send_once(&self, operation: &Operation) -> Result<Response> {
		let attempt = self.attempt(operation).await?;
		finish(operation, attempt.response)
	}

	async fn attempt(&self, operation: &Operation) -> Result<Attempt> {
		let generation = self.session.generation();
		let token = self.session.token();
		let mut headers = Headers::new();
		if let Some(token) = &token {
			headers.insert(Headers::AUTHORIZATION, format!("{} {token}", self.scheme));
		}
		trace!(operation = %operation.name, authenticated = token.is_some(), "transport.send");
		let response = self.transport.execute(operation, &headers).await?;
		Ok(Attempt {
			response,
			authenticated: token.is_some(),
			generation,
		})
	}
}

fn finish(operation: &Operation, response: Response) -> Result<Response> {
	if response.errors.is_empty() {
		return Ok(response);
	}
	Err(Error::Application {
		operation: operation.name.clone(),
		errors: response.errors,
	})
}
