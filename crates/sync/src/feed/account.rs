use newsfeed_session::{Credential, UserProfile};
use newsfeed_transport::{Operation, RefreshOutcome};
use serde_json::Value;
use tracing::{info, warn};

use super::{NewsFeed, non_blank};
use crate::documents::{self, SignupInput};
use crate::{Error, Result};

impl NewsFeed {
	/// Signs in and stores the issued credential.
	///
	/// A rejection is reported as it is; credentials are never refreshed for
	/// a sign-in.
	pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile> {
		let username = non_blank("username", username)?;
		if password.is_empty() {
			return Err(Error::invalid("password cannot be empty"));
		}
		self.authenticate(documents::login(username, password)).await
	}

	/// Creates an account and signs in as it.
	pub async fn signup(&self, input: &SignupInput) -> Result<UserProfile> {
		non_blank("username", &input.username)?;
		non_blank("email", &input.email)?;
		if input.password.is_empty() {
			return Err(Error::invalid("password cannot be empty"));
		}
		self.authenticate(documents::signup(input)).await
	}

	/// Forgets the credential, in memory and in storage.
	pub fn logout(&self) -> Result<()> {
		self.session.clear()?;
		info!("account.logout");
		Ok(())
	}

	/// Exchanges the current token for a fresh one.
	///
	/// Shares the single-flight slot with automatic refreshes. A failed
	/// refresh ends the session.
	pub async fn refresh_token(&self) -> Result<()> {
		if !self.session.is_authenticated() {
			return Err(Error::invalid("not signed in"));
		}
		match self.interceptor.refresh().await {
			RefreshOutcome::Refreshed => Ok(()),
			RefreshOutcome::Failed(reason) => Err(newsfeed_transport::Error::AuthRefreshFailed {
				message: "token refresh requested".into(),
				reason,
			}
			.into()),
		}
	}

	async fn authenticate(&self, operation: Operation) -> Result<UserProfile> {
		let response = self.interceptor.send_once(&operation).await?;
		let payload = response.root(&operation).ok_or_else(|| Error::NullPayload {
			operation: operation.name.clone(),
		})?;
		let malformed = |reason: String| Error::MalformedPayload {
			operation: operation.name.clone(),
			reason,
		};

		let token = payload
			.get("token")
			.and_then(Value::as_str)
			.filter(|t| !t.is_empty())
			.ok_or_else(|| malformed("missing token".into()))?;
		let user = payload
			.get("user")
			.filter(|u| !u.is_null())
			.ok_or_else(|| malformed("missing user".into()))?;
		let profile: UserProfile = serde_json::from_value(user.clone()).map_err(|e| malformed(e.to_string()))?;

		if let Err(err) = self.session.set(Credential::new(token, profile.clone())) {
			// Signed in for this process; the next start finds no session.
			warn!(error = %err, "account.persist_failed");
		}
		// Later placeholders point at the cached user.
		self.cache.write_result(user, Some("User"))?;
		info!(user = %profile.username, operation = %operation.name, "account.signed_in");
		Ok(profile)
	}
}
