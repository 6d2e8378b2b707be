//! Authorization Code + PKCE flow: authorize URL assembly and code exchange.

// self
use crate::{
	_prelude::*,
	events::AuditEvent,
	http::TokenTransport,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pkce::IssuedChallenge,
	sso::{SsoClient, TokenSet, await_cancellable, token},
};

impl<T> SsoClient<T>
where
	T: ?Sized + TokenTransport,
{
	/// Builds an authorization URL for the requested scopes and registers the
	/// backing PKCE challenge.
	///
	/// The challenge stays pending until [`complete_authorization`] consumes
	/// it or the table TTL discards it.
	///
	/// [`complete_authorization`]: Self::complete_authorization
	pub fn begin_authorization(&self, scopes: &[&str]) -> Url {
		let _guard = FlowSpan::new(FlowKind::Authorization, "begin_authorization").entered();

		obs::record_flow_outcome(FlowKind::Authorization, FlowOutcome::Attempt);

		let issued = self.challenges.issue();
		let url = self.build_authorize_url(scopes, &issued);

		self.emit(AuditEvent::AuthorizationStarted { at: OffsetDateTime::now_utc() });
		obs::record_flow_outcome(FlowKind::Authorization, FlowOutcome::Success);

		url
	}

	fn build_authorize_url(&self, scopes: &[&str], issued: &IssuedChallenge) -> Url {
		let mut url = self.config.authorize_endpoint.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", &self.config.client_id);
		pairs.append_pair("redirect_uri", self.config.redirect_uri.as_str());

		if !scopes.is_empty() {
			pairs.append_pair("scope", &scopes.join(" "));
		}

		pairs.append_pair("state", &issued.state);
		pairs.append_pair("code_challenge", &issued.challenge);
		pairs.append_pair("code_challenge_method", issued.method.as_str());

		drop(pairs);

		url
	}

	/// Exchanges an authorization code for tokens using the challenge bound to
	/// `state`.
	///
	/// Fails with [`Error::InvalidChallenge`] when the state is unknown or
	/// expired, and with [`Error::TokenExchangeFailed`] (remote status
	/// preserved) on any non-2xx response or unparseable body. The challenge
	/// is consumed exactly once by any answer from the provider, so a
	/// rejected code needs a fresh
	/// [`begin_authorization`](Self::begin_authorization); a transport
	/// failure or cancellation leaves it pending for a retry with the same
	/// callback.
	pub async fn complete_authorization(
		&self,
		code: &str,
		state: &str,
		cancel: &CancellationToken,
	) -> Result<TokenSet> {
		const KIND: FlowKind = FlowKind::Exchange;

		let span = FlowSpan::new(KIND, "complete_authorization");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let pair = self.challenges.consume(state)?;
				let form = [
					("grant_type", "authorization_code"),
					("client_id", self.config.client_id.as_str()),
					("code", code),
					("redirect_uri", self.config.redirect_uri.as_str()),
					("code_verifier", pair.verifier.as_str()),
				];
				let response = match await_cancellable(
					cancel,
					self.transport.post_form(&self.config.token_endpoint, &form),
				)
				.await
				{
					Ok(response) => response,
					Err(e) => {
						// The provider never saw this attempt; keep the
						// challenge so the same callback can be retried.
						self.challenges.reinstate(state.to_owned(), pair);

						return Err(e);
					},
				};
				let issued_at = OffsetDateTime::now_utc();

				if !response.is_success() {
					return Err(Error::TokenExchangeFailed {
						status: Some(response.status),
						reason: response.body_snippet(),
					});
				}

				let tokens = token::parse_token_response(&response.body, issued_at, None)
					.map_err(|reason| Error::TokenExchangeFailed {
						status: Some(response.status),
						reason,
					})?;

				self.emit(AuditEvent::TokenExchanged { at: issued_at });

				Ok(tokens)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}
