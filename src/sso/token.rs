//! Token endpoint response handling, refresh rotation, and validation probes.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	events::AuditEvent,
	http::{TokenTransport, TransportResponse},
	identity::TokenSecret,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	sso::{SsoClient, await_cancellable},
};

/// Longest `expires_in` the crate accepts, in seconds. Anything above this is
/// treated as a malformed response.
const MAX_EXPIRES_IN_SECS: i64 = 366 * 24 * 60 * 60;

/// Tokens issued by a successful exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
	/// Freshly issued access token.
	pub access_token: TokenSecret,
	/// Refresh token: the rotated value when the provider sent one, otherwise
	/// the value that was used for the request.
	pub refresh_token: TokenSecret,
	/// Absolute expiry instant derived from `expires_in`.
	pub expires_at: OffsetDateTime,
	/// Scopes granted by the provider, when echoed back.
	pub scope: Option<String>,
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[allow(dead_code)]
	token_type: String,
	expires_in: Option<i64>,
	refresh_token: Option<String>,
	scope: Option<String>,
}

/// Parses a 2xx token endpoint body into a [`TokenSet`].
///
/// `fallback_refresh` supplies the previous refresh token for providers that
/// do not rotate it on every call; an exchange has no previous value and must
/// receive one in the response.
pub(crate) fn parse_token_response(
	body: &[u8],
	issued_at: OffsetDateTime,
	fallback_refresh: Option<&str>,
) -> Result<TokenSet, String> {
	let mut deserializer = serde_json::Deserializer::from_slice(body);
	let response: TokenEndpointResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| format!("malformed token response: {e}"))?;
	let expires_in = response
		.expires_in
		.ok_or_else(|| ConfigError::MissingExpiresIn.to_string())?;

	if expires_in <= 0 || expires_in > MAX_EXPIRES_IN_SECS {
		return Err(ConfigError::ExpiresInOutOfRange.to_string());
	}

	let refresh_token = response
		.refresh_token
		.as_deref()
		.or(fallback_refresh)
		.ok_or_else(|| "token response carried no refresh token".to_owned())?;

	Ok(TokenSet {
		access_token: TokenSecret::new(response.access_token),
		refresh_token: TokenSecret::new(refresh_token),
		expires_at: issued_at + Duration::seconds(expires_in),
		scope: response.scope,
	})
}

fn rejection_reason(response: &TransportResponse) -> String {
	let snippet = response.body_snippet();

	if snippet.is_empty() { format!("HTTP {}", response.status) } else { snippet }
}

impl<T> SsoClient<T>
where
	T: ?Sized + TokenTransport,
{
	/// Rotates an access token via `grant_type=refresh_token`.
	///
	/// Fails with [`Error::RefreshFailed`] on any non-2xx response or
	/// unparseable body; transport-level failures stay distinct as
	/// [`Error::RemoteUnreachable`].
	pub async fn refresh(&self, refresh_token: &str, cancel: &CancellationToken) -> Result<TokenSet> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let form = [
					("grant_type", "refresh_token"),
					("client_id", self.config.client_id.as_str()),
					("refresh_token", refresh_token),
				];
				let response = await_cancellable(
					cancel,
					self.transport.post_form(&self.config.token_endpoint, &form),
				)
				.await?;
				let issued_at = OffsetDateTime::now_utc();

				if !response.is_success() {
					return Err(Error::RefreshFailed {
						status: Some(response.status),
						reason: rejection_reason(&response),
					});
				}

				parse_token_response(&response.body, issued_at, Some(refresh_token)).map_err(
					|reason| Error::RefreshFailed { status: Some(response.status), reason },
				)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Probes the verify endpoint with the provided access token.
	///
	/// Any non-2xx response or transport failure counts as invalid; only
	/// cancellation surfaces as an error. This deliberately conflates
	/// "rejected" with "unreachable" because the probe exists to answer one
	/// question: can this token be used right now?
	pub async fn validate(&self, access_token: &str, cancel: &CancellationToken) -> Result<bool> {
		const KIND: FlowKind = FlowKind::Validate;

		let span = FlowSpan::new(KIND, "validate");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let probe = self.transport.get_bearer(&self.config.verify_endpoint, access_token);

				tokio::select! {
					_ = cancel.cancelled() => Err(Error::Cancelled),
					response = probe => Ok(response.map(|r| r.is_success()).unwrap_or(false)),
				}
			})
			.await;

		match &result {
			Ok(true) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	pub(crate) fn emit(&self, event: AuditEvent) {
		self.events().record(event);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn parse_requires_expires_in() {
		let body = br#"{"access_token":"a","token_type":"Bearer","refresh_token":"r"}"#;
		let err = parse_token_response(body, OffsetDateTime::now_utc(), None)
			.expect_err("Missing expires_in must be rejected.");

		assert!(err.contains("expires_in"));
	}

	#[test]
	fn parse_rejects_non_positive_expiry() {
		let body = br#"{"access_token":"a","token_type":"Bearer","expires_in":0,"refresh_token":"r"}"#;

		assert!(parse_token_response(body, OffsetDateTime::now_utc(), None).is_err());
	}

	#[test]
	fn parse_falls_back_to_previous_refresh_token() {
		let body = br#"{"access_token":"a","token_type":"Bearer","expires_in":1200}"#;
		let issued = OffsetDateTime::now_utc();
		let tokens = parse_token_response(body, issued, Some("previous"))
			.expect("Response without refresh_token should reuse the previous one.");

		assert_eq!(tokens.refresh_token.expose(), "previous");
		assert_eq!(tokens.expires_at, issued + Duration::seconds(1_200));
	}

	#[test]
	fn parse_reports_the_json_path_on_malformed_bodies() {
		let body = br#"{"access_token":42,"token_type":"Bearer","expires_in":1200}"#;
		let err = parse_token_response(body, OffsetDateTime::now_utc(), Some("r"))
			.expect_err("Malformed access_token must be rejected.");

		assert!(err.contains("access_token"), "Reason should name the offending field: {err}");
	}
}
