//! Transport primitives for token endpoint and probe calls.
//!
//! [`TokenTransport`] is the crate's only dependency on an HTTP stack. The
//! default [`ReqwestTransport`] applies a bounded per-request timeout so a
//! single unreachable host can never stall a scheduler sweep indefinitely;
//! custom transports must uphold the same guarantee.

// std
use std::time::Duration as StdDuration;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`TokenTransport`] implementations.
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// Raw response captured from a remote endpoint.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body.
	pub body: Vec<u8>,
	/// Retry-After hint expressed as a relative duration, if supplied.
	pub retry_after: Option<Duration>,
}
impl TransportResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Lossy UTF-8 view of the body, trimmed for error messages.
	pub fn body_snippet(&self) -> String {
		const MAX: usize = 256;

		let text = String::from_utf8_lossy(&self.body);
		let trimmed = text.trim();

		if trimmed.len() > MAX {
			format!("{}...", &trimmed[..MAX])
		} else {
			trimmed.to_owned()
		}
	}
}

/// Abstraction over HTTP transports capable of executing token exchanges and
/// lightweight authenticated probes.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be
/// shared by the flow driver, the registry, and both background sweeps, and
/// the futures they return must own whatever state they need so they remain
/// `Send` while in flight.
pub trait TokenTransport
where
	Self: 'static + Send + Sync,
{
	/// Submits a form-encoded POST to `url` and captures the raw response.
	fn post_form<'a>(&'a self, url: &'a Url, form: &'a [(&'a str, &'a str)])
	-> TransportFuture<'a>;

	/// Submits a GET to `url` carrying `access_token` as a bearer credential.
	fn get_bearer<'a>(&'a self, url: &'a Url, access_token: &'a str) -> TransportFuture<'a>;
}

/// Default transport backed by [`ReqwestClient`] with a bounded timeout.
///
/// Token requests do not follow redirects; OAuth 2.0 token endpoints return
/// results directly rather than delegating to another URI.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	timeout: StdDuration,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Default bounded timeout for remote calls.
	pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(15);

	/// Creates a transport with the default timeout.
	pub fn new() -> Self {
		Self::with_client(ReqwestClient::new())
	}

	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client, timeout: Self::DEFAULT_TIMEOUT }
	}

	/// Overrides the per-request timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	async fn capture(
		response: Result<reqwest::Response, ReqwestError>,
	) -> Result<TransportResponse, TransportError> {
		let response = response?;
		let status = response.status().as_u16();
		let retry_after = parse_retry_after(response.headers());
		let body = response.bytes().await?.to_vec();

		Ok(TransportResponse { status, body, retry_after })
	}
}
#[cfg(feature = "reqwest")]
impl Default for ReqwestTransport {
	fn default() -> Self {
		Self::new()
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReqwestTransport").field("timeout", &self.timeout).finish()
	}
}
#[cfg(feature = "reqwest")]
impl TokenTransport for ReqwestTransport {
	fn post_form<'a>(
		&'a self,
		url: &'a Url,
		form: &'a [(&'a str, &'a str)],
	) -> TransportFuture<'a> {
		Box::pin(async move {
			let response =
				self.client.post(url.clone()).timeout(self.timeout).form(form).send().await;

			Self::capture(response).await
		})
	}

	fn get_bearer<'a>(&'a self, url: &'a Url, access_token: &'a str) -> TransportFuture<'a> {
		Box::pin(async move {
			let response = self
				.client
				.get(url.clone())
				.timeout(self.timeout)
				.bearer_auth(access_token)
				.send()
				.await;

			Self::capture(response).await
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
