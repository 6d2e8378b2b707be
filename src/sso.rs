//! OAuth 2.0 flow driver for the game's single-sign-on service.
//!
//! [`SsoClient`] owns the transport, the endpoint configuration, and the
//! pending-challenge table so individual flow implementations can focus on
//! grant-specific logic (PKCE issuance, code exchanges, refresh rotations,
//! token probes).

pub mod authorize;
pub mod token;

pub use token::TokenSet;

// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
	events::{EventSink, NullSink},
	http::{TokenTransport, TransportResponse},
	pkce::ChallengeTable,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

#[cfg(feature = "reqwest")]
/// Flow driver specialized for the crate's default reqwest transport.
pub type ReqwestSsoClient = SsoClient<ReqwestTransport>;

/// Endpoint and client configuration for the SSO service.
#[derive(Clone, Debug)]
pub struct SsoConfig {
	/// OAuth 2.0 client identifier (public client, PKCE only).
	pub client_id: String,
	/// Authorization endpoint presented to the user's browser.
	pub authorize_endpoint: Url,
	/// Token endpoint for exchanges and refreshes.
	pub token_endpoint: Url,
	/// Lightweight authenticated probe endpoint for token validation.
	pub verify_endpoint: Url,
	/// Redirect URI registered with the provider.
	pub redirect_uri: Url,
}
impl SsoConfig {
	/// Creates a configuration from pre-parsed URLs.
	pub fn new(
		client_id: impl Into<String>,
		authorize_endpoint: Url,
		token_endpoint: Url,
		verify_endpoint: Url,
		redirect_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			authorize_endpoint,
			token_endpoint,
			verify_endpoint,
			redirect_uri,
		}
	}

	/// Parses a configuration from string endpoints.
	pub fn parse(
		client_id: impl Into<String>,
		authorize_endpoint: &str,
		token_endpoint: &str,
		verify_endpoint: &str,
		redirect_uri: &str,
	) -> Result<Self> {
		let endpoint = |raw: &str| {
			Url::parse(raw).map_err(|source| Error::from(ConfigError::InvalidEndpoint { source }))
		};

		Ok(Self {
			client_id: client_id.into(),
			authorize_endpoint: endpoint(authorize_endpoint)?,
			token_endpoint: endpoint(token_endpoint)?,
			verify_endpoint: endpoint(verify_endpoint)?,
			redirect_uri: Url::parse(redirect_uri)
				.map_err(|source| ConfigError::InvalidRedirect { source })?,
		})
	}
}

/// Drives authorization, exchange, refresh, and validation against the SSO
/// service.
///
/// The client is cheap to share; the registry and both background sweeps hold
/// the same instance behind an `Arc`.
pub struct SsoClient<T>
where
	T: ?Sized + TokenTransport,
{
	/// Transport used for every outbound call.
	pub transport: Arc<T>,
	/// Endpoint and client configuration.
	pub config: SsoConfig,
	/// Pending PKCE challenges keyed by state token.
	pub challenges: ChallengeTable,
	events: Arc<dyn EventSink>,
}
impl<T> SsoClient<T>
where
	T: ?Sized + TokenTransport,
{
	/// Creates a flow driver that reuses the caller-provided transport.
	pub fn with_transport(config: SsoConfig, transport: impl Into<Arc<T>>) -> Self {
		Self {
			transport: transport.into(),
			config,
			challenges: ChallengeTable::new(),
			events: Arc::new(NullSink),
		}
	}

	/// Installs an audit event sink (defaults to [`NullSink`]).
	pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
		self.events = events;

		self
	}

	pub(crate) fn events(&self) -> &dyn EventSink {
		self.events.as_ref()
	}
}
#[cfg(feature = "reqwest")]
impl SsoClient<ReqwestTransport> {
	/// Creates a flow driver with a fresh reqwest-backed transport.
	pub fn new(config: SsoConfig) -> Self {
		Self::with_transport(config, ReqwestTransport::default())
	}
}
impl<T> Debug for SsoClient<T>
where
	T: ?Sized + TokenTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SsoClient")
			.field("config", &self.config)
			.field("challenges", &self.challenges)
			.finish()
	}
}

/// Awaits a transport call while honoring the caller's cancellation signal.
///
/// Cancellation wins the race, so an in-flight network call is dropped (and
/// thereby aborted) promptly.
pub(crate) async fn await_cancellable<F>(
	cancel: &CancellationToken,
	fut: F,
) -> Result<TransportResponse>
where
	F: Future<Output = Result<TransportResponse, TransportError>>,
{
	tokio::select! {
		_ = cancel.cancelled() => Err(Error::Cancelled),
		result = fut => result.map_err(Error::from),
	}
}
