//! Crate-level error types shared across flows, the registry, and the stores.

// self
use crate::{_prelude::*, identity::IdentityId, storage::StorageError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure (secret vault or session persistence).
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StorageError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Network-level failure, distinct from a well-formed remote rejection.
	#[error(transparent)]
	RemoteUnreachable(#[from] TransportError),

	/// The authorization state token is unknown, already consumed, or expired.
	#[error("Authorization state is unknown or has expired.")]
	InvalidChallenge,
	/// The token endpoint rejected the authorization code exchange.
	#[error("Token exchange failed: {reason}.")]
	TokenExchangeFailed {
		/// HTTP status returned by the token endpoint, when one was received.
		status: Option<u16>,
		/// Remote- or parser-supplied reason string.
		reason: String,
	},
	/// The token endpoint rejected a refresh attempt.
	#[error("Token refresh failed: {reason}.")]
	RefreshFailed {
		/// HTTP status returned by the token endpoint, when one was received.
		status: Option<u16>,
		/// Remote- or parser-supplied reason string.
		reason: String,
	},
	/// The registry already holds the configured maximum number of identities.
	#[error("Identity registry is full ({limit} identities).")]
	CapacityExceeded {
		/// Configured identity ceiling.
		limit: usize,
	},
	/// The identity was never authenticated or has been removed.
	#[error("Identity {id} is not registered.")]
	IdentityNotFound {
		/// Identity that was requested.
		id: IdentityId,
	},
	/// The caller's cancellation signal fired before the operation completed.
	#[error("Operation was cancelled.")]
	Cancelled,
}
impl Error {
	/// Returns the remote HTTP status attached to the error, when one exists.
	pub fn remote_status(&self) -> Option<u16> {
		match self {
			Self::TokenExchangeFailed { status, .. } | Self::RefreshFailed { status, .. } => *status,
			_ => None,
		}
	}
}

/// Configuration and validation failures raised locally.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// An SSO endpoint URL cannot be parsed.
	#[error("SSO endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned a non-positive or excessive `expires_in`.
	#[error("The expires_in value is outside the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the remote endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the remote endpoint.")]
	Io(#[from] std::io::Error),
	/// The remote call exceeded its bounded timeout.
	#[error("Remote call exceeded the configured timeout.")]
	Timeout,
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}
