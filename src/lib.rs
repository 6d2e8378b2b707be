//! Multi-identity session keeper for game companion tools—PKCE logins, encrypted token vaults,
//! singleflight refreshes, and self-healing background sweeps in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod error;
pub mod events;
pub mod fetch;
pub mod http;
pub mod identity;
pub mod obs;
pub mod pkce;
pub mod redirect;
pub mod registry;
pub mod sso;
pub mod storage;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience helpers for unit and integration tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use crate::{
		http::{TokenTransport, TransportFuture, TransportResponse},
		sso::SsoConfig,
	};

	/// Scripted SSO transport for tests.
	///
	/// Refresh tokens listed in `rejected` get a 400 with `invalid_grant`;
	/// every other token rotates into `rotated-<token>` / `<token>-next`.
	/// Bearer probes answer `bearer_status`.
	pub struct ScriptedTransport {
		/// Number of form POSTs received so far.
		pub calls: AtomicUsize,
		/// Refresh or authorization tokens that get rejected.
		pub rejected: Vec<String>,
		/// Optional artificial latency per form POST.
		pub delay: Option<StdDuration>,
		/// Status returned by bearer probes.
		pub bearer_status: u16,
	}
	impl ScriptedTransport {
		/// Creates a transport rejecting the listed refresh tokens.
		pub fn rejecting(tokens: &[&str]) -> Self {
			Self { rejected: tokens.iter().map(ToString::to_string).collect(), ..Default::default() }
		}

		/// Number of form POSTs received so far.
		pub fn call_count(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl Default for ScriptedTransport {
		fn default() -> Self {
			Self { calls: AtomicUsize::new(0), rejected: Vec::new(), delay: None, bearer_status: 200 }
		}
	}
	impl TokenTransport for ScriptedTransport {
		fn post_form<'a>(
			&'a self,
			_: &'a Url,
			form: &'a [(&'a str, &'a str)],
		) -> TransportFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}

				let token = form
					.iter()
					.find(|(key, _)| *key == "refresh_token" || *key == "code")
					.map(|(_, value)| *value)
					.unwrap_or_default();

				if self.rejected.iter().any(|rejected| rejected == token) {
					return Ok(TransportResponse {
						status: 400,
						body: br#"{"error":"invalid_grant"}"#.to_vec(),
						retry_after: None,
					});
				}

				Ok(TransportResponse {
					status: 200,
					body: format!(
						r#"{{"access_token":"rotated-{token}","token_type":"Bearer","expires_in":1200,"refresh_token":"{token}-next"}}"#,
					)
					.into_bytes(),
					retry_after: None,
				})
			})
		}

		fn get_bearer<'a>(&'a self, _: &'a Url, _: &'a str) -> TransportFuture<'a> {
			Box::pin(async move {
				Ok(TransportResponse { status: self.bearer_status, body: Vec::new(), retry_after: None })
			})
		}
	}

	/// Static SSO configuration fixture shared across tests.
	pub fn test_sso_config() -> SsoConfig {
		SsoConfig::parse(
			"companion-client",
			"https://sso.example.com/v2/oauth/authorize",
			"https://sso.example.com/v2/oauth/token",
			"https://sso.example.com/oauth/verify",
			"http://127.0.0.1:4916/callback",
		)
		.expect("Static SSO config fixture should parse.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use time;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
