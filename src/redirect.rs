//! Loopback redirect listener for capturing the browser's OAuth callback.
//!
//! The listener binds an ephemeral local port, waits for exactly one request,
//! extracts the `code` and `state` query parameters, and answers with a tiny
//! HTML page telling the user to return to the application. It deliberately
//! speaks just enough HTTP for a single local redirect; it is not a web
//! server.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{
	io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
	net::{TcpListener, TcpStream},
};
// self
use crate::{_prelude::*, error::TransportError};

const RESPONSE_BODY: &str = "<!DOCTYPE html>\
<html><head><title>Login complete</title></head>\
<body><p>Login complete. You can close this tab and return to the application.</p></body></html>";

/// Query parameters delivered by the authorization redirect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackParams {
	/// Single-use authorization code.
	pub code: String,
	/// Anti-forgery state token bound to the pending challenge.
	pub state: String,
}

/// One-shot listener for the local authorization redirect.
#[derive(Debug)]
pub struct RedirectListener {
	listener: TcpListener,
}
impl RedirectListener {
	/// Binds the listener. Use a `:0` port to let the OS pick one, then feed
	/// [`redirect_uri`](Self::redirect_uri) into the SSO configuration.
	pub async fn bind(addr: &str) -> Result<Self> {
		let listener = TcpListener::bind(addr).await.map_err(TransportError::from)?;

		Ok(Self { listener })
	}

	/// Redirect URI pointing at the bound socket.
	pub fn redirect_uri(&self) -> Result<Url> {
		let addr = self.listener.local_addr().map_err(TransportError::from)?;

		Url::parse(&format!("http://{addr}/callback"))
			.map_err(|source| crate::error::ConfigError::InvalidRedirect { source }.into())
	}

	/// Waits for the browser to deliver the callback, bounded by `wait`.
	///
	/// A provider-reported error (`error` query parameter) surfaces as
	/// [`Error::TokenExchangeFailed`]; running out of time surfaces as a
	/// transport timeout.
	pub async fn accept_callback(
		&self,
		wait: StdDuration,
		cancel: &CancellationToken,
	) -> Result<CallbackParams> {
		let accepted = tokio::select! {
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			accepted = tokio::time::timeout(wait, self.listener.accept()) => accepted,
		};
		let (stream, _) = accepted
			.map_err(|_| TransportError::Timeout)?
			.map_err(TransportError::from)?;

		handle_connection(stream).await
	}
}

async fn handle_connection(stream: TcpStream) -> Result<CallbackParams> {
	let mut reader = BufReader::new(stream);
	let mut request_line = String::new();

	reader.read_line(&mut request_line).await.map_err(TransportError::from)?;

	let params = parse_request_line(&request_line);
	let mut stream = reader.into_inner();
	let response = format!(
		"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{RESPONSE_BODY}",
		RESPONSE_BODY.len(),
	);

	stream.write_all(response.as_bytes()).await.map_err(TransportError::from)?;
	stream.shutdown().await.map_err(TransportError::from)?;

	params
}

fn parse_request_line(request_line: &str) -> Result<CallbackParams> {
	let malformed = || Error::TokenExchangeFailed {
		status: None,
		reason: "malformed authorization callback".into(),
	};
	// "GET /callback?code=...&state=... HTTP/1.1"
	let target = request_line.split_whitespace().nth(1).ok_or_else(malformed)?;
	let url = Url::parse(&format!("http://localhost{target}")).map_err(|_| malformed())?;
	let mut code = None;
	let mut state = None;
	let mut error = None;
	let mut error_description = None;

	for (key, value) in url.query_pairs() {
		match &*key {
			"code" => code = Some(value.into_owned()),
			"state" => state = Some(value.into_owned()),
			"error" => error = Some(value.into_owned()),
			"error_description" => error_description = Some(value.into_owned()),
			_ => {},
		}
	}

	if let Some(error) = error {
		return Err(Error::TokenExchangeFailed {
			status: None,
			reason: error_description.unwrap_or(error),
		});
	}

	match (code, state) {
		(Some(code), Some(state)) => Ok(CallbackParams { code, state }),
		_ => Err(malformed()),
	}
}
