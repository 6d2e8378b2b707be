//! PKCE verifier/challenge generation and the pending-challenge table.
//!
//! Every authorization attempt gets a fresh [`PkcePair`] plus an anti-forgery
//! state token. Pending challenges are single-use and expire after
//! [`ChallengeTable::DEFAULT_TTL`] so an abandoned login can never grow the
//! table without bound.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Verifier/challenge pair backing one authorization attempt.
#[derive(Clone)]
pub struct PkcePair {
	/// High-entropy secret verifier (64 alphanumeric characters).
	pub verifier: String,
	/// base64url (no padding) SHA-256 digest of the verifier.
	pub challenge: String,
	/// Challenge method (currently always `S256`).
	pub method: PkceCodeChallengeMethod,
}
impl PkcePair {
	/// Generates a fresh pair from the process random source.
	pub fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}
impl Debug for PkcePair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkcePair")
			.field("verifier", &"<redacted>")
			.field("challenge", &self.challenge)
			.field("method", &self.method)
			.finish()
	}
}

/// Challenge handed back to callers when an authorization attempt starts.
#[derive(Clone, Debug)]
pub struct IssuedChallenge {
	/// Opaque state value that must round-trip via the redirect handler.
	pub state: String,
	/// PKCE code challenge embedded into the authorize URL.
	pub challenge: String,
	/// Challenge method label.
	pub method: PkceCodeChallengeMethod,
}

struct PendingChallenge {
	pair: PkcePair,
	issued_at: OffsetDateTime,
}

/// Concurrency-safe table of pending authorization challenges.
///
/// A user may begin a second authorization attempt while a first is still
/// outstanding, so issue and consume take the lock per call and never hold it
/// across suspension points.
pub struct ChallengeTable {
	inner: Mutex<HashMap<String, PendingChallenge>>,
	ttl: Duration,
}
impl ChallengeTable {
	/// Lifetime of an unconsumed challenge.
	pub const DEFAULT_TTL: Duration = Duration::minutes(10);

	/// Creates a table with the default challenge lifetime.
	pub fn new() -> Self {
		Self::with_ttl(Self::DEFAULT_TTL)
	}

	/// Creates a table with a caller-chosen challenge lifetime.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { inner: Mutex::new(HashMap::new()), ttl }
	}

	/// Registers a new pending challenge and returns its public parts.
	///
	/// Expired entries are discarded on the way in, so the table stays bounded
	/// by the number of attempts begun within one TTL window.
	pub fn issue(&self) -> IssuedChallenge {
		self.issue_at(OffsetDateTime::now_utc())
	}

	fn issue_at(&self, now: OffsetDateTime) -> IssuedChallenge {
		let state = random_string(STATE_LEN);
		let pair = PkcePair::generate();
		let issued = IssuedChallenge {
			state: state.clone(),
			challenge: pair.challenge.clone(),
			method: pair.method,
		};
		let mut guard = self.inner.lock();

		Self::evict_expired(&mut guard, now, self.ttl);
		guard.insert(state, PendingChallenge { pair, issued_at: now });

		issued
	}

	/// Consumes the challenge bound to `state`, enforcing single use.
	///
	/// Returns [`Error::InvalidChallenge`] when the state is unknown, already
	/// consumed, or older than the table TTL.
	pub fn consume(&self, state: &str) -> Result<PkcePair> {
		self.consume_at(state, OffsetDateTime::now_utc())
	}

	fn consume_at(&self, state: &str, now: OffsetDateTime) -> Result<PkcePair> {
		let pending = self.inner.lock().remove(state).ok_or(Error::InvalidChallenge)?;

		if now - pending.issued_at > self.ttl {
			return Err(Error::InvalidChallenge);
		}

		Ok(pending.pair)
	}

	/// Puts a consumed challenge back so the same callback can be retried.
	///
	/// Meant for exchanges that never reached the provider; the retry window
	/// restarts from now.
	pub(crate) fn reinstate(&self, state: String, pair: PkcePair) {
		self.inner
			.lock()
			.insert(state, PendingChallenge { pair, issued_at: OffsetDateTime::now_utc() });
	}

	/// Number of currently pending challenges.
	pub fn pending(&self) -> usize {
		self.inner.lock().len()
	}

	fn evict_expired(
		entries: &mut HashMap<String, PendingChallenge>,
		now: OffsetDateTime,
		ttl: Duration,
	) {
		entries.retain(|_, pending| now - pending.issued_at <= ttl);
	}
}
impl Default for ChallengeTable {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for ChallengeTable {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ChallengeTable")
			.field("pending", &self.pending())
			.field("ttl", &self.ttl)
			.finish()
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn challenge_matches_sha256_of_verifier() {
		let pair = PkcePair::generate();

		assert!(pair.verifier.len() >= 43, "RFC 7636 requires at least 43 verifier characters.");
		assert_eq!(pair.challenge, compute_pkce_challenge(&pair.verifier));
		assert_eq!(pair.method.as_str(), "S256");
	}

	#[test]
	fn challenges_are_single_use() {
		let table = ChallengeTable::new();
		let issued = table.issue();
		let pair = table.consume(&issued.state).expect("First consume should succeed.");

		assert_eq!(pair.challenge, issued.challenge);

		let err = table.consume(&issued.state).expect_err("Second consume must fail.");

		assert!(matches!(err, Error::InvalidChallenge));
	}

	#[test]
	fn unknown_state_is_rejected() {
		let table = ChallengeTable::new();

		assert!(matches!(table.consume("no-such-state"), Err(Error::InvalidChallenge)));
	}

	#[test]
	fn expired_challenges_are_rejected_and_evicted() {
		let table = ChallengeTable::with_ttl(Duration::minutes(10));
		let now = OffsetDateTime::now_utc();
		let issued = table.issue_at(now);
		let err = table
			.consume_at(&issued.state, now + Duration::minutes(11))
			.expect_err("Expired challenge must be rejected.");

		assert!(matches!(err, Error::InvalidChallenge));

		// A later issue sweeps out anything past the TTL.
		let _ = table.issue_at(now + Duration::minutes(30));

		assert_eq!(table.pending(), 1);
	}

	#[test]
	fn concurrent_attempts_coexist() {
		let table = ChallengeTable::new();
		let first = table.issue();
		let second = table.issue();

		assert_ne!(first.state, second.state);
		assert_eq!(table.pending(), 2);
		assert!(table.consume(&second.state).is_ok());
		assert!(table.consume(&first.state).is_ok());
	}
}
