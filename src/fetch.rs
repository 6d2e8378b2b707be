//! Degrading fetch executor: remote-first reads with a cached fallback.
//!
//! Every read goes through [`DegradingFetcher::execute`], which tries the
//! remote source first, caches any success, and falls back to the last cached
//! value (however stale) when the remote source fails. Callers always learn
//! which of the three service levels they got via [`FetchOutcome`].

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Result of a degrading fetch, ordered from best to worst service level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome<T> {
	/// The remote source answered; the value is current and now cached.
	Fresh(T),
	/// The remote source failed but a previously cached value was served.
	Degraded(T),
	/// The remote source failed and no cached value exists.
	Failed {
		/// Why the remote fetch failed.
		reason: String,
	},
}
impl<T> FetchOutcome<T> {
	/// Returns the carried value regardless of freshness, if any.
	pub fn into_value(self) -> Option<T> {
		match self {
			Self::Fresh(value) | Self::Degraded(value) => Some(value),
			Self::Failed { .. } => None,
		}
	}

	/// Whether the remote source answered this request.
	pub fn is_fresh(&self) -> bool {
		matches!(self, Self::Fresh(_))
	}
}

#[derive(Clone, Debug)]
struct CacheEntry {
	value: serde_json::Value,
	stored_at: OffsetDateTime,
	ttl: Duration,
}
impl CacheEntry {
	fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
		now < self.stored_at + self.ttl
	}
}

/// Remote-first fetch executor with a per-fingerprint fallback cache.
///
/// Entries never get evicted by failure; a stale entry stays eligible as a
/// degraded fallback until a fresh fetch replaces it or the caller clears it.
#[derive(Clone, Debug, Default)]
pub struct DegradingFetcher {
	cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}
impl DegradingFetcher {
	/// Creates an executor with an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `primary`, caching its result under `fingerprint` on success and
	/// serving the cached value on failure.
	///
	/// The fingerprint must capture every request parameter that affects the
	/// response; two requests sharing a fingerprint are assumed
	/// interchangeable. Cancellation counts as a primary failure, so a
	/// cancelled fetch still degrades to cache when one exists.
	pub async fn execute<T, F>(
		&self,
		fingerprint: &str,
		ttl: Duration,
		cancel: &CancellationToken,
		primary: F,
	) -> FetchOutcome<T>
	where
		T: Serialize + DeserializeOwned,
		F: Future<Output = Result<T>>,
	{
		let result = tokio::select! {
			_ = cancel.cancelled() => Err(Error::Cancelled),
			result = primary => result,
		};

		match result {
			Ok(value) => {
				self.install(fingerprint, &value, ttl);

				FetchOutcome::Fresh(value)
			},
			Err(e) => self.fall_back(fingerprint, &e.to_string()),
		}
	}

	/// Like [`execute`](Self::execute), but consults `fallback` when the
	/// primary fails and the cache has nothing to serve.
	///
	/// Useful for callers whose degraded answer lives somewhere other than
	/// this cache, such as a value bundled with the application.
	pub async fn execute_with_fallback<T, F>(
		&self,
		fingerprint: &str,
		ttl: Duration,
		cancel: &CancellationToken,
		primary: F,
		fallback: impl FnOnce() -> Option<T>,
	) -> FetchOutcome<T>
	where
		T: Serialize + DeserializeOwned,
		F: Future<Output = Result<T>>,
	{
		match self.execute(fingerprint, ttl, cancel, primary).await {
			FetchOutcome::Failed { reason } => match fallback() {
				Some(value) => FetchOutcome::Degraded(value),
				None => FetchOutcome::Failed { reason },
			},
			outcome => outcome,
		}
	}

	/// Whether the cached value under `fingerprint`, if any, is still within
	/// its TTL.
	pub fn is_cached_fresh(&self, fingerprint: &str) -> bool {
		self.cache
			.read()
			.get(fingerprint)
			.is_some_and(|entry| entry.is_fresh_at(OffsetDateTime::now_utc()))
	}

	/// Drops the cached value under `fingerprint`, if any.
	pub fn invalidate(&self, fingerprint: &str) {
		self.cache.write().remove(fingerprint);
	}

	/// Drops every cached value.
	pub fn clear(&self) {
		self.cache.write().clear();
	}

	fn install<T>(&self, fingerprint: &str, value: &T, ttl: Duration)
	where
		T: Serialize,
	{
		// A value that cannot round-trip through JSON cannot be served later,
		// so it is simply not cached.
		let Ok(value) = serde_json::to_value(value) else { return };

		self.cache.write().insert(fingerprint.to_owned(), CacheEntry {
			value,
			stored_at: OffsetDateTime::now_utc(),
			ttl,
		});
	}

	fn fall_back<T>(&self, fingerprint: &str, reason: &str) -> FetchOutcome<T>
	where
		T: DeserializeOwned,
	{
		let guard = self.cache.read();
		let Some(entry) = guard.get(fingerprint) else {
			return FetchOutcome::Failed { reason: reason.to_owned() };
		};

		match serde_json::from_value(entry.value.clone()) {
			Ok(value) => FetchOutcome::Degraded(value),
			Err(e) =>
				FetchOutcome::Failed { reason: format!("{reason}; cached fallback unusable: {e}") },
		}
	}
}
