//! Discrete audit events emitted by the flow driver and the registry.
//!
//! The core only emits events; interpretation (telemetry, UI toasts, audit
//! logs) belongs to whichever [`EventSink`] the caller installs.

// self
use crate::{_prelude::*, identity::IdentityId};

/// Lifecycle events observed by the audit/telemetry sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditEvent {
	/// An authorization URL was handed out and a challenge registered.
	AuthorizationStarted {
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// An authorization code was exchanged for tokens.
	TokenExchanged {
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// A refresh rotated an identity's tokens.
	TokenRefreshed {
		/// Identity whose tokens rotated.
		identity: IdentityId,
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// An identity entered the registry.
	IdentityAdded {
		/// Identity that was admitted.
		identity: IdentityId,
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// An identity left the registry.
	IdentityRemoved {
		/// Identity that was removed.
		identity: IdentityId,
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// The active identity pointer moved.
	IdentitySwitched {
		/// Newly active identity.
		identity: IdentityId,
		/// Emission instant.
		at: OffsetDateTime,
	},
	/// A bulk refresh pass finished.
	BulkRefreshCompleted {
		/// Number of identities refreshed successfully.
		succeeded: usize,
		/// Number of identities whose refresh failed.
		failed: usize,
		/// Emission instant.
		at: OffsetDateTime,
	},
}
impl AuditEvent {
	/// Stable label suitable for log or metric fields.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::AuthorizationStarted { .. } => "authorization_started",
			Self::TokenExchanged { .. } => "token_exchanged",
			Self::TokenRefreshed { .. } => "token_refreshed",
			Self::IdentityAdded { .. } => "identity_added",
			Self::IdentityRemoved { .. } => "identity_removed",
			Self::IdentitySwitched { .. } => "identity_switched",
			Self::BulkRefreshCompleted { .. } => "bulk_refresh_completed",
		}
	}

	/// Identity the event concerns, when one applies.
	pub const fn identity(&self) -> Option<IdentityId> {
		match self {
			Self::TokenRefreshed { identity, .. }
			| Self::IdentityAdded { identity, .. }
			| Self::IdentityRemoved { identity, .. }
			| Self::IdentitySwitched { identity, .. } => Some(*identity),
			_ => None,
		}
	}

	/// Emission instant.
	pub const fn occurred_at(&self) -> OffsetDateTime {
		match self {
			Self::AuthorizationStarted { at }
			| Self::TokenExchanged { at }
			| Self::TokenRefreshed { at, .. }
			| Self::IdentityAdded { at, .. }
			| Self::IdentityRemoved { at, .. }
			| Self::IdentitySwitched { at, .. }
			| Self::BulkRefreshCompleted { at, .. } => *at,
		}
	}
}

/// Receives audit events. Implementations must not block.
pub trait EventSink
where
	Self: Send + Sync,
{
	/// Records one event.
	fn record(&self, event: AuditEvent);
}

/// Sink that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;
impl EventSink for NullSink {
	fn record(&self, _: AuditEvent) {}
}

/// Sink that buffers events in memory, mainly for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink(Mutex<Vec<AuditEvent>>);
impl MemorySink {
	/// Returns a copy of every recorded event, in emission order.
	pub fn events(&self) -> Vec<AuditEvent> {
		self.0.lock().clone()
	}

	/// Returns the recorded event kinds, in emission order.
	pub fn kinds(&self) -> Vec<&'static str> {
		self.0.lock().iter().map(AuditEvent::kind).collect()
	}
}
impl EventSink for MemorySink {
	fn record(&self, event: AuditEvent) {
		self.0.lock().push(event);
	}
}

/// Sink that forwards events to `tracing` at info level.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;
#[cfg(feature = "tracing")]
impl EventSink for TracingSink {
	fn record(&self, event: AuditEvent) {
		tracing::info!(
			target: "fleetkey.audit",
			kind = event.kind(),
			identity = event.identity().map(IdentityId::value),
			"audit event",
		);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_and_identities_line_up() {
		let now = OffsetDateTime::now_utc();
		let refreshed = AuditEvent::TokenRefreshed { identity: IdentityId::new(42), at: now };

		assert_eq!(refreshed.kind(), "token_refreshed");
		assert_eq!(refreshed.identity(), Some(IdentityId::new(42)));
		assert_eq!(refreshed.occurred_at(), now);

		let bulk = AuditEvent::BulkRefreshCompleted { succeeded: 3, failed: 1, at: now };

		assert_eq!(bulk.kind(), "bulk_refresh_completed");
		assert_eq!(bulk.identity(), None);
	}

	#[test]
	fn memory_sink_preserves_order() {
		let sink = MemorySink::default();
		let now = OffsetDateTime::now_utc();

		sink.record(AuditEvent::AuthorizationStarted { at: now });
		sink.record(AuditEvent::TokenExchanged { at: now });

		assert_eq!(sink.kinds(), ["authorization_started", "token_exchanged"]);
	}
}
