//! In-memory identity credentials and the redacting token secret wrapper.

// self
use crate::{_prelude::*, identity::IdentityId, sso::TokenSet};

/// Safety margin subtracted from the expiry instant when deciding usability.
///
/// A credential that expires in less than this window is treated as unusable so
/// callers never hand out a token that dies mid-request.
pub const SAFETY_MARGIN: Duration = Duration::minutes(5);

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Static facts about an identity, supplied when it is admitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
	/// Opaque identity identifier.
	pub id: IdentityId,
	/// Human-readable display name.
	pub display_name: String,
	/// Corporation-equivalent parent group, when known.
	pub corporation_id: Option<u64>,
	/// Alliance-equivalent parent group, when known.
	pub alliance_id: Option<u64>,
}
impl IdentityProfile {
	/// Creates a profile with no parent groups.
	pub fn new(id: IdentityId, display_name: impl Into<String>) -> Self {
		Self { id, display_name: display_name.into(), corporation_id: None, alliance_id: None }
	}

	/// Attaches the corporation-equivalent parent group.
	pub fn with_corporation(mut self, corporation_id: u64) -> Self {
		self.corporation_id = Some(corporation_id);

		self
	}

	/// Attaches the alliance-equivalent parent group.
	pub fn with_alliance(mut self, alliance_id: u64) -> Self {
		self.alliance_id = Some(alliance_id);

		self
	}
}

/// One authenticated principal held by the session registry.
///
/// The registry owns every credential exclusively; the secret vault only ever
/// sees the durable (access, refresh, expiry) triple.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Identity this credential authenticates.
	pub id: IdentityId,
	/// Human-readable display name.
	pub display_name: String,
	/// Current access token.
	pub access_token: TokenSecret,
	/// Current refresh token.
	pub refresh_token: TokenSecret,
	/// Absolute expiry instant of the access token.
	pub expires_at: OffsetDateTime,
	/// Corporation-equivalent parent group, when known.
	pub corporation_id: Option<u64>,
	/// Alliance-equivalent parent group, when known.
	pub alliance_id: Option<u64>,
}
impl Credential {
	/// Builds a credential from a profile and a freshly issued token set.
	pub fn from_token_set(profile: IdentityProfile, tokens: &TokenSet) -> Self {
		Self {
			id: profile.id,
			display_name: profile.display_name,
			access_token: tokens.access_token.clone(),
			refresh_token: tokens.refresh_token.clone(),
			expires_at: tokens.expires_at,
			corporation_id: profile.corporation_id,
			alliance_id: profile.alliance_id,
		}
	}

	/// Returns `true` while the credential stays outside the safety margin.
	///
	/// Usability is derived, never stored: `now < expires_at - SAFETY_MARGIN`.
	pub fn is_usable_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.expires_at - SAFETY_MARGIN
	}

	/// Convenience helper that checks usability against the current UTC clock.
	pub fn is_usable(&self) -> bool {
		self.is_usable_at(OffsetDateTime::now_utc())
	}

	/// Installs a rotated token set. The update replaces the full triple.
	pub fn install(&mut self, tokens: &TokenSet) {
		self.access_token = tokens.access_token.clone();
		self.refresh_token = tokens.refresh_token.clone();
		self.expires_at = tokens.expires_at;
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("id", &self.id)
			.field("display_name", &self.display_name)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("corporation_id", &self.corporation_id)
			.field("alliance_id", &self.alliance_id)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn credential_expiring_in(delta: Duration) -> Credential {
		let tokens = TokenSet {
			access_token: TokenSecret::new("access"),
			refresh_token: TokenSecret::new("refresh"),
			expires_at: OffsetDateTime::now_utc() + delta,
			scope: None,
		};

		Credential::from_token_set(IdentityProfile::new(IdentityId::new(1), "Pilot One"), &tokens)
	}

	#[test]
	fn usability_respects_the_safety_margin() {
		assert!(
			!credential_expiring_in(Duration::minutes(4)).is_usable(),
			"Four minutes of lifetime sits inside the five-minute margin.",
		);
		assert!(
			credential_expiring_in(Duration::minutes(6)).is_usable(),
			"Six minutes of lifetime clears the five-minute margin.",
		);
		assert!(!credential_expiring_in(Duration::seconds(-1)).is_usable());
	}

	#[test]
	fn install_replaces_the_full_triple() {
		let mut credential = credential_expiring_in(Duration::hours(1));
		let rotated = TokenSet {
			access_token: TokenSecret::new("access-2"),
			refresh_token: TokenSecret::new("refresh-2"),
			expires_at: OffsetDateTime::now_utc() + Duration::hours(2),
			scope: None,
		};

		credential.install(&rotated);

		assert_eq!(credential.access_token.expose(), "access-2");
		assert_eq!(credential.refresh_token.expose(), "refresh-2");
		assert_eq!(credential.expires_at, rotated.expires_at);
	}

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");

		let rendered = format!("{:?}", credential_expiring_in(Duration::hours(1)));

		assert!(!rendered.contains("access"), "Credential debug output must not leak tokens.");
	}
}
