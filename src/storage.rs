//! Storage contracts: the secret vault and the session persistence store.
//!
//! Both contracts are deliberately opaque. The at-rest mechanism (OS
//! credential vault, encrypted file, plain memory) is an implementation
//! detail, swappable per target platform; the registry only ever talks to the
//! traits defined here.

pub mod session;
pub mod vault;

pub use session::{FileSessionStore, MemorySessionStore};
pub use vault::{EncryptedFileVault, MemoryVault};

// self
use crate::{
	_prelude::*,
	identity::{GroupId, IdentityGroup, IdentityId, TokenSecret},
};

/// Boxed future returned by storage implementations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + 'a + Send>>;

/// Error type produced by [`SecretVault`] and [`SessionStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StorageError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure (IO, rename, sync).
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Encryption or decryption failure in an at-rest encrypted backend.
	#[error("Cryptographic failure: {message}.")]
	Crypto {
		/// Human-readable error payload.
		message: String,
	},
}

/// Durable (access, refresh, expiry) triple held per identity.
///
/// This is the only shape the vault ever sees; the full [`Credential`] object
/// stays inside the registry.
///
/// [`Credential`]: crate::identity::Credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTriple {
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret.
	pub refresh_token: TokenSecret,
	/// Absolute expiry instant of the access token.
	pub expires_at: OffsetDateTime,
}

/// At-rest persistence contract for per-identity token triples.
pub trait SecretVault
where
	Self: Send + Sync,
{
	/// Persists or replaces the triple for the provided identity.
	fn store(&self, id: IdentityId, triple: TokenTriple) -> StorageFuture<'_, ()>;

	/// Fetches the triple for the provided identity, if present.
	fn fetch(&self, id: IdentityId) -> StorageFuture<'_, Option<TokenTriple>>;

	/// Removes the triple for the provided identity. Removing an absent
	/// identity is not an error.
	fn remove(&self, id: IdentityId) -> StorageFuture<'_, ()>;
}

/// Durable per-identity session record used for warm restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
	/// Identity this record describes.
	pub id: IdentityId,
	/// Human-readable display name.
	pub display_name: String,
	/// User-defined groups the identity belongs to.
	pub group_ids: Vec<GroupId>,
	/// Last known token expiry instant.
	pub expires_at: OffsetDateTime,
	/// Last instant the identity was used or refreshed.
	pub last_accessed: OffsetDateTime,
}

/// Durable snapshot contract for the session registry.
///
/// Holds per-identity records, user-defined groups, the active-identity
/// pointer, and the process session-start marker used for uptime reporting.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Persists or replaces one session record.
	fn save_record(&self, record: SessionRecord) -> StorageFuture<'_, ()>;

	/// Fetches one session record, if present.
	fn fetch_record(&self, id: IdentityId) -> StorageFuture<'_, Option<SessionRecord>>;

	/// Removes one session record. Removing an absent record is not an error.
	fn remove_record(&self, id: IdentityId) -> StorageFuture<'_, ()>;

	/// Lists every persisted session record.
	fn list_records(&self) -> StorageFuture<'_, Vec<SessionRecord>>;

	/// Persists or replaces one identity group.
	fn save_group(&self, group: IdentityGroup) -> StorageFuture<'_, ()>;

	/// Removes one identity group. Removing an absent group is not an error.
	fn remove_group(&self, id: GroupId) -> StorageFuture<'_, ()>;

	/// Lists every persisted identity group.
	fn list_groups(&self) -> StorageFuture<'_, Vec<IdentityGroup>>;

	/// Persists the active-identity pointer (`None` clears it).
	fn set_active(&self, id: Option<IdentityId>) -> StorageFuture<'_, ()>;

	/// Returns the persisted active-identity pointer.
	fn active(&self) -> StorageFuture<'_, Option<IdentityId>>;

	/// Stamps the process session-start marker.
	fn mark_session_start(&self, at: OffsetDateTime) -> StorageFuture<'_, ()>;

	/// Returns the process session-start marker, if one was stamped.
	fn session_start(&self) -> StorageFuture<'_, Option<OffsetDateTime>>;

	/// Removes session records whose `last_accessed` predates `cutoff`,
	/// returning how many were pruned.
	fn prune(&self, cutoff: OffsetDateTime) -> StorageFuture<'_, usize>;
}
