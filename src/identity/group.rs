//! User-defined identity groupings, persisted independently of sessions.

// self
use crate::{
	_prelude::*,
	identity::{GroupId, IdentityId},
};

/// Named set of identity ids for user-level organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGroup {
	/// Group identifier.
	pub id: GroupId,
	/// User-chosen name.
	pub name: String,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Member identity ids.
	pub members: BTreeSet<IdentityId>,
}
impl IdentityGroup {
	/// Creates a group stamped with the current clock.
	pub fn new(
		id: GroupId,
		name: impl Into<String>,
		members: impl IntoIterator<Item = IdentityId>,
	) -> Self {
		Self {
			id,
			name: name.into(),
			created_at: OffsetDateTime::now_utc(),
			members: members.into_iter().collect(),
		}
	}

	/// Returns `true` when the identity belongs to this group.
	pub fn contains(&self, id: IdentityId) -> bool {
		self.members.contains(&id)
	}

	/// Number of member identities.
	pub fn len(&self) -> usize {
		self.members.len()
	}

	/// Returns `true` when the group has no members.
	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}
}
