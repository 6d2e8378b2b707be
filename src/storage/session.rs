//! Built-in [`SessionStore`] backends: in-memory and JSON file snapshot.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	identity::{GroupId, IdentityGroup, IdentityId},
	storage::{SessionRecord, SessionStore, StorageError, StorageFuture},
};

/// Complete durable state managed by a session store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SessionSnapshot {
	records: HashMap<IdentityId, SessionRecord>,
	groups: HashMap<GroupId, IdentityGroup>,
	active: Option<IdentityId>,
	session_started: Option<OffsetDateTime>,
}
impl SessionSnapshot {
	fn prune(&mut self, cutoff: OffsetDateTime) -> usize {
		let before = self.records.len();

		self.records.retain(|_, record| record.last_accessed >= cutoff);

		before - self.records.len()
	}
}

type SharedSnapshot = Arc<RwLock<SessionSnapshot>>;

/// Thread-safe session store that keeps everything in-process.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore(SharedSnapshot);
impl SessionStore for MemorySessionStore {
	fn save_record(&self, record: SessionRecord) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().records.insert(record.id, record);

			Ok(())
		})
	}

	fn fetch_record(&self, id: IdentityId) -> StorageFuture<'_, Option<SessionRecord>> {
		Box::pin(async move { Ok(self.0.read().records.get(&id).cloned()) })
	}

	fn remove_record(&self, id: IdentityId) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().records.remove(&id);

			Ok(())
		})
	}

	fn list_records(&self) -> StorageFuture<'_, Vec<SessionRecord>> {
		Box::pin(async move { Ok(self.0.read().records.values().cloned().collect()) })
	}

	fn save_group(&self, group: IdentityGroup) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().groups.insert(group.id, group);

			Ok(())
		})
	}

	fn remove_group(&self, id: GroupId) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().groups.remove(&id);

			Ok(())
		})
	}

	fn list_groups(&self) -> StorageFuture<'_, Vec<IdentityGroup>> {
		Box::pin(async move { Ok(self.0.read().groups.values().cloned().collect()) })
	}

	fn set_active(&self, id: Option<IdentityId>) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().active = id;

			Ok(())
		})
	}

	fn active(&self) -> StorageFuture<'_, Option<IdentityId>> {
		Box::pin(async move { Ok(self.0.read().active) })
	}

	fn mark_session_start(&self, at: OffsetDateTime) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().session_started = Some(at);

			Ok(())
		})
	}

	fn session_start(&self) -> StorageFuture<'_, Option<OffsetDateTime>> {
		Box::pin(async move { Ok(self.0.read().session_started) })
	}

	fn prune(&self, cutoff: OffsetDateTime) -> StorageFuture<'_, usize> {
		Box::pin(async move { Ok(self.0.write().prune(cutoff)) })
	}
}

/// Session store that persists a pretty-printed JSON snapshot after each
/// mutation, using a temporary file and an atomic rename.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
	path: PathBuf,
	inner: SharedSnapshot,
}
impl FileSessionStore {
	/// Opens (or creates) a store at the provided path, eagerly loading any
	/// existing snapshot.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot =
			if path.exists() { Self::load_snapshot(&path)? } else { SessionSnapshot::default() };

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	fn load_snapshot(path: &Path) -> Result<SessionSnapshot, StorageError> {
		let bytes = fs::read(path).map_err(|e| StorageError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(SessionSnapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StorageError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StorageError::Backend {
				message: format!("Failed to create session directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(snapshot).map_err(|e| StorageError::Serialization {
				message: format!("Failed to serialize session snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StorageError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StorageError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StorageError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate<R>(
		&self,
		apply: impl FnOnce(&mut SessionSnapshot) -> R,
	) -> Result<R, StorageError> {
		let mut guard = self.inner.write();
		let result = apply(&mut guard);

		self.persist_locked(&guard)?;

		Ok(result)
	}
}
impl SessionStore for FileSessionStore {
	fn save_record(&self, record: SessionRecord) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.records.insert(record.id, record);
			})
		})
	}

	fn fetch_record(&self, id: IdentityId) -> StorageFuture<'_, Option<SessionRecord>> {
		Box::pin(async move { Ok(self.inner.read().records.get(&id).cloned()) })
	}

	fn remove_record(&self, id: IdentityId) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.records.remove(&id);
			})
		})
	}

	fn list_records(&self) -> StorageFuture<'_, Vec<SessionRecord>> {
		Box::pin(async move { Ok(self.inner.read().records.values().cloned().collect()) })
	}

	fn save_group(&self, group: IdentityGroup) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.groups.insert(group.id, group);
			})
		})
	}

	fn remove_group(&self, id: GroupId) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.groups.remove(&id);
			})
		})
	}

	fn list_groups(&self) -> StorageFuture<'_, Vec<IdentityGroup>> {
		Box::pin(async move { Ok(self.inner.read().groups.values().cloned().collect()) })
	}

	fn set_active(&self, id: Option<IdentityId>) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.active = id;
			})
		})
	}

	fn active(&self) -> StorageFuture<'_, Option<IdentityId>> {
		Box::pin(async move { Ok(self.inner.read().active) })
	}

	fn mark_session_start(&self, at: OffsetDateTime) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.session_started = Some(at);
			})
		})
	}

	fn session_start(&self) -> StorageFuture<'_, Option<OffsetDateTime>> {
		Box::pin(async move { Ok(self.inner.read().session_started) })
	}

	fn prune(&self, cutoff: OffsetDateTime) -> StorageFuture<'_, usize> {
		Box::pin(async move { self.mutate(|snapshot| snapshot.prune(cutoff)) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"fleetkey_sessions_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record(id: u64, last_accessed: OffsetDateTime) -> SessionRecord {
		SessionRecord {
			id: IdentityId::new(id),
			display_name: format!("Pilot {id}"),
			group_ids: Vec::new(),
			expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
			last_accessed,
		}
	}

	#[test]
	fn snapshot_survives_reopen() {
		let path = temp_path();
		let store = FileSessionStore::open(&path).expect("Failed to open session store.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for session test.");
		let now = OffsetDateTime::now_utc();

		rt.block_on(store.save_record(build_record(1, now))).expect("Failed to save record.");
		rt.block_on(store.save_group(IdentityGroup::new(GroupId::new(5), "Alts", [
			IdentityId::new(1),
		])))
		.expect("Failed to save group.");
		rt.block_on(store.set_active(Some(IdentityId::new(1)))).expect("Failed to set active.");
		rt.block_on(store.mark_session_start(now)).expect("Failed to mark session start.");
		drop(store);

		let reopened = FileSessionStore::open(&path).expect("Failed to reopen session store.");

		assert_eq!(
			rt.block_on(reopened.list_records()).expect("Failed to list records.").len(),
			1
		);
		assert_eq!(rt.block_on(reopened.list_groups()).expect("Failed to list groups.").len(), 1);
		assert_eq!(
			rt.block_on(reopened.active()).expect("Failed to read active pointer."),
			Some(IdentityId::new(1))
		);
		assert!(
			rt.block_on(reopened.session_start())
				.expect("Failed to read session start.")
				.is_some()
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary session snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn prune_drops_only_stale_records() {
		let store = MemorySessionStore::default();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for session test.");
		let now = OffsetDateTime::now_utc();

		rt.block_on(store.save_record(build_record(1, now))).expect("Failed to save record.");
		rt.block_on(store.save_record(build_record(2, now - Duration::days(60))))
			.expect("Failed to save record.");

		let pruned = rt
			.block_on(store.prune(now - Duration::days(30)))
			.expect("Prune should succeed.");

		assert_eq!(pruned, 1);

		let remaining = rt.block_on(store.list_records()).expect("Failed to list records.");

		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].id, IdentityId::new(1));
	}
}
