//! Multi-identity session registry: the single source of truth for every
//! authenticated principal held by the process.
//!
//! The registry owns credentials exclusively. Callers never receive a live
//! reference into registry state; every read hands out a clone taken under the
//! lock, and every token rotation installs the full triple atomically so no
//! observer can see a new access token paired with an old expiry.

pub mod sweeps;

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	events::AuditEvent,
	http::TokenTransport,
	identity::{Credential, GroupId, IdentityGroup, IdentityId, IdentityProfile},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	sso::{SsoClient, TokenSet},
	storage::{SecretVault, SessionRecord, SessionStore, StorageError, TokenTriple},
};

/// Default identity ceiling: one account's worth of characters plus headroom.
pub const DEFAULT_CAPACITY: usize = 25;

/// Tunable knobs for the registry.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
	/// Maximum number of identities the registry will admit.
	pub capacity: usize,
}
impl Default for RegistryConfig {
	fn default() -> Self {
		Self { capacity: DEFAULT_CAPACITY }
	}
}

/// One failed entry in a bulk refresh pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkRefreshFailure {
	/// Identity whose refresh failed.
	pub identity: IdentityId,
	/// Rendered failure reason.
	pub reason: String,
}

/// Aggregated outcome of one bulk refresh pass.
///
/// A pass never aborts early; every registered identity is attempted and the
/// counts always satisfy `succeeded + failed == attempted identities`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkRefreshReport {
	/// Number of identities whose tokens rotated successfully.
	pub succeeded: usize,
	/// Per-identity failures, in completion order.
	pub failures: Vec<BulkRefreshFailure>,
}
impl BulkRefreshReport {
	/// Number of identities whose refresh failed.
	pub fn failed(&self) -> usize {
		self.failures.len()
	}

	/// Number of identities attempted.
	pub fn attempted(&self) -> usize {
		self.succeeded + self.failures.len()
	}
}

struct RegistryInner<T>
where
	T: ?Sized + TokenTransport,
{
	sso: SsoClient<T>,
	vault: Arc<dyn SecretVault>,
	sessions: Arc<dyn SessionStore>,
	capacity: usize,
	entries: RwLock<HashMap<IdentityId, Credential>>,
	groups: RwLock<HashMap<GroupId, IdentityGroup>>,
	active: RwLock<Option<IdentityId>>,
	// Per-identity singleflight guards: concurrent refreshes of the same
	// identity coalesce into one remote call.
	refresh_guards: Mutex<HashMap<IdentityId, Arc<AsyncMutex<()>>>>,
}

/// Shared handle to the session registry.
///
/// Cloning is cheap; the interactive caller and both background sweeps hold
/// clones of the same registry.
pub struct SessionRegistry<T>(Arc<RegistryInner<T>>)
where
	T: ?Sized + TokenTransport;
impl<T> Clone for SessionRegistry<T>
where
	T: ?Sized + TokenTransport,
{
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<T> Debug for SessionRegistry<T>
where
	T: ?Sized + TokenTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionRegistry")
			.field("capacity", &self.0.capacity)
			.field("identities", &self.0.entries.read().len())
			.field("groups", &self.0.groups.read().len())
			.field("active", &self.0.active.read())
			.finish()
	}
}
impl<T> SessionRegistry<T>
where
	T: ?Sized + TokenTransport,
{
	/// Creates a registry on top of the provided flow driver and stores.
	pub fn new(
		sso: SsoClient<T>,
		vault: Arc<dyn SecretVault>,
		sessions: Arc<dyn SessionStore>,
		config: RegistryConfig,
	) -> Self {
		Self(Arc::new(RegistryInner {
			sso,
			vault,
			sessions,
			capacity: config.capacity,
			entries: RwLock::new(HashMap::new()),
			groups: RwLock::new(HashMap::new()),
			active: RwLock::new(None),
			refresh_guards: Mutex::new(HashMap::new()),
		}))
	}

	/// Flow driver shared with this registry, for building authorization URLs.
	pub fn sso(&self) -> &SsoClient<T> {
		&self.0.sso
	}

	/// Number of registered identities.
	pub fn len(&self) -> usize {
		self.0.entries.read().len()
	}

	/// Returns `true` when no identity is registered.
	pub fn is_empty(&self) -> bool {
		self.0.entries.read().is_empty()
	}

	/// Returns `true` when the identity is registered.
	pub fn contains(&self, id: IdentityId) -> bool {
		self.0.entries.read().contains_key(&id)
	}

	/// Snapshot of one credential, if registered.
	pub fn identity(&self, id: IdentityId) -> Option<Credential> {
		self.0.entries.read().get(&id).cloned()
	}

	/// Every registered identity id, in ascending order.
	pub fn identity_ids(&self) -> Vec<IdentityId> {
		let mut ids: Vec<_> = self.0.entries.read().keys().copied().collect();

		ids.sort_unstable();

		ids
	}

	/// Snapshot of every registered credential, ordered by identity id.
	pub fn credentials(&self) -> Vec<Credential> {
		let mut all: Vec<_> = self.0.entries.read().values().cloned().collect();

		all.sort_by_key(|credential| credential.id);

		all
	}

	/// Currently active identity, if one is set.
	pub fn active(&self) -> Option<IdentityId> {
		*self.0.active.read()
	}

	/// Credential of the currently active identity, if one is set.
	pub fn active_credential(&self) -> Option<Credential> {
		let id = self.active()?;

		self.identity(id)
	}

	/// Returns a credential guaranteed to stay usable for the safety margin,
	/// refreshing transparently when the cached one is too close to expiry.
	///
	/// Concurrent calls for the same identity coalesce into one remote
	/// refresh; the losers wait and receive the rotated credential.
	pub async fn get_credential(
		&self,
		id: IdentityId,
		cancel: &CancellationToken,
	) -> Result<Credential> {
		{
			let entries = self.0.entries.read();
			let credential = entries.get(&id).ok_or(Error::IdentityNotFound { id })?;

			if credential.is_usable() {
				return Ok(credential.clone());
			}
		}

		self.refresh_inner(id, cancel, false).await
	}

	/// Rotates an identity's tokens now, regardless of remaining lifetime.
	pub async fn refresh_identity(
		&self,
		id: IdentityId,
		cancel: &CancellationToken,
	) -> Result<Credential> {
		self.refresh_inner(id, cancel, true).await
	}

	async fn refresh_inner(
		&self,
		id: IdentityId,
		cancel: &CancellationToken,
		force: bool,
	) -> Result<Credential> {
		let guard = self.refresh_guard(id);
		let _permit = guard.lock().await;
		// A concurrent caller may have rotated the tokens while this one
		// waited on the guard.
		let refresh_token = {
			let entries = self.0.entries.read();
			let credential = entries.get(&id).ok_or(Error::IdentityNotFound { id })?;

			if !force && credential.is_usable() {
				return Ok(credential.clone());
			}

			credential.refresh_token.clone()
		};
		let tokens = self.0.sso.refresh(refresh_token.expose(), cancel).await?;
		let credential = self.install_tokens(id, &tokens)?;

		self.persist_credential(&credential).await;
		self.0.sso.emit(AuditEvent::TokenRefreshed { identity: id, at: OffsetDateTime::now_utc() });

		Ok(credential)
	}

	fn refresh_guard(&self, id: IdentityId) -> Arc<AsyncMutex<()>> {
		self.0.refresh_guards.lock().entry(id).or_default().clone()
	}

	/// Installs rotated tokens under the write lock so no reader can observe a
	/// partially updated triple.
	fn install_tokens(&self, id: IdentityId, tokens: &TokenSet) -> Result<Credential> {
		let mut entries = self.0.entries.write();
		// Removal can race a refresh; the rotated tokens are discarded then.
		let credential = entries.get_mut(&id).ok_or(Error::IdentityNotFound { id })?;

		credential.install(tokens);

		Ok(credential.clone())
	}

	/// Admits a freshly authenticated identity.
	///
	/// Re-admitting a registered identity replaces its credential without
	/// counting against capacity. The first admitted identity becomes active
	/// automatically.
	pub async fn admit(&self, profile: IdentityProfile, tokens: &TokenSet) -> Result<Credential> {
		let id = profile.id;
		let credential = Credential::from_token_set(profile, tokens);

		{
			let mut entries = self.0.entries.write();

			if !entries.contains_key(&id) && entries.len() >= self.0.capacity {
				return Err(Error::CapacityExceeded { limit: self.0.capacity });
			}

			entries.insert(id, credential.clone());
		}

		let became_active = {
			let mut active = self.0.active.write();

			if active.is_none() {
				*active = Some(id);

				true
			} else {
				false
			}
		};

		self.0.vault.store(id, triple_of(&credential)).await?;
		self.0.sessions.save_record(self.record_of(&credential)).await?;

		if became_active {
			self.0.sessions.set_active(Some(id)).await?;
		}

		self.0.sso.emit(AuditEvent::IdentityAdded { identity: id, at: OffsetDateTime::now_utc() });

		Ok(credential)
	}

	/// Completes a login end to end: exchanges the authorization code bound to
	/// `state`, then admits the identity.
	pub async fn complete_login(
		&self,
		profile: IdentityProfile,
		code: &str,
		state: &str,
		cancel: &CancellationToken,
	) -> Result<Credential> {
		let tokens = self.0.sso.complete_authorization(code, state, cancel).await?;

		self.admit(profile, &tokens).await
	}

	/// Re-registers an identity from its vaulted triple, without a fresh
	/// authorization flow.
	pub async fn add_identity(&self, profile: IdentityProfile) -> Result<Credential> {
		let id = profile.id;
		let triple =
			self.0.vault.fetch(id).await?.ok_or(Error::IdentityNotFound { id })?;
		let tokens = TokenSet {
			access_token: triple.access_token,
			refresh_token: triple.refresh_token,
			expires_at: triple.expires_at,
			scope: None,
		};

		self.admit(profile, &tokens).await
	}

	/// Removes an identity, its vaulted secrets, and its session record.
	pub async fn remove_identity(&self, id: IdentityId) -> Result<()> {
		if self.0.entries.write().remove(&id).is_none() {
			return Err(Error::IdentityNotFound { id });
		}

		// An in-flight refresh keeps its guard alive through the Arc; new
		// callers get IdentityNotFound before ever reaching the network.
		self.0.refresh_guards.lock().remove(&id);

		let cleared_active = {
			let mut active = self.0.active.write();

			if *active == Some(id) {
				*active = None;

				true
			} else {
				false
			}
		};
		let orphaned_groups: Vec<_> = {
			let mut groups = self.0.groups.write();

			groups
				.values_mut()
				.filter_map(|group| group.members.remove(&id).then(|| group.clone()))
				.collect()
		};

		self.0.vault.remove(id).await?;
		self.0.sessions.remove_record(id).await?;

		if cleared_active {
			self.0.sessions.set_active(None).await?;
		}
		for group in orphaned_groups {
			self.0.sessions.save_group(group).await?;
		}

		self.0.sso.emit(AuditEvent::IdentityRemoved { identity: id, at: OffsetDateTime::now_utc() });

		Ok(())
	}

	/// Moves the active-identity pointer.
	///
	/// The target must be registered and hold a usable credential. A stale
	/// one is refreshed first; when that refresh fails the pointer stays
	/// where it was.
	pub async fn switch_active(&self, id: IdentityId, cancel: &CancellationToken) -> Result<()> {
		self.get_credential(id, cancel).await?;

		*self.0.active.write() = Some(id);

		self.0.sessions.set_active(Some(id)).await?;
		self.0
			.sso
			.emit(AuditEvent::IdentitySwitched { identity: id, at: OffsetDateTime::now_utc() });

		Ok(())
	}

	/// Creates a named group over registered identities.
	pub async fn create_group(
		&self,
		name: impl Into<String>,
		members: impl IntoIterator<Item = IdentityId>,
	) -> Result<IdentityGroup> {
		let members: BTreeSet<_> = members.into_iter().collect();

		{
			let entries = self.0.entries.read();

			if let Some(missing) = members.iter().find(|id| !entries.contains_key(id)) {
				return Err(Error::IdentityNotFound { id: *missing });
			}
		}

		let id = GroupId::new(rand::rng().random());
		let group = IdentityGroup::new(id, name, members);

		self.0.groups.write().insert(id, group.clone());
		self.0.sessions.save_group(group.clone()).await?;

		Ok(group)
	}

	/// Deletes a group. Deleting an absent group is not an error.
	pub async fn delete_group(&self, id: GroupId) -> Result<()> {
		self.0.groups.write().remove(&id);
		self.0.sessions.remove_group(id).await?;

		Ok(())
	}

	/// Snapshot of every group, ordered by group id.
	pub fn list_groups(&self) -> Vec<IdentityGroup> {
		let mut all: Vec<_> = self.0.groups.read().values().cloned().collect();

		all.sort_by_key(|group| group.id);

		all
	}

	/// Snapshot of one group, if present.
	pub fn group(&self, id: GroupId) -> Option<IdentityGroup> {
		self.0.groups.read().get(&id).cloned()
	}

	/// Rotates tokens for every registered identity concurrently and reports
	/// the aggregate outcome.
	///
	/// Individual failures never abort the pass; they land in the report
	/// instead.
	pub async fn bulk_refresh(&self, cancel: &CancellationToken) -> BulkRefreshReport {
		obs::record_flow_outcome(FlowKind::BulkRefresh, FlowOutcome::Attempt);

		let handles: Vec<_> = self
			.identity_ids()
			.into_iter()
			.map(|id| {
				let registry = self.clone();
				let cancel = cancel.clone();
				let span = FlowSpan::for_identity(FlowKind::BulkRefresh, "bulk_refresh", id);

				(
					id,
					tokio::spawn(
						span.instrument(
							async move { registry.refresh_identity(id, &cancel).await },
						),
					),
				)
			})
			.collect();
		let mut report = BulkRefreshReport::default();

		for (id, handle) in handles {
			let result = match handle.await {
				Ok(result) => result,
				Err(e) => Err(Error::RefreshFailed {
					status: None,
					reason: format!("refresh task aborted: {e}"),
				}),
			};

			match result {
				Ok(_) => report.succeeded += 1,
				Err(e) =>
					report.failures.push(BulkRefreshFailure { identity: id, reason: e.to_string() }),
			}
		}

		self.0.sso.emit(AuditEvent::BulkRefreshCompleted {
			succeeded: report.succeeded,
			failed: report.failed(),
			at: OffsetDateTime::now_utc(),
		});
		obs::record_flow_outcome(FlowKind::BulkRefresh, if report.failures.is_empty() {
			FlowOutcome::Success
		} else {
			FlowOutcome::Failure
		});

		report
	}

	/// Probes the verify endpoint with an identity's current access token.
	pub async fn validate_identity(
		&self,
		id: IdentityId,
		cancel: &CancellationToken,
	) -> Result<bool> {
		let access_token = self
			.0
			.entries
			.read()
			.get(&id)
			.map(|credential| credential.access_token.clone())
			.ok_or(Error::IdentityNotFound { id })?;

		self.0.sso.validate(access_token.expose(), cancel).await
	}

	/// Identities that will fall inside the safety margin within `horizon`.
	pub fn stale_identities(&self, horizon: Duration) -> Vec<IdentityId> {
		let deadline = OffsetDateTime::now_utc() + horizon;
		let mut stale: Vec<_> = self
			.0
			.entries
			.read()
			.values()
			.filter(|credential| !credential.is_usable_at(deadline))
			.map(|credential| credential.id)
			.collect();

		stale.sort_unstable();

		stale
	}

	/// Drops an identity from the in-memory registry and its session record.
	///
	/// The vaulted triple is kept unless `purge_secrets` is set, so the
	/// identity can be re-added without a fresh authorization flow. Evicting
	/// an absent identity is a no-op; storage failures are logged rather than
	/// propagated because eviction runs inside background sweeps.
	pub async fn evict(&self, id: IdentityId, purge_secrets: bool) {
		if self.0.entries.write().remove(&id).is_none() {
			return;
		}

		self.0.refresh_guards.lock().remove(&id);

		{
			let mut active = self.0.active.write();

			if *active == Some(id) {
				*active = None;
			}
		}

		if let Err(e) = self.0.sessions.remove_record(id).await {
			log_storage_failure("session", &e);
		}
		if purge_secrets && let Err(e) = self.0.vault.remove(id).await {
			log_storage_failure("vault", &e);
		}

		self.0.sso.emit(AuditEvent::IdentityRemoved { identity: id, at: OffsetDateTime::now_utc() });
	}

	/// Rebuilds the in-memory registry from the session store and the vault.
	///
	/// Records whose vaulted triple is gone are dropped from the store; there
	/// is nothing left to restore for them. Returns the number of identities
	/// restored.
	pub async fn restore(&self) -> Result<usize> {
		let records = self.0.sessions.list_records().await?;
		let groups = self.0.sessions.list_groups().await?;
		let mut restored = 0;

		for record in records {
			let Some(triple) = self.0.vault.fetch(record.id).await? else {
				self.0.sessions.remove_record(record.id).await?;

				continue;
			};
			let credential = Credential {
				id: record.id,
				display_name: record.display_name,
				access_token: triple.access_token,
				refresh_token: triple.refresh_token,
				expires_at: triple.expires_at,
				corporation_id: None,
				alliance_id: None,
			};

			self.0.entries.write().insert(record.id, credential);

			restored += 1;
		}

		{
			let mut map = self.0.groups.write();

			for group in groups {
				map.insert(group.id, group);
			}
		}

		let persisted_active = self.0.sessions.active().await?;
		let active = persisted_active.filter(|id| self.contains(*id));

		*self.0.active.write() = active;

		self.0.sessions.mark_session_start(OffsetDateTime::now_utc()).await?;

		Ok(restored)
	}

	/// Removes session records untouched since `cutoff`, returning the count.
	pub async fn prune_sessions(&self, cutoff: OffsetDateTime) -> Result<usize> {
		Ok(self.0.sessions.prune(cutoff).await?)
	}

	fn record_of(&self, credential: &Credential) -> SessionRecord {
		let group_ids = self
			.0
			.groups
			.read()
			.values()
			.filter(|group| group.contains(credential.id))
			.map(|group| group.id)
			.collect();

		SessionRecord {
			id: credential.id,
			display_name: credential.display_name.clone(),
			group_ids,
			expires_at: credential.expires_at,
			last_accessed: OffsetDateTime::now_utc(),
		}
	}

	/// Persists a rotated credential. A refresh must not fail because a disk
	/// write did, so failures are logged and the in-memory state stands.
	async fn persist_credential(&self, credential: &Credential) {
		if let Err(e) = self.0.vault.store(credential.id, triple_of(credential)).await {
			log_storage_failure("vault", &e);
		}
		if let Err(e) = self.0.sessions.save_record(self.record_of(credential)).await {
			log_storage_failure("session", &e);
		}
	}
}

fn triple_of(credential: &Credential) -> TokenTriple {
	TokenTriple {
		access_token: credential.access_token.clone(),
		refresh_token: credential.refresh_token.clone(),
		expires_at: credential.expires_at,
	}
}

fn log_storage_failure(stage: &str, error: &StorageError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(target: "fleetkey.registry", stage, error = %error, "storage write failed");
	#[cfg(not(feature = "tracing"))]
	let _ = (stage, error);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		identity::TokenSecret,
		storage::{MemorySessionStore, MemoryVault},
	};

	fn build_registry(
		transport: ScriptedTransport,
		config: RegistryConfig,
	) -> (SessionRegistry<ScriptedTransport>, Arc<ScriptedTransport>) {
		let transport = Arc::new(transport);
		let sso = SsoClient::with_transport(test_sso_config(), transport.clone());
		let registry = SessionRegistry::new(
			sso,
			Arc::new(MemoryVault::default()),
			Arc::new(MemorySessionStore::default()),
			config,
		);

		(registry, transport)
	}

	fn tokens_expiring_in(tag: &str, delta: Duration) -> TokenSet {
		TokenSet {
			access_token: TokenSecret::new(format!("access-{tag}")),
			refresh_token: TokenSecret::new(tag),
			expires_at: OffsetDateTime::now_utc() + delta,
			scope: None,
		}
	}

	async fn admit_one(
		registry: &SessionRegistry<ScriptedTransport>,
		id: u64,
		delta: Duration,
	) -> Credential {
		let tag = format!("rt-{id}");

		registry
			.admit(
				IdentityProfile::new(IdentityId::new(id), format!("Pilot {id}")),
				&tokens_expiring_in(&tag, delta),
			)
			.await
			.expect("Admitting a fixture identity should succeed.")
	}

	#[tokio::test]
	async fn a_usable_credential_is_served_without_a_remote_call() {
		let (registry, transport) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		admit_one(&registry, 1_001, Duration::hours(1)).await;

		let credential = registry
			.get_credential(IdentityId::new(1_001), &cancel)
			.await
			.expect("A fresh credential should be served from memory.");

		assert_eq!(credential.access_token.expose(), "access-rt-1001");
		assert_eq!(transport.call_count(), 0);
	}

	#[tokio::test]
	async fn a_stale_credential_is_refreshed_transparently() {
		let (registry, transport) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		admit_one(&registry, 1_001, Duration::minutes(2)).await;

		let credential = registry
			.get_credential(IdentityId::new(1_001), &cancel)
			.await
			.expect("A stale credential should refresh transparently.");

		assert_eq!(credential.access_token.expose(), "rotated-rt-1001");
		assert_eq!(credential.refresh_token.expose(), "rt-1001-next");
		assert!(credential.is_usable());
		assert_eq!(transport.call_count(), 1);
	}

	#[tokio::test]
	async fn concurrent_refreshes_coalesce_into_one_remote_call() {
		let (registry, transport) = build_registry(
			ScriptedTransport {
				delay: Some(std::time::Duration::from_millis(50)),
				..Default::default()
			},
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();
		let id = IdentityId::new(1_001);

		admit_one(&registry, 1_001, Duration::minutes(2)).await;

		let (a, b, c) = tokio::join!(
			registry.get_credential(id, &cancel),
			registry.get_credential(id, &cancel),
			registry.get_credential(id, &cancel),
		);
		let a = a.expect("First concurrent caller should succeed.");
		let b = b.expect("Second concurrent caller should succeed.");
		let c = c.expect("Third concurrent caller should succeed.");

		assert_eq!(transport.call_count(), 1, "Concurrent refreshes must coalesce.");
		assert_eq!(a.access_token, b.access_token);
		assert_eq!(b.access_token, c.access_token);
	}

	#[tokio::test]
	async fn a_failed_refresh_keeps_the_identity_registered() {
		let (registry, _) = build_registry(
			ScriptedTransport::rejecting(&["rt-1001"]),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();
		let id = IdentityId::new(1_001);

		admit_one(&registry, 1_001, Duration::minutes(2)).await;

		let err = registry
			.get_credential(id, &cancel)
			.await
			.expect_err("A rejected refresh must surface.");

		assert!(matches!(err, Error::RefreshFailed { status: Some(400), .. }));
		assert!(registry.contains(id), "A failed refresh must not evict the identity.");
	}

	#[tokio::test]
	async fn capacity_is_enforced_and_readmission_is_free() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig { capacity: 2 },
		);

		admit_one(&registry, 1, Duration::hours(1)).await;
		admit_one(&registry, 2, Duration::hours(1)).await;

		let err = registry
			.admit(
				IdentityProfile::new(IdentityId::new(3), "Pilot 3"),
				&tokens_expiring_in("rt-3", Duration::hours(1)),
			)
			.await
			.expect_err("The registry must reject identities beyond its capacity.");

		assert!(matches!(err, Error::CapacityExceeded { limit: 2 }));

		// Replacing a registered identity does not count against capacity.
		admit_one(&registry, 2, Duration::hours(2)).await;

		assert_eq!(registry.len(), 2);
	}

	#[tokio::test]
	async fn bulk_refresh_aggregates_instead_of_aborting() {
		let (registry, transport) = build_registry(
			ScriptedTransport::rejecting(&["rt-2"]),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		for id in 1..=4 {
			admit_one(&registry, id, Duration::hours(1)).await;
		}

		let report = registry.bulk_refresh(&cancel).await;

		assert_eq!(report.succeeded, 3);
		assert_eq!(report.failed(), 1);
		assert_eq!(report.attempted(), 4);
		assert_eq!(report.failures[0].identity, IdentityId::new(2));
		assert!(report.failures[0].reason.contains("invalid_grant"));
		assert_eq!(transport.call_count(), 4);
	}

	#[tokio::test]
	async fn switching_and_removal_manage_the_active_pointer() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		admit_one(&registry, 1, Duration::hours(1)).await;
		admit_one(&registry, 2, Duration::hours(1)).await;

		// The first admitted identity became active automatically.
		assert_eq!(registry.active(), Some(IdentityId::new(1)));

		registry
			.switch_active(IdentityId::new(2), &cancel)
			.await
			.expect("Switching should succeed.");

		assert_eq!(registry.active(), Some(IdentityId::new(2)));

		registry.remove_identity(IdentityId::new(2)).await.expect("Removal should succeed.");

		assert_eq!(registry.active(), None);
		assert!(matches!(
			registry.switch_active(IdentityId::new(2), &cancel).await,
			Err(Error::IdentityNotFound { .. }),
		));
	}

	#[tokio::test]
	async fn switching_refreshes_a_stale_identity_first() {
		let (registry, transport) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		admit_one(&registry, 1, Duration::hours(1)).await;
		admit_one(&registry, 2, Duration::minutes(2)).await;

		registry
			.switch_active(IdentityId::new(2), &cancel)
			.await
			.expect("Switching to a refreshable identity should succeed.");

		assert_eq!(registry.active(), Some(IdentityId::new(2)));
		assert_eq!(transport.call_count(), 1);

		let credential = registry
			.identity(IdentityId::new(2))
			.expect("The new active identity should be registered.");

		assert!(credential.is_usable(), "The active identity must hold a usable credential.");
	}

	#[tokio::test]
	async fn switching_to_an_unrefreshable_identity_leaves_the_pointer() {
		let (registry, transport) = build_registry(
			ScriptedTransport::rejecting(&["rt-1002"]),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();

		admit_one(&registry, 1_001, Duration::hours(1)).await;
		admit_one(&registry, 1_002, Duration::minutes(2)).await;

		let err = registry
			.switch_active(IdentityId::new(1_002), &cancel)
			.await
			.expect_err("Switching to an unrefreshable identity must fail.");

		assert!(matches!(err, Error::RefreshFailed { status: Some(400), .. }));
		assert_eq!(transport.call_count(), 1, "The switch must have attempted a refresh.");
		assert_eq!(
			registry.active(),
			Some(IdentityId::new(1_001)),
			"A failed switch must not move the active pointer.",
		);
	}

	#[tokio::test]
	async fn groups_require_registered_members() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);

		admit_one(&registry, 1, Duration::hours(1)).await;

		let err = registry
			.create_group("Mining Alts", [IdentityId::new(1), IdentityId::new(9)])
			.await
			.expect_err("Groups must only reference registered identities.");

		assert!(matches!(err, Error::IdentityNotFound { id } if id == IdentityId::new(9)));

		let group = registry
			.create_group("Mining Alts", [IdentityId::new(1)])
			.await
			.expect("A valid group should be created.");

		assert_eq!(registry.list_groups(), vec![group.clone()]);

		registry.remove_identity(IdentityId::new(1)).await.expect("Removal should succeed.");

		assert!(
			registry.group(group.id).expect("The group should survive.").is_empty(),
			"Removing an identity must drop it from every group.",
		);
	}

	#[tokio::test]
	async fn restore_rebuilds_state_from_the_stores() {
		let vault = Arc::new(MemoryVault::default());
		let sessions = Arc::new(MemorySessionStore::default());
		let transport = Arc::new(ScriptedTransport::default());
		let build = || {
			SessionRegistry::new(
				SsoClient::with_transport(test_sso_config(), transport.clone()),
				vault.clone(),
				sessions.clone(),
				RegistryConfig::default(),
			)
		};
		let first = build();
		let cancel = CancellationToken::new();

		admit_one(&first, 1_001, Duration::hours(1)).await;
		admit_one(&first, 1_002, Duration::hours(1)).await;
		first
			.switch_active(IdentityId::new(1_002), &cancel)
			.await
			.expect("Switching should succeed.");
		drop(first);

		let second = build();
		let restored = second.restore().await.expect("Restore should succeed.");

		assert_eq!(restored, 2);
		assert_eq!(second.active(), Some(IdentityId::new(1_002)));

		let credential = second
			.identity(IdentityId::new(1_001))
			.expect("Restored identity should be present.");

		assert_eq!(credential.access_token.expose(), "access-rt-1001");
	}

	#[tokio::test]
	async fn eviction_keeps_the_vaulted_triple_for_readmission() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let id = IdentityId::new(1_001);

		admit_one(&registry, 1_001, Duration::hours(1)).await;
		registry.evict(id, false).await;

		assert!(!registry.contains(id));

		let credential = registry
			.add_identity(IdentityProfile::new(id, "Pilot 1001"))
			.await
			.expect("An evicted identity should re-register from the vault.");

		assert_eq!(credential.access_token.expose(), "access-rt-1001");
	}

	#[tokio::test]
	async fn removal_and_eviction_drop_the_singleflight_guard() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);
		let cancel = CancellationToken::new();
		let id = IdentityId::new(1_001);

		admit_one(&registry, 1_001, Duration::minutes(2)).await;
		registry.get_credential(id, &cancel).await.expect("A stale credential should refresh.");

		assert_eq!(registry.0.refresh_guards.lock().len(), 1);

		registry.remove_identity(id).await.expect("Removal should succeed.");

		assert!(
			registry.0.refresh_guards.lock().is_empty(),
			"Removal must not leak the identity's refresh guard.",
		);

		admit_one(&registry, 1_001, Duration::minutes(2)).await;
		registry.refresh_identity(id, &cancel).await.expect("A forced refresh should succeed.");
		registry.evict(id, false).await;

		assert!(
			registry.0.refresh_guards.lock().is_empty(),
			"Eviction must not leak the identity's refresh guard.",
		);
	}

	#[tokio::test]
	async fn stale_identities_respect_the_horizon() {
		let (registry, _) = build_registry(
			ScriptedTransport::default(),
			RegistryConfig::default(),
		);

		admit_one(&registry, 1, Duration::minutes(10)).await;
		admit_one(&registry, 2, Duration::hours(2)).await;

		assert_eq!(registry.stale_identities(Duration::minutes(20)), vec![IdentityId::new(1)]);
		assert_eq!(registry.stale_identities(Duration::hours(3)), vec![
			IdentityId::new(1),
			IdentityId::new(2),
		]);
	}
}
