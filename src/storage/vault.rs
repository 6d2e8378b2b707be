//! Built-in [`SecretVault`] backends: in-memory and AES-256-GCM encrypted file.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, KeyInit},
};
use rand::RngCore;
// self
use crate::{
	_prelude::*,
	identity::IdentityId,
	storage::{SecretVault, StorageError, StorageFuture, TokenTriple},
};

type VaultMap = Arc<RwLock<HashMap<IdentityId, TokenTriple>>>;

const NONCE_LEN: usize = 12;

/// Thread-safe vault that keeps triples in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryVault(VaultMap);
impl SecretVault for MemoryVault {
	fn store(&self, id: IdentityId, triple: TokenTriple) -> StorageFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(id, triple);

			Ok(())
		})
	}

	fn fetch(&self, id: IdentityId) -> StorageFuture<'_, Option<TokenTriple>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(&id).cloned()) })
	}

	fn remove(&self, id: IdentityId) -> StorageFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().remove(&id);

			Ok(())
		})
	}
}

/// Vault that persists triples to an AES-256-GCM sealed file after each
/// mutation.
///
/// The on-disk layout is `nonce || ciphertext` with a fresh random nonce per
/// write; the plaintext is the JSON entry list. Writes go through a temporary
/// file and an atomic rename.
#[derive(Clone)]
pub struct EncryptedFileVault {
	path: PathBuf,
	key: [u8; 32],
	inner: VaultMap,
}
impl EncryptedFileVault {
	/// Opens (or creates) a vault at the provided path, eagerly decrypting
	/// existing data with `key`.
	pub fn open(path: impl Into<PathBuf>, key: [u8; 32]) -> Result<Self, StorageError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot =
			if path.exists() { Self::load_snapshot(&path, &key)? } else { HashMap::new() };

		Ok(Self { path, key, inner: Arc::new(RwLock::new(snapshot)) })
	}

	fn load_snapshot(
		path: &Path,
		key: &[u8; 32],
	) -> Result<HashMap<IdentityId, TokenTriple>, StorageError> {
		let bytes = fs::read(path).map_err(|e| StorageError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}
		if bytes.len() <= NONCE_LEN {
			return Err(StorageError::Crypto {
				message: format!("Vault file {} is truncated", path.display()),
			});
		}

		let (nonce, sealed) = bytes.split_at(NONCE_LEN);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
		let plaintext =
			cipher.decrypt(Nonce::from_slice(nonce), sealed).map_err(|_| StorageError::Crypto {
				message: format!("Failed to decrypt {}; wrong key or corrupt file", path.display()),
			})?;
		let entries: Vec<(IdentityId, TokenTriple)> = serde_json::from_slice(&plaintext)
			.map_err(|e| StorageError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(entries.into_iter().collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StorageError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StorageError::Backend {
				message: format!("Failed to create vault directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(
		&self,
		contents: &HashMap<IdentityId, TokenTriple>,
	) -> Result<(), StorageError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot: Vec<_> = contents.iter().collect();
		let plaintext =
			serde_json::to_vec(&snapshot).map_err(|e| StorageError::Serialization {
				message: format!("Failed to serialize vault snapshot: {e}"),
			})?;
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
		let mut nonce = [0_u8; NONCE_LEN];

		rand::rng().fill_bytes(&mut nonce);

		let sealed = cipher
			.encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
			.map_err(|_| StorageError::Crypto {
				message: "Failed to seal vault snapshot".into(),
			})?;
		let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());

		payload.extend_from_slice(&nonce);
		payload.extend_from_slice(&sealed);

		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StorageError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&payload).map_err(|e| StorageError::Backend {
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
}
impl Debug for EncryptedFileVault {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EncryptedFileVault")
			.field("path", &self.path)
			.field("key", &"<redacted>")
			.finish()
	}
}
impl SecretVault for EncryptedFileVault {
	fn store(&self, id: IdentityId, triple: TokenTriple) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(id, triple);
			self.persist_locked(&guard)?;

			Ok(())
		})
	}

	fn fetch(&self, id: IdentityId) -> StorageFuture<'_, Option<TokenTriple>> {
		Box::pin(async move { Ok(self.inner.read().get(&id).cloned()) })
	}

	fn remove(&self, id: IdentityId) -> StorageFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			if guard.remove(&id).is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(())
		})
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
	use crate::identity::TokenSecret;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"fleetkey_vault_{}_{}.bin",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_triple() -> TokenTriple {
		TokenTriple {
			access_token: TokenSecret::new("access-token"),
			refresh_token: TokenSecret::new("refresh-token"),
			expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
		}
	}

	#[test]
	fn sealed_round_trip_survives_reopen() {
		let path = temp_path();
		let key = [7_u8; 32];
		let vault = EncryptedFileVault::open(&path, key).expect("Failed to open vault.");
		let id = IdentityId::new(1_001);
		let triple = build_triple();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for vault test.");

		rt.block_on(vault.store(id, triple.clone())).expect("Failed to store vault triple.");
		drop(vault);

		let raw = fs::read(&path).expect("Vault file should exist after store.");

		assert!(
			!raw.windows(b"access-token".len()).any(|win| win == b"access-token"),
			"Tokens must never appear in plaintext on disk.",
		);

		let reopened = EncryptedFileVault::open(&path, key).expect("Failed to reopen vault.");
		let fetched = rt
			.block_on(reopened.fetch(id))
			.expect("Failed to fetch vault triple.")
			.expect("Vault lost triple after reopen.");

		assert_eq!(fetched, triple);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary vault file {}: {e}", path.display())
		});
	}

	#[test]
	fn wrong_key_is_rejected() {
		let path = temp_path();
		let vault = EncryptedFileVault::open(&path, [1_u8; 32]).expect("Failed to open vault.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for vault test.");

		rt.block_on(vault.store(IdentityId::new(1), build_triple()))
			.expect("Failed to store vault triple.");
		drop(vault);

		let err = EncryptedFileVault::open(&path, [2_u8; 32])
			.expect_err("Opening with the wrong key must fail.");

		assert!(matches!(err, StorageError::Crypto { .. }));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary vault file {}: {e}", path.display())
		});
	}

	#[test]
	fn removing_an_absent_identity_is_not_an_error() {
		let vault = MemoryVault::default();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for vault test.");

		rt.block_on(vault.remove(IdentityId::new(9))).expect("Remove should be idempotent.");

		assert!(
			rt.block_on(vault.fetch(IdentityId::new(9)))
				.expect("Fetch should succeed.")
				.is_none()
		);
	}
}
