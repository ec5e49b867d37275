//! File-backed [`CredentialStore`] that encrypts every secret before it reaches disk.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenPair, TokenSecret},
	store::{CredentialStore, SecretCipher, StoreError, StoreFuture},
};

/// On-disk shape of one credential; secrets are sealed envelopes.
#[derive(Debug, Serialize, Deserialize)]
struct SealedRecord {
	identity: IdentityId,
	access_token: String,
	refresh_token: Option<String>,
	expires_at: Option<OffsetDateTime>,
}
impl SealedRecord {
	fn seal(pair: &TokenPair, cipher: &SecretCipher) -> Result<Self, StoreError> {
		Ok(Self {
			identity: pair.identity.clone(),
			access_token: cipher.seal(pair.access_token.expose())?,
			refresh_token: pair
				.refresh_token
				.as_ref()
				.map(|secret| cipher.seal(secret.expose()))
				.transpose()?,
			expires_at: pair.expires_at,
		})
	}

	fn open(self, cipher: &SecretCipher) -> Result<TokenPair, StoreError> {
		Ok(TokenPair {
			identity: self.identity,
			access_token: TokenSecret::new(cipher.open(&self.access_token)?),
			refresh_token: self
				.refresh_token
				.map(|sealed| cipher.open(&sealed).map(TokenSecret::new))
				.transpose()?,
			expires_at: self.expires_at,
		})
	}
}

/// Persists sealed credentials to a JSON file after each mutation.
///
/// Writes go to a sibling `.tmp` file that is synced and renamed over the target, so a crash
/// never leaves a half-written snapshot behind.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	cipher: SecretCipher,
	inner: Arc<RwLock<HashMap<IdentityId, TokenPair>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly decrypting existing data.
	pub fn open(path: impl Into<PathBuf>, cipher: SecretCipher) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path, &cipher)?;

		tracing::debug!(path = %path.display(), records = snapshot.len(), "Opened credential store.");

		Ok(Self { path, cipher, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(
		path: &Path,
		cipher: &SecretCipher,
	) -> Result<HashMap<IdentityId, TokenPair>, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}

		let records: Vec<SealedRecord> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		records
			.into_iter()
			.map(|record| record.open(cipher).map(|pair| (pair.identity.clone(), pair)))
			.collect()
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &HashMap<IdentityId, TokenPair>) -> Result<(), StoreError> {
		let mut records = contents
			.values()
			.map(|pair| SealedRecord::seal(pair, &self.cipher))
			.collect::<Result<Vec<_>, _>>()?;

		records.sort_by(|a, b| a.identity.cmp(&b.identity));

		let serialized =
			serde_json::to_vec_pretty(&records).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize credential snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn save(&self, pair: TokenPair) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(pair.identity.clone(), pair);
			self.persist_locked(&guard)?;

			Ok(())
		})
	}

	fn load<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>> {
		Box::pin(async move { Ok(self.inner.read().get(identity).cloned()) })
	}

	fn remove<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let removed = guard.remove(identity);

			if removed.is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}
}
