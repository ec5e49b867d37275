//! Thread-safe in-memory [`CredentialStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenPair},
	store::{CredentialStore, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<IdentityId, TokenPair>>>;

/// Storage backend that keeps pairs in-process; nothing is encrypted or persisted.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Returns the number of stored pairs.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no pairs are stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl CredentialStore for MemoryStore {
	fn save(&self, pair: TokenPair) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(pair.identity.clone(), pair);

			Ok(())
		})
	}

	fn load<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(identity).cloned()) })
	}

	fn remove<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(identity)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn pair(access: &str, refresh: Option<&str>) -> TokenPair {
		let mut builder = TokenPair::builder(IdentityId::telegram(5)).access_token(access);

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		builder.build().expect("Token pair fixture should build.")
	}

	#[tokio::test]
	async fn save_load_round_trip_and_last_write_wins() {
		let store = MemoryStore::default();
		let identity = IdentityId::telegram(5);

		store.save(pair("access-1", Some("refresh-1"))).await.expect("First save should succeed.");
		store.save(pair("access-2", None)).await.expect("Second save should succeed.");

		let loaded = store
			.load(&identity)
			.await
			.expect("Load should succeed.")
			.expect("Pair should be present after save.");

		assert_eq!(loaded, pair("access-2", None));
		assert_eq!(store.len(), 1);
	}

	#[tokio::test]
	async fn remove_returns_previous_pair() {
		let store = MemoryStore::default();
		let identity = IdentityId::telegram(5);

		store.save(pair("access", Some("refresh"))).await.expect("Save should succeed.");

		let removed = store.remove(&identity).await.expect("Remove should succeed.");

		assert_eq!(removed.map(|pair| pair.access_token.expose().to_owned()), Some("access".into()));
		assert!(store.load(&identity).await.expect("Load should succeed.").is_none());
		assert!(store.is_empty());
	}
}
