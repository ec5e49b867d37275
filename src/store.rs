//! Credential store contract and built-in implementations for identity token pairs.

pub mod cipher;
pub mod file;
pub mod memory;

pub use cipher::SecretCipher;
pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenPair},
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable, last-write-wins persistence for token pairs keyed by identity.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the pair owned by `pair.identity`.
	fn save(&self, pair: TokenPair) -> StoreFuture<'_, ()>;

	/// Fetches the pair owned by the identity, if present.
	fn load<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>>;

	/// Deletes the pair owned by the identity, returning the removed value.
	fn remove<'a>(&'a self, identity: &'a IdentityId) -> StoreFuture<'a, Option<TokenPair>>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Secret encryption or decryption failed.
	#[error("Cipher failure: {message}.")]
	Cipher {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk full"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
