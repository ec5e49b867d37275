//! Rate-limited provider dispatch and DeviantArt token lifecycle for a Telegram character-art
//! bot: a fire-and-forget job queue drained by a fixed worker pool under per-provider rate
//! limits, plus a singleflight OAuth refresh manager backed by an encrypted credential store.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod ratelimit;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{IdentityId, TokenPair},
		http::ReqwestHttpClient,
		lifecycle::TokenManager,
		oauth::{OAuthClient, OAuthEndpoints},
		provider::DeviantArtClient,
		store::{CredentialStore, MemoryStore},
	};

	/// Client identifier used by integration-test OAuth clients.
	pub const TEST_CLIENT_ID: &str = "client-artbot";
	/// Client secret used by integration-test OAuth clients.
	pub const TEST_CLIENT_SECRET: &str = "secret-artbot";

	/// Builds a reqwest HTTP client with short timeouts suitable for `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.timeout(std::time::Duration::from_secs(5))
			.build()
			.expect("Failed to build Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds OAuth endpoints rooted at the provided mock server base URL.
	pub fn test_endpoints(base_url: &str) -> OAuthEndpoints {
		OAuthEndpoints::new(
			Url::parse(&format!("{base_url}/oauth2/authorize"))
				.expect("Mock authorize endpoint should parse successfully."),
			Url::parse(&format!("{base_url}/oauth2/token"))
				.expect("Mock token endpoint should parse successfully."),
		)
	}

	/// Constructs a [`TokenManager`] whose OAuth client and liveness probe both target the
	/// provided mock server, backed by an in-memory credential store.
	pub fn build_test_token_manager(base_url: &str) -> (TokenManager, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let http_client = test_reqwest_http_client();
		let oauth = OAuthClient::new(
			test_endpoints(base_url),
			TEST_CLIENT_ID,
			TEST_CLIENT_SECRET,
			http_client.clone(),
		);
		let api_base = Url::parse(&format!("{base_url}/api/v1/oauth2/"))
			.expect("Mock API base should parse successfully.");
		let probe = Arc::new(DeviantArtClient::with_http_client(api_base, http_client));
		let manager = TokenManager::new(store, oauth, probe);

		(manager, store_backend)
	}

	/// Builds an identity fixture, panicking on invalid input.
	pub fn identity(value: &str) -> IdentityId {
		IdentityId::new(value).expect("Identity fixture should be valid.")
	}

	/// Seeds a token pair into the provided store.
	pub async fn seed_pair(store: &dyn CredentialStore, pair: TokenPair) {
		store.save(pair).await.expect("Failed to seed token pair into the store.");
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{BoxError, Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tracing_subscriber as _};
