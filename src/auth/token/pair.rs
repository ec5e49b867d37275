//! Access/refresh token pair owned by one identity, plus its builder.

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, token::secret::TokenSecret},
	oauth::TokenGrant,
};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const FALLBACK_LIFETIME: Duration = Duration::hours(1);

/// Errors produced by [`TokenPairBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenPairBuilderError {
	/// Issued when no (or an empty) access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
}

/// Working copy of the tokens linking one identity to the publishing provider.
///
/// The encrypted copy held by a [`CredentialStore`](crate::store::CredentialStore) is the
/// source of truth; this value is a cache that must be written back after every refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
	/// Identity that exclusively owns the pair.
	pub identity: IdentityId,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry instant, when known.
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenPair {
	/// Returns a builder for the provided identity.
	pub fn builder(identity: IdentityId) -> TokenPairBuilder {
		TokenPairBuilder::new(identity)
	}

	/// Creates a pair from a token endpoint grant observed at `now`.
	pub fn from_grant(identity: IdentityId, grant: TokenGrant, now: OffsetDateTime) -> Self {
		let expires_at = now + grant.expires_in.unwrap_or(FALLBACK_LIFETIME);

		Self {
			identity,
			access_token: grant.access_token,
			refresh_token: grant.refresh_token,
			expires_at: Some(expires_at),
		}
	}

	/// Applies a refresh grant in place.
	///
	/// The access token is always replaced; the refresh token only when the provider
	/// reissued one.
	pub fn apply_grant(&mut self, grant: TokenGrant, now: OffsetDateTime) {
		self.access_token = grant.access_token;

		if let Some(refresh) = grant.refresh_token {
			self.refresh_token = Some(refresh);
		}

		self.expires_at = Some(now + grant.expires_in.unwrap_or(FALLBACK_LIFETIME));
	}

	/// Returns `true` when the expiry is known and falls within `margin` of `now`.
	///
	/// Unknown expiry never counts as expiring; callers fall back to a liveness probe.
	pub fn expires_within(&self, margin: Duration, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at - now < margin)
	}

	/// Returns `true` if a refresh token is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.expose().is_empty())
	}
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("identity", &self.identity)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`TokenPair`].
#[derive(Clone, Debug)]
pub struct TokenPairBuilder {
	identity: IdentityId,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenPairBuilder {
	fn new(identity: IdentityId) -> Self {
		Self {
			identity,
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the instant relative expiry is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value; empty strings are treated as absent.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		let token = token.into();

		self.refresh_token = (!token.is_empty()).then(|| TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`TokenPair`].
	pub fn build(self) -> Result<TokenPair, TokenPairBuilderError> {
		let access_token = self
			.access_token
			.filter(|secret| !secret.expose().is_empty())
			.ok_or(TokenPairBuilderError::MissingAccessToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) => Some(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc) + delta),
			(None, None) => None,
		};

		Ok(TokenPair {
			identity: self.identity,
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
		})
	}
}
