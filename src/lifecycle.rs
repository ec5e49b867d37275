//! Per-identity OAuth token lifecycle: lazy refresh, singleflight rotation, and persistence.
//!
//! [`TokenManager`] owns the in-memory working copy of every identity's [`TokenPair`] and
//! writes it back to the [`CredentialStore`] after each rotation. Freshness is checked lazily,
//! right before an authenticated call:
//!
//! - a known expiry within the safety margin (120 seconds by default) triggers a refresh
//!   without contacting the provider's API;
//! - otherwise a cheap liveness probe runs and an authorization failure triggers a refresh.
//!
//! Refreshes for the same identity are serialized behind an async gate. A caller that waited
//! behind an in-flight refresh receives that refresh's outcome, success or failure, instead of
//! spending the refresh token a second time.
//!
//! A rotated pair that could not be written to the store stays marked as unsaved; the next
//! freshness check for that identity writes it again before using the working copy.

mod metrics;
mod refresh;

pub use metrics::RefreshMetrics;

// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenPair, TokenSecret},
	oauth::OAuthClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CredentialStore,
};

/// Default window before expiry in which a token is refreshed proactively.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(120);
/// Scopes requested when the user connects an account.
pub const DEFAULT_SCOPES: &[&str] = &["stash", "publish", "browse", "user", "gallery"];

/// Boxed future returned by [`LivenessProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Cheap authenticated call used to confirm an access token is still accepted.
///
/// Implementations must report a rejected token as [`Error::Unauthorized`].
pub trait LivenessProbe
where
	Self: Send + Sync,
{
	/// Probes the provider with the given access token.
	fn probe<'a>(&'a self, access_token: &'a TokenSecret) -> ProbeFuture<'a>;
}

/// Lifecycle state tracked per identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenState {
	/// The working copy is believed usable.
	Fresh,
	/// A refresh is in flight.
	Refreshing,
	/// The refresh token was rejected or is missing; the user must reconnect.
	Failed,
}
impl TokenState {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenState::Fresh => "fresh",
			TokenState::Refreshing => "refreshing",
			TokenState::Failed => "failed",
		}
	}
}
impl Display for TokenState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Singleflight gate for one identity plus the outcome of the last token exchange behind it.
#[derive(Default)]
struct RefreshFlight {
	gate: AsyncMutex<()>,
	last: Mutex<FlightRecord>,
}

/// Bumped once per completed token exchange.
#[derive(Default)]
struct FlightRecord {
	generation: u64,
	failure: Option<Error>,
}

/// Token lifecycle manager shared by every authenticated provider call.
#[derive(Clone)]
pub struct TokenManager {
	store: Arc<dyn CredentialStore>,
	oauth: OAuthClient,
	probe: Arc<dyn LivenessProbe>,
	safety_margin: Duration,
	scopes: Vec<String>,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	cache: Arc<Mutex<HashMap<IdentityId, TokenPair>>>,
	states: Arc<Mutex<HashMap<IdentityId, TokenState>>>,
	flow_guards: Arc<Mutex<HashMap<IdentityId, Arc<RefreshFlight>>>>,
	unsaved: Arc<Mutex<HashSet<IdentityId>>>,
}
impl TokenManager {
	/// Creates a manager over the given store, token-endpoint client, and liveness probe.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		oauth: OAuthClient,
		probe: Arc<dyn LivenessProbe>,
	) -> Self {
		Self {
			store,
			oauth,
			probe,
			safety_margin: DEFAULT_SAFETY_MARGIN,
			scopes: DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect(),
			refresh_metrics: Default::default(),
			cache: Default::default(),
			states: Default::default(),
			flow_guards: Default::default(),
			unsaved: Default::default(),
		}
	}

	/// Overrides the proactive refresh window; negative values are clamped to zero.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Overrides the scopes requested by [`TokenManager::authorize_url`].
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Proactive refresh window in effect.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Returns `true` when the identity's working copy is newer than what the store holds.
	pub fn has_unsaved_pair(&self, identity: &IdentityId) -> bool {
		self.unsaved.lock().contains(identity)
	}

	/// Current lifecycle state for the identity, if it has been seen.
	pub fn state(&self, identity: &IdentityId) -> Option<TokenState> {
		self.states.lock().get(identity).copied()
	}

	/// Builds the provider authorization URL; the OAuth `state` parameter is the identity.
	pub fn authorize_url(&self, identity: &IdentityId) -> Url {
		let scopes = self.scopes.iter().map(String::as_str).collect::<Vec<_>>();

		self.oauth.authorize_url(identity.as_ref(), &scopes)
	}

	/// Resolves the identity encoded in an OAuth `state` parameter.
	pub fn identity_from_state(state: &str) -> Result<IdentityId> {
		let identity = IdentityId::new(state).map_err(crate::error::ConfigError::from)?;

		if identity.telegram_user_id().is_none() {
			return Err(Error::Provider {
				status: 400,
				message: format!("Unsupported OAuth state format: {identity}"),
			});
		}

		Ok(identity)
	}

	/// Completes a connect: exchanges the authorization code, persists the pair, and resets
	/// the identity to [`TokenState::Fresh`].
	pub async fn connect(&self, identity: &IdentityId, code: &str) -> Result<TokenPair> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::for_identity(KIND, "connect", identity.as_ref());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let grant = self.oauth.exchange_code(code).await?;
				let pair = TokenPair::from_grant(identity.clone(), grant, OffsetDateTime::now_utc());

				self.store.save(pair.clone()).await?;
				self.cache.lock().insert(identity.clone(), pair.clone());
				self.unsaved.lock().remove(identity);
				self.set_state(identity, TokenState::Fresh);

				tracing::info!(identity = %identity, "Connected publishing account.");

				Ok(pair)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Forgets the identity's tokens in both the store and the working copy.
	///
	/// Returns `true` when a stored pair was removed.
	pub async fn disconnect(&self, identity: &IdentityId) -> Result<bool> {
		let removed = self.store.remove(identity).await?;

		self.cache.lock().remove(identity);
		self.states.lock().remove(identity);
		self.flow_guards.lock().remove(identity);
		self.unsaved.lock().remove(identity);

		tracing::info!(identity = %identity, removed = removed.is_some(), "Disconnected publishing account.");

		Ok(removed.is_some())
	}

	/// Returns the working copy, loading it from the store on first use.
	async fn working_copy(&self, identity: &IdentityId) -> Result<TokenPair> {
		let cached = self.cache.lock().get(identity).cloned();

		if let Some(pair) = cached {
			return Ok(pair);
		}

		let pair = self.store.load(identity).await?.ok_or_else(|| Error::ReauthorizationRequired {
			reason: format!("Identity {identity} has no connected account"),
		})?;

		self.cache.lock().entry(identity.clone()).or_insert_with(|| pair.clone());

		Ok(pair)
	}

	fn set_state(&self, identity: &IdentityId, state: TokenState) {
		self.states.lock().insert(identity.clone(), state);
	}

	fn flight(&self, identity: &IdentityId) -> Arc<RefreshFlight> {
		let mut guards = self.flow_guards.lock();

		guards.entry(identity.clone()).or_default().clone()
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("client_id", &self.oauth.client_id())
			.field("safety_margin", &self.safety_margin)
			.field("scopes", &self.scopes)
			.finish()
	}
}
