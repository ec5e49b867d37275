//! Freshness checks, singleflight refresh, and the refresh-and-retry wrapper.

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenPair, TokenSecret},
	lifecycle::{TokenManager, TokenState},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl TokenManager {
	/// Returns a pair that is believed usable, refreshing it first when needed.
	///
	/// A known expiry inside the safety margin refreshes without probing. Otherwise the
	/// liveness probe decides: a rejected token is refreshed, an accepted one is returned
	/// as-is. A probe that fails transiently is logged and the current pair is returned; the
	/// caller's own request will surface the problem if it persists.
	pub async fn ensure_fresh(&self, identity: &IdentityId) -> Result<TokenPair> {
		self.ensure_not_failed(identity)?;
		self.flush_unsaved(identity).await;

		let pair = self.working_copy(identity).await?;

		if pair.expires_within(self.safety_margin, OffsetDateTime::now_utc()) {
			tracing::debug!(identity = %identity, "Access token is near expiry; refreshing.");

			return self.refresh_observed(identity, Some(pair.access_token)).await;
		}

		match self.run_probe(identity, &pair.access_token).await {
			Ok(()) => Ok(pair),
			Err(e) if e.is_unauthorized() => {
				tracing::debug!(identity = %identity, "Liveness probe rejected the access token.");

				self.refresh_observed(identity, Some(pair.access_token)).await
			},
			Err(e) if e.is_transient() => {
				tracing::warn!(
					identity = %identity,
					error = %e,
					"Liveness probe failed transiently; using the current access token.",
				);

				Ok(pair)
			},
			Err(e) => Err(e),
		}
	}

	/// Exchanges the identity's refresh token for a new pair, at most once per rotation.
	///
	/// Concurrent callers for the same identity queue behind one gate. A caller that waited
	/// while an exchange ran receives that exchange's outcome, error included, and whoever
	/// arrives after the token has already rotated receives the rotated pair; neither makes
	/// another token-endpoint call. Failures are never retried here.
	pub async fn refresh_once(&self, identity: &IdentityId) -> Result<TokenPair> {
		self.ensure_not_failed(identity)?;
		self.flush_unsaved(identity).await;

		let observed = self.working_copy(identity).await?.access_token;

		self.refresh_observed(identity, Some(observed)).await
	}

	/// Runs `operation` with a fresh access token, refreshing and retrying exactly once when
	/// the provider rejects the token.
	pub async fn call_authorized<F, Fut, T>(&self, identity: &IdentityId, operation: F) -> Result<T>
	where
		F: Fn(TokenSecret) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let pair = self.ensure_fresh(identity).await?;

		match operation(pair.access_token.clone()).await {
			Err(e) if e.is_unauthorized() => {
				tracing::debug!(identity = %identity, "Provider rejected the access token; refreshing once.");

				let refreshed = self.refresh_observed(identity, Some(pair.access_token)).await?;

				operation(refreshed.access_token).await
			},
			result => result,
		}
	}

	pub(super) async fn refresh_observed(
		&self,
		identity: &IdentityId,
		observed: Option<TokenSecret>,
	) -> Result<TokenPair> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::for_identity(KIND, "refresh_once", identity.as_ref());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				self.refresh_metrics.record_attempt();

				let flight = self.flight(identity);
				let generation = flight.last.lock().generation;
				let _singleflight = flight.gate.lock().await;
				let settled = {
					let last = flight.last.lock();

					(last.generation != generation).then(|| last.failure.as_ref().map(Error::replay))
				};

				match settled {
					Some(Some(e)) => {
						self.refresh_metrics.record_coalesced();
						self.refresh_metrics.record_failure();

						tracing::debug!(
							identity = %identity,
							error = %e,
							"Sharing the failure of a concurrent refresh.",
						);

						return Err(e);
					},
					Some(None) => {
						self.refresh_metrics.record_coalesced();

						tracing::debug!(identity = %identity, "Reusing token rotated by a concurrent refresh.");

						return self.working_copy(identity).await;
					},
					None => (),
				}

				self.ensure_not_failed(identity).inspect_err(|_| {
					self.refresh_metrics.record_failure();
				})?;

				let current = self.working_copy(identity).await.inspect_err(|_| {
					self.refresh_metrics.record_failure();
				})?;

				if observed.as_ref().is_some_and(|seen| *seen != current.access_token) {
					self.refresh_metrics.record_coalesced();

					tracing::debug!(identity = %identity, "Reusing token rotated by a concurrent refresh.");

					return Ok(current);
				}

				let result = self.exchange_refresh(identity, current).await;

				{
					let mut last = flight.last.lock();

					last.generation += 1;
					last.failure = result.as_ref().err().map(Error::replay);
				}

				result.inspect_err(|_| {
					self.refresh_metrics.record_failure();
				})
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn exchange_refresh(&self, identity: &IdentityId, mut pair: TokenPair) -> Result<TokenPair> {
		let Some(refresh_token) = pair.refresh_token.clone().filter(|_| pair.can_refresh()) else {
			self.set_state(identity, TokenState::Failed);

			return Err(Error::ReauthorizationRequired {
				reason: format!("Identity {identity} has no refresh token"),
			});
		};

		self.set_state(identity, TokenState::Refreshing);

		let grant = match self.oauth.refresh(&refresh_token).await {
			Ok(grant) => grant,
			Err(e) => {
				let state =
					if e.requires_reauthorization() { TokenState::Failed } else { TokenState::Fresh };

				self.set_state(identity, state);

				tracing::warn!(identity = %identity, error = %e, state = %state, "Token refresh failed.");

				return Err(e);
			},
		};

		pair.apply_grant(grant, OffsetDateTime::now_utc());
		self.cache.lock().insert(identity.clone(), pair.clone());
		self.unsaved.lock().insert(identity.clone());
		self.set_state(identity, TokenState::Fresh);
		self.refresh_metrics.record_success();

		tracing::info!(identity = %identity, expires_at = ?pair.expires_at, "Rotated access token.");

		self.persist_working_copy(identity).await;

		Ok(pair)
	}

	/// Writes a rotated pair the store previously failed to accept, behind the identity's gate.
	async fn flush_unsaved(&self, identity: &IdentityId) {
		if !self.has_unsaved_pair(identity) {
			return;
		}

		let flight = self.flight(identity);
		let _singleflight = flight.gate.lock().await;

		self.persist_working_copy(identity).await;
	}

	// Callers hold the identity's gate so an older pair never overwrites a newer one.
	async fn persist_working_copy(&self, identity: &IdentityId) {
		if !self.has_unsaved_pair(identity) {
			return;
		}

		let cached = self.cache.lock().get(identity).cloned();
		let Some(pair) = cached else {
			self.unsaved.lock().remove(identity);

			return;
		};

		match self.store.save(pair).await {
			Ok(()) => {
				self.unsaved.lock().remove(identity);
			},
			Err(e) => tracing::warn!(
				identity = %identity,
				error = %e,
				"Rotated token pair could not be persisted; retrying on next use.",
			),
		}
	}

	async fn run_probe(&self, identity: &IdentityId, access_token: &TokenSecret) -> Result<()> {
		const KIND: FlowKind = FlowKind::Probe;

		let span = FlowSpan::for_identity(KIND, "ensure_fresh", identity.as_ref());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.probe.probe(access_token)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	fn ensure_not_failed(&self, identity: &IdentityId) -> Result<()> {
		if self.state(identity) == Some(TokenState::Failed) {
			return Err(Error::ReauthorizationRequired {
				reason: format!("Identity {identity} must reconnect its account"),
			});
		}

		Ok(())
	}
}
