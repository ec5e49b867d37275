//! Crate-level error types shared across dispatch, token lifecycle, stores, and providers.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error accepted from job operations and transport adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The access token was rejected by a provider API.
	#[error("Access token was rejected: {reason}.")]
	Unauthorized {
		/// Provider- or crate-supplied reason string.
		reason: String,
	},
	/// The refresh token is missing or was rejected; the user must reconnect the integration.
	#[error("Reauthorization required: {reason}.")]
	ReauthorizationRequired {
		/// Provider- or crate-supplied reason string.
		reason: String,
	},
	/// A dispatched job ended without delivering its result (panic or shutdown).
	#[error("Job {job_id} ended without delivering a result.")]
	JobLost {
		/// Dispatcher-assigned job identifier.
		job_id: u64,
	},
	/// Provider rejected the request for a non-retryable reason.
	#[error("Provider rejected the request ({status}): {message}.")]
	Provider {
		/// HTTP status code returned by the provider.
		status: u16,
		/// Provider response summary.
		message: String,
	},
}
impl Error {
	/// Returns `true` when the failure is worth retrying with backoff.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_))
	}

	/// Returns `true` when the provider rejected the current access token.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Unauthorized { .. })
	}

	/// Returns `true` when the identity must re-run the authorization handshake.
	pub fn requires_reauthorization(&self) -> bool {
		matches!(self, Self::ReauthorizationRequired { .. })
	}

	/// Rebuilds an equivalent error so one failure can be handed to several waiters.
	///
	/// Variant and classification are preserved; boxed sources are flattened into their
	/// messages.
	pub(crate) fn replay(&self) -> Self {
		match self {
			Self::Storage(e) => Self::Storage(e.clone()),
			Self::Config(e) =>
				ConfigError::RequestBuild { source: BoxError::from(e.to_string()) }.into(),
			Self::Transient(TransientError::Upstream { message, status, retry_after }) =>
				TransientError::Upstream {
					message: message.clone(),
					status: *status,
					retry_after: *retry_after,
				}
				.into(),
			Self::Transient(TransientError::ResponseParse { source, status }) =>
				TransientError::Upstream {
					message: format!("malformed JSON: {source}"),
					status: *status,
					retry_after: None,
				}
				.into(),
			Self::Transient(TransientError::Deadline { job_id, last_status }) =>
				TransientError::Deadline { job_id: job_id.clone(), last_status: last_status.clone() }
					.into(),
			Self::Transport(TransportError::Network { endpoint, source }) =>
				TransportError::Network {
					endpoint: endpoint.clone(),
					source: BoxError::from(source.to_string()),
				}
				.into(),
			Self::Transport(TransportError::Io(e)) =>
				TransportError::Io(std::io::Error::new(e.kind(), e.to_string())).into(),
			Self::Unauthorized { reason } => Self::Unauthorized { reason: reason.clone() },
			Self::ReauthorizationRequired { reason } =>
				Self::ReauthorizationRequired { reason: reason.clone() },
			Self::JobLost { job_id } => Self::JobLost { job_id: *job_id },
			Self::Provider { status, message } =>
				Self::Provider { status: *status, message: message.clone() },
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Endpoint URL cannot be parsed or joined.
	#[error("Endpoint URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Required environment variable is not set.
	#[error("Missing required environment variable: {0}.")]
	MissingEnvVar(&'static str),
	/// Environment variable is present but cannot be parsed.
	#[error("Environment variable {name} is invalid: {reason}.")]
	InvalidEnvVar {
		/// Variable name.
		name: &'static str,
		/// Parse failure summary.
		reason: String,
	},
	/// Credential encryption key is malformed.
	#[error("Credential encryption key is invalid: {reason}.")]
	InvalidCipherKey {
		/// Validation failure summary.
		reason: String,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	InvalidIdentity(#[from] crate::auth::IdentifierError),
	/// Rate limit parameters are out of range.
	#[error("Rate limit requires at least one permit and a non-zero window.")]
	InvalidRateLimit,
	/// Request body could not be assembled.
	#[error("Request body could not be assembled.")]
	RequestBuild {
		/// Underlying builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<url::ParseError> for ConfigError {
	fn from(source: url::ParseError) -> Self {
		Self::InvalidUrl { source }
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned a retryable status (408, 429, 5xx) or timed out.
	#[error("Provider returned a retryable response: {message}.")]
	Upstream {
		/// Provider- or crate-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Provider responded with malformed JSON that could not be parsed.
	#[error("Provider returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Provider did not finish an asynchronous job before the deadline.
	#[error("Provider job {job_id} did not finish in time; last status: {last_status}.")]
	Deadline {
		/// Provider-side job identifier.
		job_id: String,
		/// Last observed status string.
		last_status: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {endpoint}.")]
	Network {
		/// Endpoint label (host + path) of the failed call.
		endpoint: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		endpoint: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { endpoint: endpoint.into(), source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn classification_helpers_follow_taxonomy() {
		let transient: Error = TransientError::Upstream {
			message: "busy".into(),
			status: Some(503),
			retry_after: None,
		}
		.into();
		let unauthorized = Error::Unauthorized { reason: "expired".into() };
		let reauth = Error::ReauthorizationRequired { reason: "invalid_grant".into() };
		let provider = Error::Provider { status: 400, message: "bad tags".into() };

		assert!(transient.is_transient());
		assert!(!transient.is_unauthorized());
		assert!(unauthorized.is_unauthorized());
		assert!(!unauthorized.is_transient());
		assert!(reauth.requires_reauthorization());
		assert!(!provider.is_transient());
		assert!(!provider.requires_reauthorization());
	}

	#[test]
	fn replay_preserves_variant_and_message() {
		let upstream: Error = TransientError::Upstream {
			message: "bad gateway".into(),
			status: Some(502),
			retry_after: Some(Duration::seconds(3)),
		}
		.into();
		let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
		let network: Error = TransportError::network("deviantart.com/oauth2/token", io).into();
		let reauth = Error::ReauthorizationRequired { reason: "invalid_grant".into() };

		assert!(matches!(
			upstream.replay(),
			Error::Transient(TransientError::Upstream { status: Some(502), retry_after: Some(_), .. })
		));
		assert!(network.replay().is_transient());
		assert_eq!(network.replay().to_string(), network.to_string());
		assert!(reauth.replay().requires_reauthorization());
		assert_eq!(reauth.replay().to_string(), reauth.to_string());
	}

	#[test]
	fn transport_errors_are_retryable() {
		let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
		let err: Error = TransportError::network("deviantart.com/oauth2/token", io).into();

		assert!(err.is_transient());
		assert!(err.to_string().contains("deviantart.com/oauth2/token"));
	}
}
