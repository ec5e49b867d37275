//! Transport primitives shared by the OAuth client and every provider client.
//!
//! All outbound calls funnel through [`send`], which turns reqwest failures and non-success
//! statuses into the crate's error taxonomy:
//!
//! - 401 becomes [`Error::Unauthorized`] so token-aware callers can refresh and retry.
//! - 403 is a permission problem (for example a missing scope) and stays [`Error::Provider`].
//! - 408, 429, and 5xx become [`TransientError::Upstream`], carrying any `Retry-After` hint.
//! - Other non-success statuses become [`Error::Provider`].
//! - Timeouts are transient; connection failures surface as [`TransportError::Network`].

// std
use std::ops::Deref;
// crates.io
use reqwest::{
	RequestBuilder,
	header::{HeaderMap, RETRY_AFTER},
};
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError, TransportError},
};

const MESSAGE_PREVIEW_LEN: usize = 200;

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client whose requests are bounded by `timeout`.
	pub fn with_timeout(timeout: std::time::Duration) -> Result<Self, ConfigError> {
		ReqwestClient::builder()
			.timeout(timeout)
			.build()
			.map(Self)
			.map_err(ConfigError::http_client_build)
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

/// Fully buffered HTTP response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Decodes the body as JSON, reporting the failing path on mismatch.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let de = &mut serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(de).map_err(|source| {
			TransientError::ResponseParse { source, status: Some(self.status) }.into()
		})
	}

	/// Short human-readable summary of the body for error messages.
	pub fn message(&self) -> String {
		if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) {
			for key in ["error_description", "message", "detail", "error"] {
				if let Some(text) = value.get(key).and_then(serde_json::Value::as_str) {
					return text.to_owned();
				}
			}
		}

		let text = String::from_utf8_lossy(&self.body);
		let trimmed = text.trim();

		if trimmed.is_empty() {
			return format!("HTTP {}", self.status);
		}

		trimmed.chars().take(MESSAGE_PREVIEW_LEN).collect()
	}

	/// Converts a non-success response into the matching crate error.
	pub fn into_error(self) -> Error {
		classify_status(self.status, self.retry_after, self.message())
	}
}

/// Maps an HTTP status onto the crate's error taxonomy.
pub fn classify_status(status: u16, retry_after: Option<Duration>, message: String) -> Error {
	match status {
		401 => Error::Unauthorized { reason: message },
		408 | 429 | 500..=599 =>
			TransientError::Upstream { message, status: Some(status), retry_after }.into(),
		_ => Error::Provider { status, message },
	}
}

/// Executes a request and buffers the response, regardless of status.
pub async fn send(request: RequestBuilder, endpoint: &str) -> Result<ApiResponse> {
	let response = request.send().await.map_err(|e| map_reqwest_error(endpoint, e))?;
	let status = response.status().as_u16();
	let retry_after = parse_retry_after(response.headers());
	let body = response.bytes().await.map_err(|e| map_reqwest_error(endpoint, e))?.to_vec();

	tracing::trace!(endpoint, status, "Received provider response.");

	Ok(ApiResponse { status, retry_after, body })
}

/// Executes a request, failing on non-success statuses and decoding the JSON body otherwise.
pub async fn send_json<T>(request: RequestBuilder, endpoint: &str) -> Result<T>
where
	T: DeserializeOwned,
{
	let response = send(request, endpoint).await?;

	if !response.is_success() {
		return Err(response.into_error());
	}

	response.json()
}

/// Appends `path` to `base`, keeping any path prefix `base` already carries.
pub fn join_path(base: &Url, path: &str) -> Result<Url, ConfigError> {
	let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));

	Ok(Url::parse(&joined)?)
}

/// Host + path label for logs and transport errors; never includes the query string.
pub fn endpoint_label(url: &Url) -> String {
	format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}

fn map_reqwest_error(endpoint: &str, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::RequestBuild { source: Box::new(err) }.into();
	}
	if err.is_timeout() {
		return TransientError::Upstream {
			message: format!("Request timed out while calling {endpoint}"),
			status: err.status().map(|code| code.as_u16()),
			retry_after: None,
		}
		.into();
	}

	TransportError::network(endpoint, err).into()
}

/// Parses a `Retry-After` header given either as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	fn response(status: u16, body: &str) -> ApiResponse {
		ApiResponse { status, retry_after: None, body: body.as_bytes().to_vec() }
	}

	#[test]
	fn statuses_map_onto_error_taxonomy() {
		assert!(response(401, "").into_error().is_unauthorized());
		assert!(matches!(response(403, "").into_error(), Error::Provider { status: 403, .. }));
		assert!(response(408, "").into_error().is_transient());
		assert!(response(429, "").into_error().is_transient());
		assert!(response(503, "").into_error().is_transient());
		assert!(matches!(response(400, "").into_error(), Error::Provider { status: 400, .. }));
	}

	#[test]
	fn message_prefers_structured_fields() {
		assert_eq!(
			response(400, r#"{"error":"invalid_request","error_description":"bad tags"}"#)
				.message(),
			"bad tags"
		);
		assert_eq!(response(500, "  upstream exploded ").message(), "upstream exploded");
		assert_eq!(response(502, "").message(), "HTTP 502");
	}

	#[test]
	fn json_reports_parse_failures_as_transient() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			id: u64,
		}

		let err = response(200, r#"{"id":"nope"}"#)
			.json::<Payload>()
			.expect_err("Mismatched payload must fail to decode.");

		assert!(err.is_transient());
	}

	#[test]
	fn retry_after_accepts_seconds_and_ignores_garbage() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(7)));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn join_path_keeps_base_prefix() {
		let base = Url::parse("https://api.openai.com/v1").expect("Fixture URL should parse.");

		assert_eq!(
			join_path(&base, "chat/completions").expect("Join should succeed.").as_str(),
			"https://api.openai.com/v1/chat/completions"
		);

		let base = Url::parse("https://tensor.example/").expect("Fixture URL should parse.");

		assert_eq!(
			join_path(&base, "/v1/jobs").expect("Join should succeed.").as_str(),
			"https://tensor.example/v1/jobs"
		);
	}

	#[test]
	fn endpoint_label_drops_query() {
		let url = Url::parse("https://api.example.com/v1/jobs?app_id=secret")
			.expect("Fixture URL should parse.");

		assert_eq!(endpoint_label(&url), "api.example.com/v1/jobs");
	}
}
