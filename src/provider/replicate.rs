//! Replicate predictions: create, then poll until a terminal status.

// std
use std::time::Duration;
// crates.io
use serde_json::{Value, json};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::ReplicateSettings,
	error::{ConfigError, TransientError},
	http::{self, ReqwestHttpClient},
	provider::{DEFAULT_REQUEST_TIMEOUT, PollSchedule},
};

/// Public Replicate API base.
pub const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";

/// Prediction resource as returned by create and get calls.
#[derive(Clone, Debug, Deserialize)]
pub struct Prediction {
	/// Prediction id.
	pub id: String,
	/// `starting`, `processing`, `succeeded`, `failed`, or `canceled`.
	pub status: String,
	/// Model output; a URL or a list of URLs for image models.
	#[serde(default)]
	pub output: Option<Value>,
	/// Failure detail reported by the model.
	#[serde(default)]
	pub error: Option<Value>,
	/// Follow-up links.
	#[serde(default)]
	pub urls: PredictionUrls,
}
impl Prediction {
	/// First output URL, whether the output is a list or a single string.
	pub fn first_output(&self) -> Option<&str> {
		match self.output.as_ref()? {
			Value::Array(items) => items.first().and_then(Value::as_str),
			Value::String(url) => Some(url),
			_ => None,
		}
	}
}

/// Links attached to a prediction.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PredictionUrls {
	/// Polling URL.
	#[serde(default)]
	pub get: Option<String>,
}

/// Client for the secondary image provider.
#[derive(Clone, Debug)]
pub struct ReplicateClient {
	http_client: ReqwestHttpClient,
	api_base: Url,
	api_token: TokenSecret,
	model_version: String,
	poll: PollSchedule,
}
impl ReplicateClient {
	/// Creates a client against the public API with its own transport.
	pub fn new(
		api_token: impl Into<String>,
		model_version: impl Into<String>,
	) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			Url::parse(REPLICATE_API_BASE)?,
			api_token,
			model_version,
			ReqwestHttpClient::with_timeout(DEFAULT_REQUEST_TIMEOUT)?,
		))
	}

	/// Creates a client over a caller-provided base and transport.
	pub fn with_http_client(
		api_base: Url,
		api_token: impl Into<String>,
		model_version: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self {
			http_client,
			api_base,
			api_token: TokenSecret::new(api_token),
			model_version: model_version.into(),
			poll: PollSchedule::new(Duration::from_secs(2), Duration::from_secs(300)),
		}
	}

	/// Builds a client from settings.
	pub fn from_settings(settings: &ReplicateSettings) -> Result<Self, ConfigError> {
		Self::new(settings.api_token.expose(), settings.model_version.clone())
	}

	/// Overrides the polling schedule.
	pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
		self.poll = poll;

		self
	}

	/// Generates one image and returns its URL.
	pub async fn generate(&self, prompt: &str) -> Result<String> {
		let prediction = self.create_prediction(prompt).await?;

		self.wait(prediction).await
	}

	/// Starts a prediction for the configured model version.
	pub async fn create_prediction(&self, prompt: &str) -> Result<Prediction> {
		let url = http::join_path(&self.api_base, "predictions")?;
		let label = http::endpoint_label(&url);
		let body = json!({ "version": self.model_version, "input": { "prompt": prompt } });

		http::send_json(self.authorized(self.http_client.post(url)).json(&body), &label).await
	}

	/// Fetches the current state of a prediction.
	pub async fn get_prediction(&self, prediction: &Prediction) -> Result<Prediction> {
		let url = match &prediction.urls.get {
			Some(url) => Url::parse(url).map_err(ConfigError::from)?,
			None => http::join_path(&self.api_base, &format!("predictions/{}", prediction.id))?,
		};
		let label = http::endpoint_label(&url);

		http::send_json(self.authorized(self.http_client.get(url)), &label).await
	}

	/// Polls until the prediction reaches a terminal status and returns its first output URL.
	pub async fn wait(&self, mut prediction: Prediction) -> Result<String> {
		let deadline = Instant::now() + self.poll.timeout;

		loop {
			match prediction.status.as_str() {
				"succeeded" =>
					return prediction.first_output().map(ToOwned::to_owned).ok_or_else(|| {
						Error::Provider {
							status: 200,
							message: format!("Prediction {} succeeded without output", prediction.id),
						}
					}),
				"failed" | "canceled" =>
					return Err(Error::Provider {
						status: 200,
						message: format!(
							"Prediction {} {}: {}",
							prediction.id,
							prediction.status,
							prediction.error.as_ref().map(Value::to_string).unwrap_or_default()
						),
					}),
				_ => {},
			}

			if Instant::now() >= deadline {
				return Err(TransientError::Deadline {
					job_id: prediction.id,
					last_status: prediction.status,
				}
				.into());
			}

			tokio::time::sleep(self.poll.interval).await;

			prediction = self.get_prediction(&prediction).await?;
		}
	}

	fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		request
			.header("Authorization", format!("Token {}", self.api_token.expose()))
			.header("Accept", "application/json")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn prediction(output: Value) -> Prediction {
		serde_json::from_value(json!({ "id": "p1", "status": "succeeded", "output": output }))
			.expect("Prediction fixture should deserialize.")
	}

	#[test]
	fn first_output_accepts_list_or_string() {
		assert_eq!(prediction(json!(["https://a", "https://b"])).first_output(), Some("https://a"));
		assert_eq!(prediction(json!("https://c")).first_output(), Some("https://c"));
		assert_eq!(prediction(json!({ "nested": true })).first_output(), None);
		assert!(prediction(Value::Null).urls.get.is_none());
	}
}
