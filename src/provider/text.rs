//! OpenAI-compatible chat completion client with a model fallback chain.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::TextSettings,
	error::ConfigError,
	http::{self, ReqwestHttpClient},
	provider::DEFAULT_REQUEST_TIMEOUT,
	retry::{self, RetryPolicy},
};

/// Single chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	/// `system`, `user`, or `assistant`.
	pub role: String,
	/// Message text.
	pub content: String,
}
impl ChatMessage {
	/// System instruction.
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system".into(), content: content.into() }
	}

	/// User turn.
	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user".into(), content: content.into() }
	}
}

/// Chat completion parameters; the model is chosen by the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
	/// Conversation so far.
	pub messages: Vec<ChatMessage>,
	/// Completion length cap.
	pub max_tokens: u32,
	/// Sampling temperature.
	pub temperature: f32,
	/// Nucleus sampling mass.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f32>,
	/// Presence penalty; omitted when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub presence_penalty: Option<f32>,
	/// Frequency penalty; omitted when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub frequency_penalty: Option<f32>,
}
impl ChatRequest {
	/// Creates a request with the bot's default sampling settings.
	pub fn new(messages: Vec<ChatMessage>) -> Self {
		Self {
			messages,
			max_tokens: 240,
			temperature: 1.05,
			top_p: Some(0.95),
			presence_penalty: None,
			frequency_penalty: None,
		}
	}

	/// Sets the completion length cap.
	pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
		self.max_tokens = max_tokens;

		self
	}

	/// Sets temperature and nucleus mass.
	pub fn with_sampling(mut self, temperature: f32, top_p: Option<f32>) -> Self {
		self.temperature = temperature;
		self.top_p = top_p;

		self
	}

	/// Sets presence and frequency penalties; zero values are omitted from the request.
	pub fn with_penalties(mut self, presence: f32, frequency: f32) -> Self {
		self.presence_penalty = Some(presence).filter(|p| *p != 0.0);
		self.frequency_penalty = Some(frequency).filter(|p| *p != 0.0);

		self
	}
}

#[derive(Serialize)]
struct WireRequest<'a> {
	model: &'a str,
	#[serde(flatten)]
	request: &'a ChatRequest,
}

/// Generated text plus the model that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
	/// Trimmed completion text.
	pub text: String,
	/// Model that answered.
	pub model: String,
	/// Prompt tokens billed, when reported.
	pub prompt_tokens: u64,
	/// Completion tokens billed, when reported.
	pub completion_tokens: u64,
}

/// Chat completion client.
#[derive(Clone, Debug)]
pub struct TextClient {
	http_client: ReqwestHttpClient,
	api_base: Url,
	api_key: TokenSecret,
	models: Vec<String>,
	retry_policy: RetryPolicy,
}
impl TextClient {
	/// Creates a client with its own transport bounded by the default request timeout.
	pub fn new(
		api_base: Url,
		api_key: impl Into<String>,
		model: impl Into<String>,
	) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			api_base,
			api_key,
			model,
			ReqwestHttpClient::with_timeout(DEFAULT_REQUEST_TIMEOUT)?,
		))
	}

	/// Creates a client over a caller-provided transport.
	pub fn with_http_client(
		api_base: Url,
		api_key: impl Into<String>,
		model: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self {
			http_client,
			api_base,
			api_key: TokenSecret::new(api_key),
			models: vec![model.into()],
			retry_policy: RetryPolicy::default(),
		}
	}

	/// Builds a client from settings.
	pub fn from_settings(settings: &TextSettings) -> Result<Self, ConfigError> {
		Ok(Self::new(settings.api_base.clone(), settings.api_key.expose(), settings.model.clone())?
			.with_fallback_models(settings.fallback_models.iter().cloned()))
	}

	/// Appends models tried when an earlier one is rejected with 400 or 404; duplicates are
	/// ignored.
	pub fn with_fallback_models<I, S>(mut self, models: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		for model in models {
			let model = model.into();

			if !model.is_empty() && !self.models.contains(&model) {
				self.models.push(model);
			}
		}

		self
	}

	/// Overrides the transient-failure retry policy.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;

		self
	}

	/// Models in the order they are tried.
	pub fn models(&self) -> &[String] {
		&self.models
	}

	/// Runs a chat completion, retrying transient failures with backoff.
	pub async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
		retry::retry(&self.retry_policy, "text.complete", || self.complete_once(request)).await
	}

	async fn complete_once(&self, request: &ChatRequest) -> Result<Completion> {
		let url = http::join_path(&self.api_base, "chat/completions")?;
		let label = http::endpoint_label(&url);
		let mut last_error = None;

		for model in &self.models {
			let request = self
				.http_client
				.post(url.clone())
				.bearer_auth(self.api_key.expose())
				.header("Accept", "application/json")
				.json(&WireRequest { model, request });
			let response = http::send(request, &label).await?;

			if response.is_success() {
				return parse_completion(&response.json()?, model);
			}
			if matches!(response.status, 400 | 404) {
				tracing::debug!(model = %model, status = response.status, "Model rejected; trying the next one.");

				last_error = Some(response.into_error());

				continue;
			}

			return Err(response.into_error());
		}

		Err(last_error.unwrap_or_else(|| Error::Provider {
			status: 0,
			message: "No text model is configured".into(),
		}))
	}
}

fn parse_completion(body: &Value, model: &str) -> Result<Completion> {
	let text = extract_text(body);

	if text.is_empty() {
		return Err(Error::Provider {
			status: 200,
			message: format!("Model {model} returned an empty completion"),
		});
	}

	let usage = |key: &str| body.pointer(&format!("/usage/{key}")).and_then(Value::as_u64).unwrap_or(0);

	Ok(Completion {
		text,
		model: model.to_owned(),
		prompt_tokens: usage("prompt_tokens"),
		completion_tokens: usage("completion_tokens"),
	})
}

/// Pulls completion text from chat-completions or responses-style bodies.
pub fn extract_text(body: &Value) -> String {
	let chat = body.pointer("/choices/0/message/content").and_then(Value::as_str).map(str::trim);

	if let Some(text) = chat.filter(|text| !text.is_empty()) {
		return text.to_owned();
	}
	let output_text = body.get("output_text").and_then(Value::as_str).map(str::trim);

	if let Some(text) = output_text.filter(|text| !text.is_empty()) {
		return text.to_owned();
	}

	body.get("output")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter_map(|item| item.get("content").and_then(Value::as_array))
		.flatten()
		.filter(|part| matches!(part.get("type").and_then(Value::as_str), Some("output_text" | "text")))
		.filter_map(|part| part.get("text").and_then(Value::as_str))
		.collect::<String>()
		.trim()
		.to_owned()
}
