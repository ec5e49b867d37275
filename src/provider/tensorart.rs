//! Tensor.Art client: job creation, status polling, and result URL extraction.
//!
//! Every call walks the configured [`RequestVariant`]s in order, stopping at the first
//! success; when all of them fail the per-variant failures are folded into one error.

// std
use std::collections::HashSet;
// crates.io
use reqwest::Method;
use serde_json::{Value, json};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::TensorArtSettings,
	error::{ConfigError, TransientError},
	http::{self, ReqwestHttpClient},
	provider::{DEFAULT_REQUEST_TIMEOUT, PollSchedule, RequestVariant},
};

const READY_STATUSES: &[&str] = &["succeeded", "completed", "done", "success", "finished"];
const FAILED_STATUSES: &[&str] = &["failed", "failure", "error", "canceled", "cancelled"];
const URL_FIELDS: &[&str] = &["url", "image_url", "imageUrl"];

/// Client for the primary image provider.
#[derive(Clone, Debug)]
pub struct TensorArtClient {
	http_client: ReqwestHttpClient,
	base_url: Url,
	api_key: TokenSecret,
	app_id: Option<String>,
	variants: Vec<RequestVariant>,
	poll: PollSchedule,
}
impl TensorArtClient {
	/// Creates a client with its own transport bounded by the default request timeout.
	pub fn new(base_url: Url, api_key: impl Into<String>) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			base_url,
			api_key,
			ReqwestHttpClient::with_timeout(DEFAULT_REQUEST_TIMEOUT)?,
		))
	}

	/// Creates a client over a caller-provided transport.
	pub fn with_http_client(
		base_url: Url,
		api_key: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self {
			http_client,
			base_url,
			api_key: TokenSecret::new(api_key),
			app_id: None,
			variants: RequestVariant::DEFAULT_ORDER.to_vec(),
			poll: PollSchedule::default(),
		}
	}

	/// Builds a client from settings.
	pub fn from_settings(settings: &TensorArtSettings) -> Result<Self, ConfigError> {
		let client = Self::new(settings.region_url.clone(), settings.api_key.expose())?;

		Ok(match &settings.app_id {
			Some(app_id) => client.with_app_id(app_id.clone()),
			None => client,
		})
	}

	/// Sets the application id sent in headers and, per variant, in the query string.
	pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
		self.app_id = Some(app_id.into());

		self
	}

	/// Replaces the variant order; an empty list falls back to [`RequestVariant::Plain`].
	pub fn with_variants(mut self, variants: impl IntoIterator<Item = RequestVariant>) -> Self {
		self.variants = variants.into_iter().collect();

		if self.variants.is_empty() {
			self.variants.push(RequestVariant::Plain);
		}

		self
	}

	/// Overrides the polling schedule used by [`TensorArtClient::wait_result_urls`].
	pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
		self.poll = poll;

		self
	}

	/// Submits a job and returns its provider-side id.
	///
	/// Stage-level request ids are stripped; exactly one fresh `requestId` is sent at the top
	/// level.
	pub async fn create_job(&self, mut stages: Vec<Value>) -> Result<String> {
		for stage in &mut stages {
			if let Some(object) = stage.as_object_mut() {
				object.remove("requestId");
				object.remove("request_id");
			}
		}

		let request_id = format!("{:032x}", rand::random::<u128>());
		let payload = json!({ "requestId": request_id, "stages": stages });
		let response = self.call(Method::POST, "v1/jobs", Some(&payload)).await?;

		extract_job_id(&response).ok_or_else(|| Error::Provider {
			status: 200,
			message: format!("Job id missing from create response: {response}"),
		})
	}

	/// Fetches the raw job description.
	pub async fn get_job(&self, job_id: &str) -> Result<Value> {
		self.call(Method::GET, &format!("v1/jobs/{job_id}"), None).await
	}

	/// Image URLs of a finished job; empty while the job is still running.
	pub async fn result_urls(&self, job_id: &str) -> Result<Vec<String>> {
		Ok(extract_result_urls(&self.get_job(job_id).await?))
	}

	/// Polls until the job is ready and returns every image URL.
	pub async fn wait_result_urls(&self, job_id: &str) -> Result<Vec<String>> {
		let deadline = Instant::now() + self.poll.timeout;
		let mut last_status = String::from("unknown");

		while Instant::now() < deadline {
			let job = self.get_job(job_id).await?;
			let status = job_status(&job);

			if READY_STATUSES.contains(&status.as_str()) {
				let urls = extract_result_urls(&job);

				if urls.is_empty() {
					return Err(Error::Provider {
						status: 200,
						message: format!("Job {job_id} finished without image URLs: {job}"),
					});
				}

				return Ok(urls);
			}
			if FAILED_STATUSES.contains(&status.as_str()) {
				return Err(Error::Provider {
					status: 200,
					message: format!("Job {job_id} ended with status {status}"),
				});
			}

			tracing::trace!(job_id, status = %status, "Image job still running.");

			last_status = status;

			tokio::time::sleep(self.poll.interval).await;
		}

		Err(TransientError::Deadline { job_id: job_id.to_owned(), last_status }.into())
	}

	/// Downloads a (signed) result image.
	pub async fn download_image(&self, url: &str) -> Result<Vec<u8>> {
		let url = Url::parse(url).map_err(ConfigError::from)?;
		let label = http::endpoint_label(&url);
		let response = http::send(self.http_client.get(url), &label).await?;

		if !response.is_success() {
			return Err(response.into_error());
		}

		Ok(response.body)
	}

	async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
		let url = http::join_path(&self.base_url, path)?;
		let label = http::endpoint_label(&url);
		let mut failures = Vec::new();
		let mut last_error = None;

		for variant in &self.variants {
			let Some(query) = variant.query_param(self.app_id.as_deref()) else {
				continue;
			};
			let mut request = self
				.http_client
				.request(method.clone(), url.clone())
				.header("Authorization", self.api_key.bearer())
				.header("Accept", "application/json");

			if let Some(app_id) = &self.app_id {
				request = request.header("App-Id", app_id).header("X-App-Id", app_id);
			}
			if let Some(pair) = query {
				request = request.query(&[pair]);
			}
			if let Some(body) = body {
				request = request.json(body);
			}

			let error = match http::send(request, &label).await {
				Ok(response) if response.is_success() => return response.json(),
				Ok(response) => response.into_error(),
				Err(e) => e,
			};

			tracing::debug!(%method, endpoint = %label, %variant, error = %error, "Request variant failed.");

			failures.push(format!("{method} {label} [{variant}] -> {error}"));
			last_error = Some(error);
		}

		Err(aggregate_failures(last_error, failures))
	}
}

/// Folds per-variant failures into one error that keeps the last failure's class.
fn aggregate_failures(last_error: Option<Error>, failures: Vec<String>) -> Error {
	let message = failures.join("; ");

	match last_error {
		Some(Error::Unauthorized { .. }) => Error::Unauthorized { reason: message },
		Some(Error::Transient(TransientError::Upstream { status, retry_after, .. })) =>
			TransientError::Upstream { message, status, retry_after }.into(),
		Some(e) if e.is_transient() =>
			TransientError::Upstream { message, status: None, retry_after: None }.into(),
		Some(Error::Provider { status, .. }) => Error::Provider { status, message },
		Some(e) => e,
		None => Error::Provider { status: 0, message: "No request variant was applicable".into() },
	}
}

/// Extracts the job id from the several response shapes the API has used.
pub fn extract_job_id(response: &Value) -> Option<String> {
	let candidates = [
		response.get("id"),
		response.get("job_id"),
		response.get("jobId"),
		response.pointer("/data/id"),
		response.pointer("/data/job_id"),
		response.pointer("/job/id"),
	];

	candidates.into_iter().flatten().find_map(non_empty_str).or_else(|| {
		["result", "task"].into_iter().filter_map(|key| response.get(key)).find_map(|nested| {
			["id", "job_id", "jobId"]
				.into_iter()
				.filter_map(|key| nested.get(key))
				.find_map(non_empty_str)
		})
	})
}

/// Collects image URLs from a job description, deduplicated with order preserved.
pub fn extract_result_urls(job: &Value) -> Vec<String> {
	let image_lists = [
		"/job/successInfo/images",
		"/job/successInfo/imageList",
		"/images",
		"/data/images",
		"/result/images",
		"/output/images",
	];
	let images = image_lists
		.into_iter()
		.filter_map(|pointer| job.pointer(pointer).and_then(Value::as_array))
		.find(|list| !list.is_empty());
	let mut urls = Vec::new();

	for item in images.into_iter().flatten() {
		let url = match item {
			Value::String(url) => Some(url.as_str()),
			Value::Object(_) => URL_FIELDS.iter().filter_map(|key| item.get(*key)).find_map(Value::as_str),
			_ => None,
		};

		urls.extend(url.filter(|url| url.starts_with("http")).map(ToOwned::to_owned));
	}
	for pointer in ["/url", "/image_url", "/data/url", "/data/image_url"] {
		urls.extend(
			job.pointer(pointer)
				.and_then(Value::as_str)
				.filter(|url| url.starts_with("http"))
				.map(ToOwned::to_owned),
		);
	}

	let mut seen = HashSet::new();

	urls.retain(|url| seen.insert(url.clone()));

	urls
}

/// Lower-cased job status, preferring the nested `job.status`.
pub fn job_status(job: &Value) -> String {
	job.pointer("/job/status")
		.and_then(Value::as_str)
		.filter(|status| !status.is_empty())
		.or_else(|| job.get("status").and_then(Value::as_str))
		.unwrap_or_default()
		.to_ascii_lowercase()
}

fn non_empty_str(value: &Value) -> Option<String> {
	value.as_str().filter(|s| !s.is_empty()).map(ToOwned::to_owned)
}

/// Text-to-image parameters turned into workflow stages by [`Txt2Img::into_stages`].
#[derive(Clone, Debug, PartialEq)]
pub struct Txt2Img {
	/// Main prompt.
	pub prompt: String,
	/// Fixed suffix appended to the prompt.
	pub prompt_tail: Option<String>,
	/// Negative prompt.
	pub negative: Option<String>,
	/// Output width in pixels.
	pub width: u32,
	/// Output height in pixels.
	pub height: u32,
	/// Diffusion steps.
	pub steps: u32,
	/// Classifier-free guidance scale.
	pub cfg_scale: f32,
	/// CLIP layers to skip.
	pub clip_skip: Option<u32>,
	/// Model id.
	pub sd_model: Option<String>,
	/// VAE id.
	pub sd_vae: Option<String>,
	/// Sampler name.
	pub sampler: Option<String>,
	/// LoRA ids with weights.
	pub loras: Vec<(String, f32)>,
	/// Images per job.
	pub count: u32,
	/// Seed; `-1` picks a random one.
	pub seed: i64,
}
impl Txt2Img {
	/// Creates parameters with the provider's usual defaults.
	pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Self {
		Self {
			prompt: prompt.into(),
			prompt_tail: None,
			negative: None,
			width,
			height,
			steps: 25,
			cfg_scale: 7.0,
			clip_skip: None,
			sd_model: None,
			sd_vae: None,
			sampler: None,
			loras: Vec::new(),
			count: 1,
			seed: -1,
		}
	}

	/// Final prompt: main prompt and tail joined by a comma, never empty.
	pub fn final_prompt(&self) -> String {
		let core = self.prompt.trim().trim_matches(',').trim();
		let tail = self.prompt_tail.as_deref().unwrap_or_default().trim().trim_matches(',').trim();

		match (core.is_empty(), tail.is_empty()) {
			(false, false) => format!("{core}, {tail}"),
			(false, true) => core.to_owned(),
			(true, false) => tail.to_owned(),
			(true, true) => "masterpiece".to_owned(),
		}
	}

	/// Builds the `INPUT_INITIALIZE` + `DIFFUSION` stages for [`TensorArtClient::create_job`].
	pub fn into_stages(self) -> Vec<Value> {
		let mut diffusion = json!({
			"width": self.width,
			"height": self.height,
			"prompts": [{ "text": self.final_prompt() }],
			"steps": self.steps,
			"cfgScale": self.cfg_scale,
		});

		if let Some(object) = diffusion.as_object_mut() {
			if let Some(sampler) = self.sampler {
				object.insert("sampler".into(), sampler.into());
			}
			if let Some(vae) = self.sd_vae {
				object.insert("sdVae".into(), vae.into());
			}
			if let Some(clip_skip) = self.clip_skip {
				object.insert("clipSkip".into(), clip_skip.into());
			}
			if let Some(model) = self.sd_model {
				object.insert("sdModel".into(), model.trim().into());
			}
			if let Some(negative) = self.negative.filter(|n| !n.is_empty()) {
				object.insert("negativePrompts".into(), json!([{ "text": negative }]));
			}
			if !self.loras.is_empty() {
				let loras = self
					.loras
					.into_iter()
					.map(|(id, weight)| json!({ "loraModel": id, "weight": weight }))
					.collect::<Vec<_>>();

				object.insert("loras".into(), loras.into());
			}
		}

		vec![
			json!({
				"type": "INPUT_INITIALIZE",
				"inputInitialize": { "seed": self.seed, "count": self.count },
			}),
			json!({ "type": "DIFFUSION", "diffusion": diffusion }),
		]
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn job_id_is_found_in_every_known_shape() {
		assert_eq!(extract_job_id(&json!({ "id": "a" })), Some("a".into()));
		assert_eq!(extract_job_id(&json!({ "jobId": "b" })), Some("b".into()));
		assert_eq!(extract_job_id(&json!({ "data": { "job_id": "c" } })), Some("c".into()));
		assert_eq!(extract_job_id(&json!({ "job": { "id": "d" } })), Some("d".into()));
		assert_eq!(extract_job_id(&json!({ "task": { "jobId": "e" } })), Some("e".into()));
		assert_eq!(extract_job_id(&json!({ "id": "", "result": { "id": "f" } })), Some("f".into()));
		assert_eq!(extract_job_id(&json!({ "status": "ok" })), None);
	}

	#[test]
	fn result_urls_are_collected_and_deduplicated() {
		let job = json!({
			"job": {
				"status": "SUCCESS",
				"successInfo": {
					"images": [
						{ "url": "https://cdn.example/1.png" },
						"https://cdn.example/2.png",
						{ "imageUrl": "https://cdn.example/1.png" },
						{ "url": "ftp://ignored" },
						42
					]
				}
			},
			"url": "https://cdn.example/3.png",
			"data": { "image_url": "https://cdn.example/2.png" }
		});

		assert_eq!(
			extract_result_urls(&job),
			vec!["https://cdn.example/1.png", "https://cdn.example/2.png", "https://cdn.example/3.png"]
		);
		assert_eq!(job_status(&job), "success");
		assert!(extract_result_urls(&json!({ "job": { "status": "RUNNING" } })).is_empty());
	}

	#[test]
	fn aggregated_failures_keep_the_last_class() {
		let transient: Error =
			TransientError::Upstream { message: "busy".into(), status: Some(503), retry_after: None }
				.into();

		assert!(aggregate_failures(Some(transient), vec!["a".into(), "b".into()]).is_transient());
		assert!(matches!(
			aggregate_failures(
				Some(Error::Provider { status: 404, message: "x".into() }),
				vec!["plain -> 404".into()],
			),
			Error::Provider { status: 404, ref message } if message == "plain -> 404"
		));
		assert!(
			aggregate_failures(Some(Error::Unauthorized { reason: "x".into() }), Vec::new())
				.is_unauthorized()
		);
	}

	#[test]
	fn txt2img_stages_follow_workflow_layout() {
		let mut request = Txt2Img::new(" red dragon, ", 768, 1024);

		request.prompt_tail = Some("best quality".into());
		request.negative = Some("blurry".into());
		request.loras = vec![("lora-1".into(), 0.5)];

		let stages = request.into_stages();

		assert_eq!(stages.len(), 2);
		assert_eq!(stages[0]["type"], "INPUT_INITIALIZE");
		assert_eq!(stages[0]["inputInitialize"]["seed"], -1);
		assert_eq!(stages[1]["diffusion"]["prompts"][0]["text"], "red dragon, best quality");
		assert_eq!(stages[1]["diffusion"]["negativePrompts"][0]["text"], "blurry");
		assert_eq!(stages[1]["diffusion"]["loras"][0]["loraModel"], "lora-1");
		assert!(stages[1]["diffusion"].get("sampler").is_none());
		assert_eq!(Txt2Img::new("", 1, 1).final_prompt(), "masterpiece");
	}
}
