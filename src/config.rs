//! Environment-driven settings.
//!
//! [`Settings::from_env`] reads the process environment; [`Settings::from_lookup`] accepts any
//! key lookup so tests can supply a map instead of mutating global state.
//!
//! | Variable | Required | Default |
//! | --- | --- | --- |
//! | `DA_CLIENT_ID`, `DA_CLIENT_SECRET` | yes | |
//! | `DA_REDIRECT_URI` | no | `http://localhost:8080/oauth/deviantart/callback` |
//! | `CREDENTIAL_KEY` | yes | |
//! | `CREDENTIAL_STORE_PATH` | no | `credentials.json` |
//! | `WORKER_COUNT` | no | `3` |
//! | `OPENAI_API_KEY` | enables text generation | |
//! | `OPENAI_API_BASE`, `OPENAI_MODEL`, `TEXT_MODEL_FALLBACKS` | no | OpenAI, `gpt-4o-mini`, none |
//! | `TENSORART_API_KEY` | enables the primary image provider | |
//! | `TENSORART_REGION_URL`, `TENSORART_APP_ID` | no | `https://ap-east-1.tensorart.cloud`, none |
//! | `REPLICATE_API_TOKEN` + `REPLICATE_MODEL_VERSION` | enables the secondary image provider | |

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	dispatch::DEFAULT_WORKER_COUNT,
	error::ConfigError,
	http::ReqwestHttpClient,
	oauth::{OAuthClient, OAuthEndpoints},
	store::{FileStore, SecretCipher},
};

const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/oauth/deviantart/callback";
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TENSORART_REGION: &str = "https://ap-east-1.tensorart.cloud";
const DEFAULT_STORE_PATH: &str = "credentials.json";

/// DeviantArt application credentials.
#[derive(Clone, Debug)]
pub struct DeviantArtSettings {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: TokenSecret,
	/// Redirect URI registered with DeviantArt.
	pub redirect_uri: Url,
}

/// OpenAI-compatible text generation settings.
#[derive(Clone, Debug)]
pub struct TextSettings {
	/// Bearer API key.
	pub api_key: TokenSecret,
	/// API base, e.g. `https://api.openai.com/v1`.
	pub api_base: Url,
	/// Preferred model.
	pub model: String,
	/// Models tried, in order, when the preferred one is rejected.
	pub fallback_models: Vec<String>,
}

/// Tensor.Art settings.
#[derive(Clone, Debug)]
pub struct TensorArtSettings {
	/// Bearer API key.
	pub api_key: TokenSecret,
	/// Regional API base.
	pub region_url: Url,
	/// Optional application id some gateways require.
	pub app_id: Option<String>,
}

/// Replicate settings.
#[derive(Clone, Debug)]
pub struct ReplicateSettings {
	/// API token.
	pub api_token: TokenSecret,
	/// Model version hash used for predictions.
	pub model_version: String,
}

/// Process-wide settings.
#[derive(Clone, Debug)]
pub struct Settings {
	/// DeviantArt application credentials.
	pub deviantart: DeviantArtSettings,
	/// Text generation, when configured.
	pub text: Option<TextSettings>,
	/// Primary image provider, when configured.
	pub tensorart: Option<TensorArtSettings>,
	/// Secondary image provider, when configured.
	pub replicate: Option<ReplicateSettings>,
	/// Raw key material for the credential cipher.
	pub credential_key: TokenSecret,
	/// Location of the encrypted credential snapshot.
	pub credential_store_path: PathBuf,
	/// Dispatcher worker count.
	pub worker_count: usize,
}
impl Settings {
	/// Reads settings from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads settings through an arbitrary key lookup; blank values count as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |name: &str| {
			lookup(name).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
		};
		let require = |name: &'static str| get(name).ok_or(ConfigError::MissingEnvVar(name));
		let url = |name: &'static str, fallback: &str| {
			let raw = get(name).unwrap_or_else(|| fallback.to_owned());

			parse_url(name, &raw)
		};
		let deviantart = DeviantArtSettings {
			client_id: require("DA_CLIENT_ID")?,
			client_secret: TokenSecret::new(require("DA_CLIENT_SECRET")?),
			redirect_uri: url("DA_REDIRECT_URI", DEFAULT_REDIRECT_URI)?,
		};
		let text = match get("OPENAI_API_KEY") {
			Some(api_key) => Some(TextSettings {
				api_key: TokenSecret::new(api_key),
				api_base: url("OPENAI_API_BASE", DEFAULT_OPENAI_BASE)?,
				model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
				fallback_models: get("TEXT_MODEL_FALLBACKS")
					.map(|raw| {
						raw.split(',')
							.map(str::trim)
							.filter(|model| !model.is_empty())
							.map(ToOwned::to_owned)
							.collect()
					})
					.unwrap_or_default(),
			}),
			None => None,
		};
		let tensorart = match get("TENSORART_API_KEY") {
			Some(api_key) => Some(TensorArtSettings {
				api_key: TokenSecret::new(api_key),
				region_url: url("TENSORART_REGION_URL", DEFAULT_TENSORART_REGION)?,
				app_id: get("TENSORART_APP_ID"),
			}),
			None => None,
		};
		let replicate = match get("REPLICATE_API_TOKEN") {
			Some(api_token) => Some(ReplicateSettings {
				api_token: TokenSecret::new(api_token),
				model_version: require("REPLICATE_MODEL_VERSION")?,
			}),
			None => None,
		};
		let worker_count = match get("WORKER_COUNT") {
			Some(raw) => match raw.parse::<usize>() {
				Ok(count) if count > 0 => count,
				_ => {
					return Err(ConfigError::InvalidEnvVar {
						name: "WORKER_COUNT",
						reason: format!("expected a positive integer, got {raw:?}"),
					});
				},
			},
			None => DEFAULT_WORKER_COUNT,
		};

		Ok(Self {
			deviantart,
			text,
			tensorart,
			replicate,
			credential_key: TokenSecret::new(require("CREDENTIAL_KEY")?),
			credential_store_path: get("CREDENTIAL_STORE_PATH")
				.map(PathBuf::from)
				.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
			worker_count,
		})
	}

	/// Overrides the dispatcher worker count.
	pub fn with_worker_count(mut self, worker_count: usize) -> Self {
		self.worker_count = worker_count.max(1);

		self
	}

	/// Overrides the credential snapshot location.
	pub fn with_credential_store_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.credential_store_path = path.into();

		self
	}

	/// Builds the credential cipher.
	///
	/// `CREDENTIAL_KEY` may hold a base64-encoded 32-byte key; any other value is treated as a
	/// passphrase and hashed into one.
	pub fn cipher(&self) -> Result<SecretCipher, ConfigError> {
		let raw = self.credential_key.expose();

		SecretCipher::from_base64_key(raw).or_else(|_| SecretCipher::from_passphrase(raw))
	}

	/// Opens the encrypted credential store.
	pub fn open_store(&self) -> Result<FileStore> {
		Ok(FileStore::open(&self.credential_store_path, self.cipher()?)?)
	}

	/// Builds the DeviantArt token-endpoint client.
	pub fn oauth_client(&self, http_client: ReqwestHttpClient) -> Result<OAuthClient, ConfigError> {
		Ok(OAuthClient::new(
			OAuthEndpoints::deviantart()?,
			self.deviantart.client_id.clone(),
			self.deviantart.client_secret.expose(),
			http_client,
		)
		.with_redirect_uri(self.deviantart.redirect_uri.clone()))
	}
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let trimmed = raw.trim_end_matches('/');
	let candidate =
		if trimmed.contains("://") { trimmed.to_owned() } else { format!("https://{trimmed}") };

	Url::parse(&candidate).map_err(|e| ConfigError::InvalidEnvVar { name, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> =
			pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();

		move |name| map.get(name).cloned()
	}

	const REQUIRED: &[(&str, &str)] =
		&[("DA_CLIENT_ID", "id"), ("DA_CLIENT_SECRET", "secret"), ("CREDENTIAL_KEY", "passphrase")];

	#[test]
	fn minimal_settings_use_defaults() {
		let settings = Settings::from_lookup(lookup(REQUIRED)).expect("Required variables suffice.");

		assert_eq!(settings.deviantart.client_id, "id");
		assert_eq!(settings.deviantart.redirect_uri.as_str(), DEFAULT_REDIRECT_URI);
		assert_eq!(settings.worker_count, DEFAULT_WORKER_COUNT);
		assert_eq!(settings.credential_store_path, PathBuf::from(DEFAULT_STORE_PATH));
		assert!(settings.text.is_none());
		assert!(settings.tensorart.is_none());
		assert!(settings.replicate.is_none());
		assert!(settings.cipher().is_ok());
	}

	#[test]
	fn missing_required_variable_is_reported_by_name() {
		let err = Settings::from_lookup(lookup(&[("DA_CLIENT_ID", "id"), ("CREDENTIAL_KEY", "k")]))
			.expect_err("Client secret is required.");

		assert!(matches!(err, ConfigError::MissingEnvVar("DA_CLIENT_SECRET")));

		let mut pairs = REQUIRED.to_vec();

		pairs.push(("REPLICATE_API_TOKEN", "r8_token"));

		let err = Settings::from_lookup(lookup(&pairs)).expect_err("Model version is required.");

		assert!(matches!(err, ConfigError::MissingEnvVar("REPLICATE_MODEL_VERSION")));
	}

	#[test]
	fn provider_sections_are_parsed() {
		let mut pairs = REQUIRED.to_vec();

		pairs.extend([
			("OPENAI_API_KEY", "sk-test"),
			("OPENAI_API_BASE", "llm.example.com/v1/"),
			("TEXT_MODEL_FALLBACKS", "gpt-a, ,gpt-b"),
			("TENSORART_API_KEY", "ta-key"),
			("TENSORART_APP_ID", "app-7"),
			("WORKER_COUNT", "5"),
		]);

		let settings = Settings::from_lookup(lookup(&pairs)).expect("Settings should parse.");
		let text = settings.text.expect("Text settings should be present.");
		let tensorart = settings.tensorart.expect("Tensor.Art settings should be present.");

		assert_eq!(text.api_base.as_str(), "https://llm.example.com/v1");
		assert_eq!(text.model, DEFAULT_OPENAI_MODEL);
		assert_eq!(text.fallback_models, vec!["gpt-a".to_owned(), "gpt-b".to_owned()]);
		assert_eq!(tensorart.region_url.as_str(), "https://ap-east-1.tensorart.cloud/");
		assert_eq!(tensorart.app_id.as_deref(), Some("app-7"));
		assert_eq!(settings.worker_count, 5);
	}

	#[test]
	fn invalid_worker_count_is_rejected() {
		let mut pairs = REQUIRED.to_vec();

		pairs.push(("WORKER_COUNT", "0"));

		assert!(matches!(
			Settings::from_lookup(lookup(&pairs)),
			Err(ConfigError::InvalidEnvVar { name: "WORKER_COUNT", .. })
		));
	}
}
