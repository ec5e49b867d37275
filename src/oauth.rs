//! Token-endpoint protocol for the publishing provider.
//!
//! [`OAuthClient`] speaks the two grants the bot needs (authorization code on connect and
//! refresh token afterwards) using form-encoded POSTs with the client credentials in the body,
//! and classifies OAuth error bodies so a rejected refresh token surfaces as
//! [`Error::ReauthorizationRequired`] rather than a retryable failure.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransientError},
	http::{self, ApiResponse, ReqwestHttpClient},
};

/// Base URL of DeviantArt's OAuth endpoints.
pub const DEVIANTART_OAUTH_BASE: &str = "https://www.deviantart.com/oauth2";

/// OAuth error codes meaning the grant can never succeed without user interaction.
const FATAL_OAUTH_ERRORS: &[&str] =
	&["invalid_grant", "invalid_client", "unauthorized_client", "invalid_token"];

/// Authorization + token endpoint pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthEndpoints {
	/// User-facing authorization endpoint.
	pub authorization: Url,
	/// Token endpoint accepting form-encoded grants.
	pub token: Url,
}
impl OAuthEndpoints {
	/// Creates an endpoint pair from explicit URLs.
	pub fn new(authorization: Url, token: Url) -> Self {
		Self { authorization, token }
	}

	/// DeviantArt's production endpoints.
	pub fn deviantart() -> Result<Self, ConfigError> {
		Ok(Self::new(
			Url::parse(&format!("{DEVIANTART_OAUTH_BASE}/authorize"))?,
			Url::parse(&format!("{DEVIANTART_OAUTH_BASE}/token"))?,
		))
	}
}

/// Tokens returned by a successful grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Reissued refresh token, if the provider rotated it.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the access token, if reported.
	pub expires_in: Option<Duration>,
}

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}
impl From<TokenResponse> for TokenGrant {
	fn from(response: TokenResponse) -> Self {
		Self {
			access_token: TokenSecret::new(response.access_token),
			refresh_token: response
				.refresh_token
				.filter(|value| !value.is_empty())
				.map(TokenSecret::new),
			expires_in: response.expires_in.filter(|secs| *secs > 0).map(Duration::seconds),
		}
	}
}

#[derive(Deserialize)]
struct OAuthErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

/// Client for the provider's token endpoint.
#[derive(Clone, Debug)]
pub struct OAuthClient {
	endpoints: OAuthEndpoints,
	client_id: String,
	client_secret: TokenSecret,
	redirect_uri: Option<Url>,
	http_client: ReqwestHttpClient,
}
impl OAuthClient {
	/// Creates a client using the provided credentials and transport.
	pub fn new(
		endpoints: OAuthEndpoints,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self {
			endpoints,
			client_id: client_id.into(),
			client_secret: TokenSecret::new(client_secret),
			redirect_uri: None,
			http_client,
		}
	}

	/// Sets the redirect URI registered with the provider.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Endpoints this client talks to.
	pub fn endpoints(&self) -> &OAuthEndpoints {
		&self.endpoints
	}

	/// Client identifier sent with every grant.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Builds the URL the user visits to grant access.
	pub fn authorize_url(&self, state: &str, scopes: &[&str]) -> Url {
		let mut url = self.endpoints.authorization.clone();

		{
			let mut query = url.query_pairs_mut();

			query.append_pair("response_type", "code").append_pair("client_id", &self.client_id);

			if let Some(redirect) = &self.redirect_uri {
				query.append_pair("redirect_uri", redirect.as_str());
			}
			if !scopes.is_empty() {
				query.append_pair("scope", &scopes.join(" "));
			}

			query.append_pair("state", state);
		}

		url
	}

	/// Exchanges a refresh token for a new grant.
	pub async fn refresh(&self, refresh_token: &TokenSecret) -> Result<TokenGrant> {
		self.request_token("refresh_token", &[("refresh_token", refresh_token.expose())]).await
	}

	/// Exchanges an authorization code for the initial grant.
	pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
		let redirect = self.redirect_uri.as_ref().map(Url::as_str);
		let mut params = vec![("code", code)];

		if let Some(redirect) = redirect {
			params.push(("redirect_uri", redirect));
		}

		self.request_token("authorization_code", &params).await
	}

	async fn request_token(
		&self,
		grant_type: &'static str,
		extra: &[(&'static str, &str)],
	) -> Result<TokenGrant> {
		let mut form = vec![
			("grant_type", grant_type),
			("client_id", self.client_id.as_str()),
			("client_secret", self.client_secret.expose()),
		];

		form.extend_from_slice(extra);

		let endpoint = http::endpoint_label(&self.endpoints.token);
		let request = self.http_client.post(self.endpoints.token.clone()).form(&form);
		let response = http::send(request, &endpoint).await?;

		if !response.is_success() {
			return Err(map_token_error(grant_type, response));
		}
		// Some providers report OAuth errors with a 200 status.
		if let Ok(body) = serde_json::from_slice::<OAuthErrorBody>(&response.body) {
			return Err(map_oauth_error(grant_type, response.status, body));
		}

		response.json::<TokenResponse>().map(TokenGrant::from)
	}
}

fn map_token_error(grant_type: &str, response: ApiResponse) -> Error {
	match response.status {
		408 | 429 | 500..=599 => response.into_error(),
		status => match serde_json::from_slice::<OAuthErrorBody>(&response.body) {
			Ok(body) => map_oauth_error(grant_type, status, body),
			Err(_) if matches!(status, 400 | 401) => Error::ReauthorizationRequired {
				reason: format!("Token endpoint rejected the {grant_type} grant ({status})"),
			},
			Err(_) => response.into_error(),
		},
	}
}

fn map_oauth_error(grant_type: &str, status: u16, body: OAuthErrorBody) -> Error {
	let reason = match &body.error_description {
		Some(description) => format!("{}: {description}", body.error),
		None => body.error.clone(),
	};

	if FATAL_OAUTH_ERRORS.contains(&body.error.as_str()) || matches!(status, 400 | 401) {
		return Error::ReauthorizationRequired { reason };
	}
	if body.error == "temporarily_unavailable" || body.error == "server_error" {
		return TransientError::Upstream { message: reason, status: Some(status), retry_after: None }
			.into();
	}

	Error::Provider { status, message: format!("{grant_type} grant failed: {reason}") }
}
