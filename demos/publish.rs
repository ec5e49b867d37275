//! Connects a Telegram user to a (mock) DeviantArt account, persists the tokens encrypted on
//! disk, and publishes an image from a dispatched job.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use tracing_subscriber::EnvFilter;
use url::Url;
// self
use artbot_core::{
	auth::IdentityId,
	dispatch::{Dispatcher, ProviderCategory},
	http::ReqwestHttpClient,
	lifecycle::TokenManager,
	oauth::{OAuthClient, OAuthEndpoints},
	provider::{DeviantArtClient, PublishOptions, StashSubmission},
	store::{FileStore, SecretCipher},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artbot_core=info")),
		)
		.init();

	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"refresh_token\":\"demo-refresh\",\"expires_in\":3600}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/oauth2/user/whoami");
			then.status(200).body("{\"userid\":\"u-1\",\"username\":\"demo-artist\"}");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/oauth2/stash/submit");
			then.status(200).body("{\"status\":\"success\",\"itemid\":1}");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/oauth2/stash/publish");
			then.status(200).body(
				"{\"status\":\"success\",\"url\":\"https://www.deviantart.com/demo-artist/art/1\",\"deviationid\":\"D-1\"}",
			);
		})
		.await;

	let http_client = ReqwestHttpClient::default();
	let store_path = std::env::temp_dir().join("artbot-demo-credentials.json");
	let store = Arc::new(FileStore::open(&store_path, SecretCipher::from_passphrase("demo passphrase")?)?);
	let oauth = OAuthClient::new(
		OAuthEndpoints::new(
			Url::parse(&server.url("/oauth2/authorize"))?,
			Url::parse(&server.url("/oauth2/token"))?,
		),
		"demo-client",
		"demo-secret",
		http_client.clone(),
	);
	let deviantart =
		Arc::new(DeviantArtClient::with_http_client(Url::parse(&server.url("/api/v1/oauth2/"))?, http_client));
	let tokens = TokenManager::new(store, oauth, deviantart.clone());
	let identity = IdentityId::telegram(4242);

	println!("Send the user to {}.", tokens.authorize_url(&identity));

	// The OAuth callback hands back the state and the authorization code.
	let identity = TokenManager::identity_from_state(identity.as_ref())?;

	tokens.connect(&identity, "demo-code").await?;

	println!("Credentials stored at {}.", store_path.display());

	let dispatcher = Dispatcher::new();

	dispatcher.start(1);

	let published = dispatcher.submit_with_result(ProviderCategory::Default, {
		let tokens = tokens.clone();

		async move {
			let submission = StashSubmission::new(vec![0x89, 0x50, 0x4e, 0x47], "ranger.png", "Ranger")
				.with_comments("Generated by the art bot.")
				.with_tags(["ranger", "fantasy"]);

			deviantart
				.submit_and_publish(&tokens, &identity, &submission, PublishOptions::new(""))
				.await
		}
	});

	println!("Published at {}.", published.wait().await?.url);

	dispatcher.shutdown().await;

	Ok(())
}
