//! Runs text and image jobs through the rate-limited dispatcher against local mock providers,
//! then prints the dispatcher's counters.

// std
use std::time::Duration;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use tracing_subscriber::EnvFilter;
use url::Url;
// self
use artbot_core::{
	dispatch::{Dispatcher, ProviderCategory},
	http::ReqwestHttpClient,
	provider::{ChatMessage, ChatRequest, PollSchedule, ReplicateClient, TextClient},
	ratelimit::RateLimit,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artbot_core=debug")),
		)
		.init();

	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/chat/completions");
			then.status(200).header("content-type", "application/json").body(
				"{\"choices\":[{\"message\":{\"content\":\"A silver-haired ranger at dusk.\"}}]}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/predictions");
			then.status(201).header("content-type", "application/json").body(
				"{\"id\":\"p-1\",\"status\":\"succeeded\",\"output\":[\"https://replicate.example/p-1.png\"]}",
			);
		})
		.await;

	let http_client = ReqwestHttpClient::with_timeout(Duration::from_secs(10))?;
	let text = TextClient::with_http_client(
		Url::parse(&server.url("/v1"))?,
		"demo-key",
		"demo-model",
		http_client.clone(),
	);
	let images = ReplicateClient::with_http_client(
		Url::parse(&server.url("/v1"))?,
		"demo-token",
		"demo-version",
		http_client,
	)
	.with_poll_schedule(PollSchedule::new(Duration::from_millis(100), Duration::from_secs(5)));
	let dispatcher = Dispatcher::with_limits([
		(ProviderCategory::TextGeneration, RateLimit::new(2, Duration::from_secs(1))?),
		(ProviderCategory::ImageSecondary, RateLimit::IMAGE_SECONDARY),
	]);

	dispatcher.start(3);

	for round in 1..=4 {
		let text = text.clone();

		dispatcher.submit(ProviderCategory::TextGeneration, async move {
			let completion =
				text.complete(&ChatRequest::new(vec![ChatMessage::user("Describe a character.")])).await?;

			println!("Round {round}: {}", completion.text);

			Ok::<_, artbot_core::error::Error>(())
		});
	}

	let image = dispatcher.submit_with_result(ProviderCategory::ImageSecondary, async move {
		images.generate("silver-haired ranger, dusk, oil painting").await
	});

	println!("Image ready at {}.", image.wait().await?);

	dispatcher.wait_idle().await;

	let metrics = dispatcher.metrics();

	println!(
		"Submitted {}, succeeded {}, failed {}.",
		metrics.submitted(),
		metrics.succeeded(),
		metrics.failed()
	);

	dispatcher.shutdown().await;

	Ok(())
}
