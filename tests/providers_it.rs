// std
use std::time::Duration;
// crates.io
use httpmock::prelude::*;
// self
use artbot_core::{
	_preludet::*,
	auth::TokenPair,
	provider::{
		ChatMessage, ChatRequest, DeviantArtClient, PollSchedule, PublishOptions, ReplicateClient,
		StashSubmission, TensorArtClient, TextClient, Txt2Img,
	},
	retry::RetryPolicy,
};

fn mock_url(server: &MockServer, path: &str) -> Url {
	Url::parse(&server.url(path)).expect("Mock URL should parse.")
}

fn fast_poll() -> PollSchedule {
	PollSchedule::new(Duration::from_millis(10), Duration::from_secs(5))
}

#[tokio::test]
async fn tensorart_first_successful_variant_wins() {
	let server = MockServer::start_async().await;
	let client =
		TensorArtClient::with_http_client(mock_url(&server, "/"), "ta-key", test_reqwest_http_client())
			.with_app_id("app-1");
	let create = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/jobs")
				.header("authorization", "Bearer ta-key")
				.header("app-id", "app-1")
				.header("x-app-id", "app-1");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"job":{"id":"job-9","status":"CREATED"}}"#);
		})
		.await;
	let job_id = client
		.create_job(Txt2Img::new("red dragon", 768, 1024).into_stages())
		.await
		.expect("Job creation should succeed.");

	create.assert_calls_async(1).await;

	assert_eq!(job_id, "job-9");
}

#[tokio::test]
async fn tensorart_failed_variants_are_aggregated() {
	let server = MockServer::start_async().await;
	let client =
		TensorArtClient::with_http_client(mock_url(&server, "/"), "ta-key", test_reqwest_http_client())
			.with_app_id("app-1");
	let create = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/jobs");
			then.status(404).body(r#"{"message":"route not found"}"#);
		})
		.await;
	let err = client.create_job(Vec::new()).await.expect_err("Every variant should fail.");

	create.assert_calls_async(3).await;

	let Error::Provider { status, message } = err else {
		panic!("Expected a provider error.");
	};

	assert_eq!(status, 404);
	assert!(message.contains("[plain]"));
	assert!(message.contains("[query-app_id]"));
	assert!(message.contains("[query-appId]"));
}

#[tokio::test]
async fn tensorart_without_app_id_only_tries_plain() {
	let server = MockServer::start_async().await;
	let client =
		TensorArtClient::with_http_client(mock_url(&server, "/"), "ta-key", test_reqwest_http_client());
	let create = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/jobs");
			then.status(503).body("busy");
		})
		.await;
	let err = client.create_job(Vec::new()).await.expect_err("Plain variant should fail.");

	create.assert_calls_async(1).await;

	assert!(err.is_transient());
}

#[tokio::test]
async fn tensorart_wait_returns_result_urls() {
	let server = MockServer::start_async().await;
	let client =
		TensorArtClient::with_http_client(mock_url(&server, "/"), "ta-key", test_reqwest_http_client())
			.with_poll_schedule(fast_poll());

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/jobs/job-ok");
			then.status(200).header("content-type", "application/json").body(
				r#"{"job":{"status":"SUCCESS","successInfo":{"images":[{"url":"https://cdn.example/a.png"},{"url":"https://cdn.example/a.png"}]}}}"#,
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/jobs/job-bad");
			then.status(200).body(r#"{"job":{"status":"FAILED"}}"#);
		})
		.await;

	let urls = client.wait_result_urls("job-ok").await.expect("Finished job should yield URLs.");

	assert_eq!(urls, ["https://cdn.example/a.png"]);
	assert!(matches!(client.wait_result_urls("job-bad").await, Err(Error::Provider { .. })));
}

#[tokio::test]
async fn text_completion_uses_bearer_and_first_choice() {
	let server = MockServer::start_async().await;
	let client = TextClient::with_http_client(
		mock_url(&server, "/v1"),
		"sk-test",
		"gpt-test",
		test_reqwest_http_client(),
	);
	let completion = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/chat/completions").header("authorization", "Bearer sk-test");
			then.status(200).header("content-type", "application/json").body(
				r#"{"choices":[{"message":{"content":" A knight in silver armor. "}}],"usage":{"prompt_tokens":12,"completion_tokens":7}}"#,
			);
		})
		.await;
	let request = ChatRequest::new(vec![
		ChatMessage::system("You write prompts."),
		ChatMessage::user("knight"),
	]);
	let result = client.complete(&request).await.expect("Completion should succeed.");

	completion.assert_calls_async(1).await;

	assert_eq!(result.text, "A knight in silver armor.");
	assert_eq!(result.model, "gpt-test");
	assert_eq!(result.completion_tokens, 7);
}

#[tokio::test]
async fn text_transient_failures_are_retried_up_to_the_limit() {
	let server = MockServer::start_async().await;
	let client = TextClient::with_http_client(
		mock_url(&server, "/v1"),
		"sk-test",
		"gpt-test",
		test_reqwest_http_client(),
	)
	.with_retry_policy(RetryPolicy::exponential(
		3,
		Duration::from_millis(5),
		Duration::from_millis(20),
	));
	let completion = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/chat/completions");
			then.status(503).body(r#"{"error":{"message":"overloaded"}}"#);
		})
		.await;
	let err = client
		.complete(&ChatRequest::new(vec![ChatMessage::user("knight")]))
		.await
		.expect_err("Persistent 503 should fail.");

	completion.assert_calls_async(3).await;

	assert!(err.is_transient());
}

#[tokio::test]
async fn text_bad_request_is_not_retried() {
	let server = MockServer::start_async().await;
	let client = TextClient::with_http_client(
		mock_url(&server, "/v1"),
		"sk-test",
		"gpt-test",
		test_reqwest_http_client(),
	);
	let completion = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/chat/completions");
			then.status(400).body(r#"{"message":"unknown model"}"#);
		})
		.await;
	let err = client
		.complete(&ChatRequest::new(vec![ChatMessage::user("knight")]))
		.await
		.expect_err("400 should fail.");

	completion.assert_calls_async(1).await;

	assert!(matches!(err, Error::Provider { status: 400, .. }));
}

#[tokio::test]
async fn replicate_polls_until_succeeded() {
	let server = MockServer::start_async().await;
	let client = ReplicateClient::with_http_client(
		mock_url(&server, "/v1"),
		"r8-token",
		"version-hash",
		test_reqwest_http_client(),
	)
	.with_poll_schedule(fast_poll());
	let poll_url = server.url("/v1/predictions/p-1");
	let create = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/predictions").header("authorization", "Token r8-token");
			then.status(201).header("content-type", "application/json").body(format!(
				r#"{{"id":"p-1","status":"starting","urls":{{"get":"{poll_url}"}}}}"#
			));
		})
		.await;
	let poll = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/predictions/p-1");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"id":"p-1","status":"succeeded","output":["https://replicate.example/out.png"]}"#);
		})
		.await;
	let url = client.generate("red dragon").await.expect("Prediction should succeed.");

	create.assert_calls_async(1).await;
	poll.assert_calls_async(1).await;

	assert_eq!(url, "https://replicate.example/out.png");
}

#[tokio::test]
async fn replicate_failed_prediction_is_a_provider_error() {
	let server = MockServer::start_async().await;
	let client = ReplicateClient::with_http_client(
		mock_url(&server, "/v1"),
		"r8-token",
		"version-hash",
		test_reqwest_http_client(),
	)
	.with_poll_schedule(fast_poll());

	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/predictions");
			then.status(201).body(r#"{"id":"p-2","status":"failed","error":"NSFW"}"#);
		})
		.await;

	let err = client.generate("red dragon").await.expect_err("Failed prediction should error.");

	assert!(matches!(err, Error::Provider { ref message, .. } if message.contains("NSFW")));
}

#[tokio::test]
async fn submit_and_publish_sends_cleaned_form() {
	let server = MockServer::start_async().await;
	let (manager, store) = build_test_token_manager(&server.base_url());
	let client =
		DeviantArtClient::with_http_client(mock_url(&server, "/api/v1/oauth2/"), test_reqwest_http_client());
	let id = identity("tg:2001");
	let pair = TokenPair::builder(id.clone())
		.access_token("access-live")
		.refresh_token("refresh-live")
		.expires_at(OffsetDateTime::now_utc() + time::Duration::hours(1))
		.build()
		.expect("Token pair fixture should build.");

	seed_pair(store.as_ref(), pair).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/oauth2/user/whoami");
			then.status(200).body(r#"{"userid":"u-1","username":"artist"}"#);
		})
		.await;

	let submit = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/v1/oauth2/stash/submit")
				.header("authorization", "Bearer access-live");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"status":"success","itemid":77,"stackid":5}"#);
		})
		.await;
	let publish = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/v1/oauth2/stash/publish")
				.header("authorization", "Bearer access-live")
				.form_urlencoded_tuple("itemid", "77")
				.form_urlencoded_tuple("display_resolution", "2")
				.form_urlencoded_tuple("is_ai_generated", "true")
				.form_urlencoded_tuple("add_watermark", "true")
				.form_urlencoded_tuple("galleryids[]", "ABCD-1234")
				.form_urlencoded_tuple("tags[]", "dragon");
			then.status(200).header("content-type", "application/json").body(
				r#"{"status":"success","url":"https://www.deviantart.com/artist/art/dragon-1","deviationid":"D-1"}"#,
			);
		})
		.await;
	let submission = StashSubmission::new(vec![0x89, 0x50, 0x4e, 0x47], "dragon.png", "Dragon")
		.with_tags(["dragon"]);
	let options = PublishOptions {
		display_resolution: 9,
		..PublishOptions::new("ignored")
			.with_galleries(["ABCD-1234", "featured"])
			.with_tags(["dragon"])
	};
	let published = client
		.submit_and_publish(&manager, &id, &submission, options)
		.await
		.expect("Publishing should succeed.");

	submit.assert_calls_async(1).await;
	publish.assert_calls_async(1).await;

	assert_eq!(published.deviationid, "D-1");
	assert!(published.url.ends_with("dragon-1"));
}
