//! DeviantArt publish target: Sta.sh submission, publishing, and the token liveness probe.
//!
//! Authenticated calls take the [`TokenManager`] and identity they act for and run through
//! [`TokenManager::call_authorized`], so an expired token is refreshed and the call retried once.

// crates.io
use reqwest::{
	RequestBuilder,
	multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenSecret},
	error::ConfigError,
	http::{self, ApiResponse, ReqwestHttpClient},
	lifecycle::{LivenessProbe, ProbeFuture, TokenManager},
	provider::DEFAULT_REQUEST_TIMEOUT,
};

/// OAuth2 API base for authenticated DeviantArt calls.
pub const DEVIANTART_API_BASE: &str = "https://www.deviantart.com/api/v1/oauth2/";

const GALLERY_FOLDER_LIMIT: &str = "50";
const FALLBACK_DISPLAY_RESOLUTION: u8 = 2;

/// Account behind an access token.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct User {
	/// Stable user id.
	pub userid: String,
	/// Display name.
	pub username: String,
	/// Avatar URL.
	#[serde(default)]
	pub usericon: Option<String>,
}

/// One gallery folder.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GalleryFolder {
	/// Folder UUID, used as a publish target.
	pub folderid: String,
	/// Folder name.
	pub name: String,
}

/// Page of gallery folders.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GalleryFolders {
	/// Folders on this page.
	pub results: Vec<GalleryFolder>,
	/// Whether more folders exist.
	#[serde(default)]
	pub has_more: bool,
}

/// Sta.sh submission result.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StashSubmitted {
	/// `success` on success.
	pub status: String,
	/// Sta.sh item id, the input for publishing.
	pub itemid: u64,
	/// Stack the item landed in.
	#[serde(default)]
	pub stackid: Option<u64>,
}

/// Publish result.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Published {
	/// `success` on success.
	pub status: String,
	/// Public deviation URL.
	pub url: String,
	/// Deviation UUID.
	pub deviationid: String,
}

/// File and metadata for a Sta.sh upload.
#[derive(Clone, Debug)]
pub struct StashSubmission {
	/// Image bytes.
	pub file: Vec<u8>,
	/// File name reported to DeviantArt.
	pub filename: String,
	/// Deviation title.
	pub title: String,
	/// Description shown under the deviation.
	pub artist_comments: String,
	/// Tags without the leading `#`.
	pub tags: Vec<String>,
	/// Marks the item as a work in progress.
	pub is_dirty: bool,
	/// Declares the image AI-generated.
	pub is_ai_generated: bool,
	/// Opts the image out of AI training.
	pub noai: bool,
}
impl StashSubmission {
	/// Creates a submission with DeviantArt's AI-art defaults.
	pub fn new(file: Vec<u8>, filename: impl Into<String>, title: impl Into<String>) -> Self {
		Self {
			file,
			filename: filename.into(),
			title: title.into(),
			artist_comments: String::new(),
			tags: Vec::new(),
			is_dirty: false,
			is_ai_generated: true,
			noai: false,
		}
	}

	/// Sets the description.
	pub fn with_comments(mut self, artist_comments: impl Into<String>) -> Self {
		self.artist_comments = artist_comments.into();

		self
	}

	/// Sets the tags.
	pub fn with_tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags = tags.into_iter().map(Into::into).collect();

		self
	}

	fn to_form(&self) -> Result<Form> {
		let file = Part::bytes(self.file.clone())
			.file_name(self.filename.clone())
			.mime_str("application/octet-stream")
			.map_err(|e| ConfigError::RequestBuild { source: Box::new(e) })?;
		let mut form = Form::new()
			.part("file", file)
			.text("title", self.title.clone())
			.text("artist_comments", self.artist_comments.clone())
			.text("is_dirty", flag(self.is_dirty))
			.text("is_ai_generated", flag(self.is_ai_generated))
			.text("noai", flag(self.noai));

		for tag in clean(&self.tags) {
			form = form.text("tags[]", tag.to_owned());
		}

		Ok(form)
	}
}

/// Publishing options for a Sta.sh item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOptions {
	/// Sta.sh item id.
	pub itemid: String,
	/// Mature content flag.
	pub is_mature: bool,
	/// Declares the image AI-generated.
	pub is_ai_generated: bool,
	/// Opts the image out of AI training.
	pub noai: bool,
	/// Adds DeviantArt's watermark.
	pub add_watermark: bool,
	/// Display resolution, 0..=3; other values fall back to 2.
	pub display_resolution: u8,
	/// Features the deviation in the profile.
	pub feature: bool,
	/// Allows comments.
	pub allow_comments: bool,
	/// Allows downloading the original.
	pub allow_free_download: bool,
	/// Target gallery folder UUIDs.
	pub galleryids: Vec<String>,
	/// Tags without the leading `#`.
	pub tags: Vec<String>,
}
impl PublishOptions {
	/// Creates options with the bot's publishing defaults.
	pub fn new(itemid: impl Into<String>) -> Self {
		Self {
			itemid: itemid.into(),
			is_mature: false,
			is_ai_generated: true,
			noai: false,
			add_watermark: true,
			display_resolution: 3,
			feature: true,
			allow_comments: true,
			allow_free_download: false,
			galleryids: Vec::new(),
			tags: Vec::new(),
		}
	}

	/// Sets the target gallery folders.
	pub fn with_galleries<I, S>(mut self, galleryids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.galleryids = galleryids.into_iter().map(Into::into).collect();

		self
	}

	/// Sets the tags.
	pub fn with_tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags = tags.into_iter().map(Into::into).collect();

		self
	}

	/// Resolution actually sent: values outside 0..=3 become 2.
	pub fn effective_resolution(&self) -> u8 {
		if self.display_resolution <= 3 {
			self.display_resolution
		} else {
			FALLBACK_DISPLAY_RESOLUTION
		}
	}

	/// Urlencoded form fields in submission order.
	pub fn form_fields(&self) -> Vec<(&'static str, String)> {
		let mut fields = vec![
			("itemid", self.itemid.clone()),
			("is_mature", flag(self.is_mature).into()),
			("is_ai_generated", flag(self.is_ai_generated).into()),
			("noai", flag(self.noai).into()),
			("add_watermark", flag(self.add_watermark).into()),
			("display_resolution", self.effective_resolution().to_string()),
			("feature", flag(self.feature).into()),
			("allow_comments", flag(self.allow_comments).into()),
			("allow_free_download", flag(self.allow_free_download).into()),
		];

		fields.extend(
			clean(&self.galleryids)
				.filter(|id| id.contains('-'))
				.map(|id| ("galleryids[]", id.to_owned())),
		);
		fields.extend(clean(&self.tags).map(|tag| ("tags[]", tag.to_owned())));

		fields
	}
}

/// DeviantArt API client.
#[derive(Clone, Debug)]
pub struct DeviantArtClient {
	http_client: ReqwestHttpClient,
	api_base: Url,
}
impl DeviantArtClient {
	/// Creates a client against the public API with its own transport.
	pub fn new() -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			Url::parse(DEVIANTART_API_BASE)?,
			ReqwestHttpClient::with_timeout(DEFAULT_REQUEST_TIMEOUT)?,
		))
	}

	/// Creates a client over a caller-provided base and transport.
	pub fn with_http_client(api_base: Url, http_client: ReqwestHttpClient) -> Self {
		Self { http_client, api_base }
	}

	/// Account behind a raw access token, bypassing the token manager.
	pub async fn whoami_with(&self, access_token: &TokenSecret) -> Result<User> {
		self.get(access_token, "user/whoami", &[]).await?.json()
	}

	/// Account connected for `identity`.
	pub async fn whoami(&self, tokens: &TokenManager, identity: &IdentityId) -> Result<User> {
		tokens.call_authorized(identity, |token| async move { self.whoami_with(&token).await }).await
	}

	/// First page (up to 50) of the identity's gallery folders.
	pub async fn gallery_folders(
		&self,
		tokens: &TokenManager,
		identity: &IdentityId,
	) -> Result<GalleryFolders> {
		tokens
			.call_authorized(identity, |token| async move {
				self.get(&token, "gallery/folders", &[("limit", GALLERY_FOLDER_LIMIT)]).await?.json()
			})
			.await
	}

	/// Uploads a file to the identity's Sta.sh.
	pub async fn stash_submit(
		&self,
		tokens: &TokenManager,
		identity: &IdentityId,
		submission: &StashSubmission,
	) -> Result<StashSubmitted> {
		tokens
			.call_authorized(identity, |token| async move {
				let url = http::join_path(&self.api_base, "stash/submit")?;
				let label = http::endpoint_label(&url);
				let request =
					self.http_client.post(url).bearer_auth(token.expose()).multipart(submission.to_form()?);

				decode(http::send(request, &label).await?)
			})
			.await
	}

	/// Publishes a Sta.sh item as a deviation.
	pub async fn stash_publish(
		&self,
		tokens: &TokenManager,
		identity: &IdentityId,
		options: &PublishOptions,
	) -> Result<Published> {
		let fields = options.form_fields();

		tracing::debug!(
			identity = %identity,
			itemid = %options.itemid,
			display_resolution = options.effective_resolution(),
			"Publishing Sta.sh item."
		);

		tokens
			.call_authorized(identity, |token| {
				let fields = &fields;

				async move {
					let url = http::join_path(&self.api_base, "stash/publish")?;
					let label = http::endpoint_label(&url);
					let request = self.http_client.post(url).bearer_auth(token.expose()).form(fields);

					decode(http::send(request, &label).await?)
				}
			})
			.await
	}

	/// Uploads and publishes in one go, targeting the item the upload produced.
	pub async fn submit_and_publish(
		&self,
		tokens: &TokenManager,
		identity: &IdentityId,
		submission: &StashSubmission,
		options: PublishOptions,
	) -> Result<Published> {
		let submitted = self.stash_submit(tokens, identity, submission).await?;
		let options = PublishOptions { itemid: submitted.itemid.to_string(), ..options };

		self.stash_publish(tokens, identity, &options).await
	}

	async fn get(
		&self,
		access_token: &TokenSecret,
		path: &str,
		query: &[(&str, &str)],
	) -> Result<ApiResponse> {
		let url = http::join_path(&self.api_base, path)?;
		let label = http::endpoint_label(&url);
		let request = self.authorized(self.http_client.get(url), access_token).query(query);
		let response = http::send(request, &label).await?;

		if !response.is_success() {
			return Err(response.into_error());
		}

		Ok(response)
	}

	fn authorized(&self, request: RequestBuilder, access_token: &TokenSecret) -> RequestBuilder {
		request.bearer_auth(access_token.expose()).header("Accept", "application/json")
	}
}
impl LivenessProbe for DeviantArtClient {
	fn probe<'a>(&'a self, access_token: &'a TokenSecret) -> ProbeFuture<'a> {
		Box::pin(async move { self.get(access_token, "user/whoami", &[]).await.map(|_| ()) })
	}
}

fn decode<T>(response: ApiResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	if !response.is_success() {
		return Err(response.into_error());
	}

	response.json()
}

fn flag(value: bool) -> &'static str {
	if value { "true" } else { "false" }
}

fn clean(values: &[String]) -> impl Iterator<Item = &str> {
	values.iter().map(|value| value.trim()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn publish_fields_clamp_resolution_and_filter_galleries() {
		let options = PublishOptions {
			display_resolution: 7,
			..PublishOptions::new("42")
				.with_galleries(["ABCD-1234", "featured", " "])
				.with_tags(["dragon", "  ", " fantasy "])
		};
		let fields = options.form_fields();
		let value = |name: &str| {
			fields.iter().filter(|(key, _)| *key == name).map(|(_, v)| v.as_str()).collect::<Vec<_>>()
		};

		assert_eq!(value("itemid"), ["42"]);
		assert_eq!(value("display_resolution"), ["2"]);
		assert_eq!(value("add_watermark"), ["true"]);
		assert_eq!(value("allow_free_download"), ["false"]);
		assert_eq!(value("galleryids[]"), ["ABCD-1234"]);
		assert_eq!(value("tags[]"), ["dragon", "fantasy"]);
	}

	#[test]
	fn valid_resolutions_pass_through() {
		for resolution in 0..=3 {
			let options = PublishOptions { display_resolution: resolution, ..PublishOptions::new("1") };

			assert_eq!(options.effective_resolution(), resolution);
		}
	}

	#[test]
	fn submission_defaults_mark_ai_art() {
		let submission = StashSubmission::new(vec![1, 2, 3], "art.png", "Title");

		assert!(submission.is_ai_generated);
		assert!(!submission.noai);
		assert!(!submission.is_dirty);
		assert!(submission.to_form().is_ok());
	}
}
