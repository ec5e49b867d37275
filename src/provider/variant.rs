//! Request shapes tried, in order, against gateways with inconsistent app-id handling.

// self
use crate::_prelude::*;

/// One way of presenting the application id to the image API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestVariant {
	/// No query parameter; the app id travels only in headers.
	Plain,
	/// `?app_id=<id>`.
	QueryAppIdSnake,
	/// `?appId=<id>`.
	QueryAppIdCamel,
}
impl RequestVariant {
	/// Order used when the caller does not configure one.
	pub const DEFAULT_ORDER: [RequestVariant; 3] =
		[RequestVariant::Plain, RequestVariant::QueryAppIdSnake, RequestVariant::QueryAppIdCamel];

	/// Returns a stable label suitable for logs and aggregated errors.
	pub const fn as_str(self) -> &'static str {
		match self {
			RequestVariant::Plain => "plain",
			RequestVariant::QueryAppIdSnake => "query-app_id",
			RequestVariant::QueryAppIdCamel => "query-appId",
		}
	}

	/// Query parameter this variant adds, if any.
	///
	/// Variants that need an app id yield `None` when none is configured and should be skipped.
	pub fn query_param<'a>(self, app_id: Option<&'a str>) -> Option<Option<(&'static str, &'a str)>> {
		match (self, app_id) {
			(RequestVariant::Plain, _) => Some(None),
			(RequestVariant::QueryAppIdSnake, Some(id)) => Some(Some(("app_id", id))),
			(RequestVariant::QueryAppIdCamel, Some(id)) => Some(Some(("appId", id))),
			(_, None) => None,
		}
	}
}
impl Display for RequestVariant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn query_params_depend_on_app_id() {
		assert_eq!(RequestVariant::Plain.query_param(None), Some(None));
		assert_eq!(RequestVariant::QueryAppIdSnake.query_param(None), None);
		assert_eq!(
			RequestVariant::QueryAppIdSnake.query_param(Some("app")),
			Some(Some(("app_id", "app")))
		);
		assert_eq!(
			RequestVariant::QueryAppIdCamel.query_param(Some("app")),
			Some(Some(("appId", "app")))
		);
	}
}
