//! Strongly typed identifiers for linked external accounts.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier.
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { IdentityId, "One user's link to an external service account; owns exactly one token pair.", "Identity" }
impl IdentityId {
	/// Derives the identity used for a Telegram user's DeviantArt connection.
	pub fn telegram(user_id: i64) -> Self {
		Self(format!("tg:{user_id}"))
	}

	/// Returns the Telegram user id when the identity was derived via [`IdentityId::telegram`].
	pub fn telegram_user_id(&self) -> Option<i64> {
		self.0.strip_prefix("tg:")?.parse().ok()
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identities_reject_whitespace_and_empty_values() {
		assert!(IdentityId::new(" tg:1").is_err(), "Leading whitespace must be rejected.");
		assert!(IdentityId::new("tg:1 ").is_err(), "Trailing whitespace must be rejected.");
		assert!(IdentityId::new("").is_err());

		let nbsp = format!("tg{}1", '\u{00A0}');

		assert!(IdentityId::new(&nbsp).is_err());
		assert!(IdentityId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
		IdentityId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");
	}

	#[test]
	fn telegram_identities_round_trip_user_ids() {
		let identity = IdentityId::telegram(424242);

		assert_eq!(identity.as_ref(), "tg:424242");
		assert_eq!(identity.telegram_user_id(), Some(424242));
		assert_eq!(
			IdentityId::new("da:someone").expect("Fixture should be valid.").telegram_user_id(),
			None
		);
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let identity: IdentityId =
			serde_json::from_str("\"tg:42\"").expect("Identity should deserialize successfully.");

		assert_eq!(identity.as_ref(), "tg:42");
		assert!(serde_json::from_str::<IdentityId>("\"with space\"").is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<IdentityId, u8> = HashMap::from_iter([(IdentityId::telegram(7), 7_u8)]);

		assert_eq!(map.get("tg:7"), Some(&7));
	}
}
