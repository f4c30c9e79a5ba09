//! Identifiers and small value types exchanged with front-ends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Organization identifier: 1 to 32 characters out of ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

impl OrganizationId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for OrganizationId {
	type Error = ProtocolError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		let valid = (1..=32).contains(&value.chars().count()) && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
		if valid { Ok(Self(value)) } else { Err(ProtocolError::InvalidOrganizationId(value)) }
	}
}

impl FromStr for OrganizationId {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::try_from(s.to_owned())
	}
}

impl From<OrganizationId> for String {
	fn from(value: OrganizationId) -> Self {
		value.0
	}
}

impl fmt::Display for OrganizationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Opaque token identifying one logged-in session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
	/// Mints a fresh random token (32 lowercase hex characters).
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	/// Extracts the token presented by a request.
	///
	/// An `Authorization` header takes precedence over the session cookie. A
	/// header with a scheme other than `Bearer` (case-insensitive), or without
	/// a value, yields no token at all.
	pub fn from_request(authorization: Option<&str>, cookie: Option<&str>) -> Option<Self> {
		let Some(header) = authorization else {
			return cookie.filter(|value| !value.is_empty()).map(Self::from);
		};

		let (scheme, token) = header.trim().split_once(char::is_whitespace)?;
		let token = token.trim();
		if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
			return None;
		}
		Some(Self::from(token))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for SessionToken {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}

impl From<String> for SessionToken {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl fmt::Display for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let prefix: String = self.0.chars().take(6).collect();
		write!(f, "SessionToken({prefix}…)")
	}
}

/// Human identity attached to a user device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanHandle {
	pub email: String,
	pub label: String,
}

/// Access level granted to a user joining an organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserProfile {
	Admin,
	#[default]
	Standard,
	Outsider,
}

impl FromStr for UserProfile {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ADMIN" => Ok(Self::Admin),
			"STANDARD" => Ok(Self::Standard),
			"OUTSIDER" => Ok(Self::Outsider),
			_ => Err(ProtocolError::InvalidUserProfile(s.to_owned())),
		}
	}
}
