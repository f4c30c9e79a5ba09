//! Invitation addresses and the api tokens that carry them.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::types::OrganizationId;

pub const URL_SCHEME: &str = "tether";

/// What joining through an invitation creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationKind {
	/// A new user in the organization.
	User,
	/// A new device for an existing user.
	Device,
}

impl InvitationKind {
	fn action(self) -> &'static str {
		match self {
			Self::User => "claim_user",
			Self::Device => "claim_device",
		}
	}

	fn from_action(action: &str) -> Option<Self> {
		match action {
			"claim_user" => Some(Self::User),
			"claim_device" => Some(Self::Device),
			_ => None,
		}
	}
}

/// Random token identifying one invitation on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvitationToken(Uuid);

impl InvitationToken {
	pub fn generate() -> Self {
		Self(Uuid::new_v4())
	}

	pub fn hex(&self) -> String {
		self.0.simple().to_string()
	}
}

impl FromStr for InvitationToken {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self> {
		Uuid::try_parse(s)
			.map(Self)
			.map_err(|_| ProtocolError::InvalidInvitationUrl(format!("bad token {s:?}")))
	}
}

/// Address of one invitation, used verbatim as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvitationAddr {
	host: String,
	port: Option<u16>,
	organization_id: OrganizationId,
	kind: InvitationKind,
	token: InvitationToken,
}

impl InvitationAddr {
	pub fn new(host: impl Into<String>, port: Option<u16>, organization_id: OrganizationId, kind: InvitationKind, token: InvitationToken) -> Self {
		Self {
			host: host.into(),
			port,
			organization_id,
			kind,
			token,
		}
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> Option<u16> {
		self.port
	}

	pub fn organization_id(&self) -> &OrganizationId {
		&self.organization_id
	}

	pub fn kind(&self) -> InvitationKind {
		self.kind
	}

	pub fn token(&self) -> InvitationToken {
		self.token
	}

	/// `tether://<host>[:<port>]/<org>?action=<claim_user|claim_device>&token=<hex>`
	pub fn to_url(&self) -> String {
		let server = match self.port {
			Some(port) => format!("{}:{port}", self.host),
			None => self.host.clone(),
		};
		format!(
			"{URL_SCHEME}://{server}/{}?action={}&token={}",
			self.organization_id,
			self.kind.action(),
			self.token.hex()
		)
	}

	pub fn from_url(raw: &str) -> Result<Self> {
		let invalid = |reason: &str| ProtocolError::InvalidInvitationUrl(reason.to_owned());
		let url = Url::parse(raw).map_err(|err| invalid(&err.to_string()))?;
		if url.scheme() != URL_SCHEME {
			return Err(invalid("unexpected scheme"));
		}
		let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(|| invalid("missing host"))?;

		let mut segments = url.path_segments().ok_or_else(|| invalid("missing organization"))?;
		let organization_id = match (segments.next(), segments.next()) {
			(Some(org), None) => org.parse::<OrganizationId>()?,
			_ => return Err(invalid("missing organization")),
		};

		let mut kind = None;
		let mut token = None;
		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"action" => kind = InvitationKind::from_action(&value),
				"token" => token = Some(value.parse::<InvitationToken>()?),
				_ => {}
			}
		}

		Ok(Self {
			host: host.to_owned(),
			port: url.port(),
			organization_id,
			kind: kind.ok_or_else(|| invalid("missing or unknown action"))?,
			token: token.ok_or_else(|| invalid("missing token"))?,
		})
	}

	/// Encodes the address as the opaque token handed to front-ends.
	pub fn to_api_token(&self) -> String {
		URL_SAFE.encode(self.to_url())
	}

	pub fn from_api_token(api_token: &str) -> Result<Self> {
		let raw = URL_SAFE.decode(api_token).map_err(|_| ProtocolError::InvalidApiToken)?;
		let url = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidApiToken)?;
		Self::from_url(&url)
	}
}

impl fmt::Display for InvitationAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_url())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TOKEN: &str = "0123456789abcdef0123456789abcdef";

	fn addr() -> InvitationAddr {
		InvitationAddr::new("example.com", Some(6777), "Acme".parse().unwrap(), InvitationKind::User, TOKEN.parse().unwrap())
	}

	#[test]
	fn url_layout() {
		assert_eq!(
			addr().to_url(),
			"tether://example.com:6777/Acme?action=claim_user&token=0123456789abcdef0123456789abcdef"
		);
	}

	#[test]
	fn api_token_is_url_safe_base64_of_url() {
		let api_token = addr().to_api_token();
		assert_eq!(
			api_token,
			"dGV0aGVyOi8vZXhhbXBsZS5jb206Njc3Ny9BY21lP2FjdGlvbj1jbGFpbV91c2VyJnRva2VuPTAxMjM0NTY3ODlhYmNkZWYwMTIzNDU2Nzg5YWJjZGVm"
		);
		assert_eq!(InvitationAddr::from_api_token(&api_token).unwrap(), addr());
	}

	#[test]
	fn device_invitation_without_port() {
		let url = format!("tether://parsec.example/Acme?action=claim_device&token={TOKEN}");
		let parsed = InvitationAddr::from_url(&url).unwrap();
		assert_eq!(parsed.kind(), InvitationKind::Device);
		assert_eq!(parsed.port(), None);
		assert_eq!(parsed.to_url(), url);
	}

	#[test]
	fn rejects_malformed_urls() {
		assert!(InvitationAddr::from_url("https://example.com/Acme?action=claim_user&token=0123456789abcdef0123456789abcdef").is_err());
		assert!(InvitationAddr::from_url("tether://example.com/Acme?action=claim_admin&token=0123456789abcdef0123456789abcdef").is_err());
		assert!(InvitationAddr::from_url("tether://example.com/Acme?action=claim_user").is_err());
		assert!(InvitationAddr::from_url("tether://example.com/?action=claim_user&token=0123456789abcdef0123456789abcdef").is_err());
		assert_eq!(InvitationAddr::from_api_token("%%%"), Err(ProtocolError::InvalidApiToken));
	}
}
