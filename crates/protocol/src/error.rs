use thiserror::Error;

/// Failures parsing values received from front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
	#[error("invalid organization id: {0:?}")]
	InvalidOrganizationId(String),

	#[error("invalid invitation url: {0}")]
	InvalidInvitationUrl(String),

	#[error("invalid invitation api token")]
	InvalidApiToken,

	#[error("invalid SAS code: {0:?}")]
	InvalidSasCode(String),

	#[error("unknown user profile: {0:?}")]
	InvalidUserProfile(String),
}

/// Reasons an offline credential record cannot be parsed.
///
/// Messages are part of the front-end contract and must not carry any
/// fragment of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordFormatError {
	#[error("Invalid format: not base64")]
	NotBase64,

	#[error("Invalid format: cannot retrieve iv and encrypted key")]
	MissingParts,

	#[error("Invalid format: cannot deserialize")]
	NotDeserializable,
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
