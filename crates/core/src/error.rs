//! Error types for the session and enrollment core.

use std::path::PathBuf;

use tether_protocol::{ProtocolError, RecordFormatError};
use tether_runtime::RegistryError;
use thiserror::Error;

/// Offline credential record failures.
///
/// Messages are fixed strings and never include key material, plaintext or
/// any part of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
	#[error(transparent)]
	Format(#[from] RecordFormatError),

	#[error("Cannot decrypt")]
	CannotDecrypt,

	#[error("Cannot encrypt")]
	CannotEncrypt,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("not logged in")]
	NotLoggedIn,

	#[error("no device matches this identity")]
	DeviceNotFound,

	#[error("invalid password")]
	InvalidPassword,

	#[error("no offline key stored for this device")]
	EncryptedKeyNotFound,

	#[error("enrollment context not started")]
	ContextNotStarted,

	#[error("invalid enrollment state: expected {expected}, found {found}")]
	InvalidState { expected: &'static str, found: &'static str },

	#[error("SAS code does not match")]
	BadSas,

	#[error("component failure: {0:#}")]
	ComponentFailure(anyhow::Error),

	#[error("peer failure: {0:#}")]
	Peer(anyhow::Error),

	#[error("component registry is shut down")]
	ShutDown,

	#[error("background task failed: {0}")]
	Task(#[from] tokio::task::JoinError),

	#[error(transparent)]
	Crypto(#[from] CryptoError),

	#[error("device file {}: {reason}", path.display())]
	DeviceFile { path: PathBuf, reason: String },

	#[error(transparent)]
	Protocol(#[from] ProtocolError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Maps a registry failure, turning `NotRegistered` into `absent`.
	pub(crate) fn from_registry(err: RegistryError, absent: Error) -> Self {
		match err {
			RegistryError::NotRegistered => absent,
			RegistryError::ComponentFailure(err) => Self::ComponentFailure(err),
			RegistryError::ShutDown => Self::ShutDown,
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
