//! Error types for the component runtime.

use thiserror::Error;

/// A writer cancelled a read before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read lock was cancelled by a pending writer")]
pub struct ReadCancelledByWriter;

/// Errors returned by [`ComponentRegistry`](crate::ComponentRegistry) operations.
#[derive(Debug, Error)]
pub enum RegistryError {
	/// The handle is unknown, already unregistered, or its component stopped.
	#[error("component is not registered")]
	NotRegistered,

	/// The component failed while starting.
	#[error("component failed to start: {0:#}")]
	ComponentFailure(anyhow::Error),

	/// The registry has been shut down and accepts no new components.
	#[error("component registry is shut down")]
	ShutDown,
}

impl From<ReadCancelledByWriter> for RegistryError {
	fn from(_: ReadCancelledByWriter) -> Self {
		Self::NotRegistered
	}
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
