use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Core(#[from] tether::Error),

	#[error(transparent)]
	Crypto(#[from] tether::CryptoError),

	#[error("background task failed: {0}")]
	Task(#[from] tokio::task::JoinError),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
