use std::path::PathBuf;

use tether::CoreConfig;
use tracing::debug;

use crate::error::Result;

/// State shared by every command of one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
	pub config: CoreConfig,
}

impl CommandContext {
	/// Loads the configuration from `config_dir`, or from the default location.
	pub fn load(config_dir: Option<PathBuf>) -> Result<Self> {
		let config_dir = config_dir.unwrap_or_else(|| CoreConfig::default().config_dir);
		let config = CoreConfig::load(&config_dir)?;
		debug!(target = "tether.cli", config_dir = %config.config_dir.display(), "configuration loaded");
		Ok(Self { config })
	}
}
