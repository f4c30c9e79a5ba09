//! Core configuration.
//!
//! Read from `<config_dir>/config.json` when present. Every field is optional
//! in the file; missing ones fall back to platform defaults.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "tether";
const DEVICES_DIR: &str = "devices";

/// Iterations of the KDF protecting device key files.
pub const DEFAULT_DEVICE_KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
	pub config_dir: PathBuf,
	pub data_base_dir: PathBuf,
	pub device_kdf_iterations: u32,
	/// Interval between keepalive pings sent by a running core, in seconds.
	pub backend_keepalive: u64,
}

impl Default for CoreConfig {
	fn default() -> Self {
		let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR);
		let data_base_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR);
		Self {
			config_dir,
			data_base_dir,
			device_kdf_iterations: DEFAULT_DEVICE_KDF_ITERATIONS,
			backend_keepalive: 29,
		}
	}
}

impl CoreConfig {
	/// Loads `<config_dir>/config.json`, or defaults rooted at `config_dir` if absent.
	pub fn load(config_dir: impl Into<PathBuf>) -> Result<Self> {
		let config_dir = config_dir.into();
		let path = config_dir.join(CONFIG_FILE);
		let mut config = match fs::read_to_string(&path) {
			Ok(content) => serde_json::from_str::<Self>(&content)?,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				debug!(target = "tether.session", path = %path.display(), "no config file; using defaults");
				Self::default()
			}
			Err(err) => return Err(err.into()),
		};
		config.config_dir = config_dir;
		Ok(config)
	}

	/// Writes the configuration to `<config_dir>/config.json`.
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.config_dir)?;
		let json = serde_json::to_string_pretty(self)?;
		fs::write(self.config_file(), json)?;
		Ok(())
	}

	pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config_dir = dir.into();
		self
	}

	pub fn with_data_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.data_base_dir = dir.into();
		self
	}

	pub fn with_device_kdf_iterations(mut self, iterations: u32) -> Self {
		self.device_kdf_iterations = iterations;
		self
	}

	/// Directory holding device key files and offline key records.
	pub fn devices_dir(&self) -> PathBuf {
		self.config_dir.join(DEVICES_DIR)
	}

	pub fn keepalive(&self) -> Duration {
		Duration::from_secs(self.backend_keepalive)
	}

	pub fn config_file(&self) -> PathBuf {
		self.config_dir.join(CONFIG_FILE)
	}
}
