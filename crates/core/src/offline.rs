//! Persisted offline credential records, one per device.
//!
//! The record for a device sits next to its key file as
//! `<key_file_dir>/<slughash>.enc_key`. A missing record only means the device
//! was never unlocked online with a password.

use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;

use crate::device::AvailableDevice;
use crate::error::Result;

pub const OFFLINE_KEY_EXT: &str = "enc_key";

/// Location of the offline record for `device`.
pub fn offline_key_path(device: &AvailableDevice) -> PathBuf {
	let dir = device.key_file_path.parent().map(PathBuf::from).unwrap_or_default();
	dir.join(format!("{}.{OFFLINE_KEY_EXT}", device.slughash))
}

pub async fn load_offline_key(device: &AvailableDevice) -> Result<Option<String>> {
	match tokio::fs::read_to_string(offline_key_path(device)).await {
		Ok(record) => Ok(Some(record.trim().to_owned())),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Writes `record`, replacing any previous one. Readers never see a partial record.
pub async fn save_offline_key(device: &AvailableDevice, record: &str) -> Result<()> {
	let path = offline_key_path(device);
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let staging = path.with_extension(format!("{OFFLINE_KEY_EXT}.tmp"));
	tokio::fs::write(&staging, record).await?;
	tokio::fs::rename(&staging, &path).await?;
	debug!(target = "tether.device", device = %device.device_id, "offline key saved");
	Ok(())
}

pub fn has_offline_key(device: &AvailableDevice) -> bool {
	offline_key_path(device).is_file()
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;
	use tether_protocol::HumanHandle;

	use super::*;

	fn device(dir: &std::path::Path) -> AvailableDevice {
		AvailableDevice {
			organization_id: "Acme".parse().unwrap(),
			device_id: "bob@phone".into(),
			device_label: None,
			human_handle: Some(HumanHandle {
				email: "bob@example.com".into(),
				label: "Bob".into(),
			}),
			slughash: "abc123".into(),
			key_file_path: dir.join("abc123.keys"),
		}
	}

	#[tokio::test]
	async fn absent_record_is_not_an_error() {
		let temp = TempDir::new().unwrap();
		let device = device(temp.path());

		assert_eq!(load_offline_key(&device).await.unwrap(), None);
		assert!(!has_offline_key(&device));
	}

	#[tokio::test]
	async fn save_overwrites_previous_record() {
		let temp = TempDir::new().unwrap();
		let device = device(temp.path());

		save_offline_key(&device, "Zmlyc3Q=").await.unwrap();
		save_offline_key(&device, "c2Vjb25k").await.unwrap();

		assert_eq!(offline_key_path(&device), temp.path().join("abc123.enc_key"));
		assert_eq!(load_offline_key(&device).await.unwrap().as_deref(), Some("c2Vjb25k"));
		assert!(has_offline_key(&device));
	}
}
