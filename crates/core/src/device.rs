//! On-disk device key files.
//!
//! Each device lives in `<devices_dir>/<slughash>.keys`, a JSON document whose
//! public part identifies the device and whose private part (the signing key)
//! is sealed with AES-256-GCM under a key derived from the device secret.
//!
//! Everything here is blocking; callers on the async runtime go through
//! [`tokio::task::spawn_blocking`].

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tether_protocol::{HumanHandle, OrganizationId, UserProfile};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Error, Result};

pub const KEY_FILE_EXT: &str = "keys";
const SALT_LEN: usize = 16;
const SIGNING_KEY_LEN: usize = 32;

/// Stable file name stem of a device: hex SHA-256 of `<org>#<device_id>`.
pub fn slughash(organization_id: &OrganizationId, device_id: &str) -> String {
	hex::encode(Sha256::digest(format!("{organization_id}#{device_id}")))
}

/// A device unlocked from its key file.
#[derive(Clone)]
pub struct LocalDevice {
	pub organization_id: OrganizationId,
	pub device_id: String,
	pub device_label: Option<String>,
	pub human_handle: Option<HumanHandle>,
	pub profile: UserProfile,
	signing_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for LocalDevice {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalDevice")
			.field("organization_id", &self.organization_id)
			.field("device_id", &self.device_id)
			.field("human_handle", &self.human_handle)
			.finish_non_exhaustive()
	}
}

impl LocalDevice {
	/// Creates a device with a fresh random signing key.
	pub fn generate(
		organization_id: OrganizationId,
		device_id: impl Into<String>,
		human_handle: Option<HumanHandle>,
		device_label: Option<String>,
		profile: UserProfile,
	) -> Self {
		let mut signing_key = Zeroizing::new(vec![0u8; SIGNING_KEY_LEN]);
		rand::thread_rng().fill_bytes(&mut signing_key);
		Self {
			organization_id,
			device_id: device_id.into(),
			device_label,
			human_handle,
			profile,
			signing_key,
		}
	}

	pub fn slughash(&self) -> String {
		slughash(&self.organization_id, &self.device_id)
	}

	pub fn email(&self) -> Option<&str> {
		self.human_handle.as_ref().map(|handle| handle.email.as_str())
	}

	pub fn signing_key(&self) -> &[u8] {
		&self.signing_key
	}
}

/// Public view of a key file, readable without the device secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDevice {
	pub organization_id: OrganizationId,
	pub device_id: String,
	pub device_label: Option<String>,
	pub human_handle: Option<HumanHandle>,
	pub slughash: String,
	pub key_file_path: PathBuf,
}

impl AvailableDevice {
	pub fn email(&self) -> Option<&str> {
		self.human_handle.as_ref().map(|handle| handle.email.as_str())
	}

	/// Returns `true` if this device belongs to `email`, within `organization_id` if given.
	pub fn matches(&self, email: &str, organization_id: Option<&OrganizationId>) -> bool {
		organization_id.is_none_or(|org| *org == self.organization_id) && self.email() == Some(email)
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
	organization_id: OrganizationId,
	device_id: String,
	#[serde(default)]
	device_label: Option<String>,
	#[serde(default)]
	human_handle: Option<HumanHandle>,
	#[serde(default)]
	profile: UserProfile,
	slughash: String,
	salt: String,
	iterations: u32,
	nonce: String,
	ciphertext: String,
}

impl KeyFile {
	fn available(&self, path: &Path) -> AvailableDevice {
		AvailableDevice {
			organization_id: self.organization_id.clone(),
			device_id: self.device_id.clone(),
			device_label: self.device_label.clone(),
			human_handle: self.human_handle.clone(),
			slughash: self.slughash.clone(),
			key_file_path: path.to_path_buf(),
		}
	}
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
	let content = fs::read_to_string(path)?;
	serde_json::from_str(&content).map_err(|err| Error::DeviceFile {
		path: path.to_path_buf(),
		reason: err.to_string(),
	})
}

/// Lists every readable key file in `devices_dir`, sorted by path.
///
/// A missing directory yields an empty list. Unreadable files are skipped.
pub fn list_available_devices(devices_dir: &Path) -> Result<Vec<AvailableDevice>> {
	let entries = match fs::read_dir(devices_dir) {
		Ok(entries) => entries,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(err) => return Err(err.into()),
	};

	let mut paths: Vec<PathBuf> = entries
		.filter_map(|entry| entry.ok().map(|entry| entry.path()))
		.filter(|path| path.extension().is_some_and(|ext| ext == KEY_FILE_EXT))
		.collect();
	paths.sort();

	let mut devices = Vec::with_capacity(paths.len());
	for path in paths {
		match read_key_file(&path) {
			Ok(file) => devices.push(file.available(&path)),
			Err(err) => warn!(target = "tether.device", path = %path.display(), error = %err, "skipping unreadable key file"),
		}
	}
	Ok(devices)
}

/// Opens a key file with the device secret.
///
/// Fails with [`Error::InvalidPassword`] when the secret does not open the file.
pub fn load_device_with_key(available: &AvailableDevice, key: &str) -> Result<LocalDevice> {
	let path = &available.key_file_path;
	let file = read_key_file(path)?;
	let bad_field = |field: &str| Error::DeviceFile {
		path: path.clone(),
		reason: format!("invalid {field}"),
	};
	let salt = hex::decode(&file.salt).map_err(|_| bad_field("salt"))?;
	let nonce = hex::decode(&file.nonce).map_err(|_| bad_field("nonce"))?;
	let ciphertext = hex::decode(&file.ciphertext).map_err(|_| bad_field("ciphertext"))?;

	let derived = crypto::derive_key(key, &salt, file.iterations);
	let signing_key = crypto::open(&derived, &nonce, &ciphertext).map_err(|_| Error::InvalidPassword)?;

	debug!(target = "tether.device", device = %file.device_id, "device key file opened");
	Ok(LocalDevice {
		organization_id: file.organization_id,
		device_id: file.device_id,
		device_label: file.device_label,
		human_handle: file.human_handle,
		profile: file.profile,
		signing_key,
	})
}

/// Writes `device` to `<devices_dir>/<slughash>.keys`, sealed under `key`.
pub fn save_device(devices_dir: &Path, device: &LocalDevice, key: &str, iterations: u32) -> Result<AvailableDevice> {
	let mut salt = [0u8; SALT_LEN];
	rand::thread_rng().fill_bytes(&mut salt);
	let derived = crypto::derive_key(key, &salt, iterations);
	let (nonce, ciphertext) = crypto::seal(&derived, device.signing_key())?;

	let file = KeyFile {
		organization_id: device.organization_id.clone(),
		device_id: device.device_id.clone(),
		device_label: device.device_label.clone(),
		human_handle: device.human_handle.clone(),
		profile: device.profile,
		slughash: device.slughash(),
		salt: hex::encode(salt),
		iterations,
		nonce: hex::encode(nonce),
		ciphertext: hex::encode(ciphertext),
	};

	fs::create_dir_all(devices_dir)?;
	let path = devices_dir.join(format!("{}.{KEY_FILE_EXT}", file.slughash));
	fs::write(&path, serde_json::to_string_pretty(&file)?)?;
	debug!(target = "tether.device", device = %device.device_id, path = %path.display(), "device key file saved");
	Ok(file.available(&path))
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	fn alice() -> LocalDevice {
		LocalDevice::generate(
			"Acme".parse().unwrap(),
			"alice@laptop",
			Some(HumanHandle {
				email: "alice@example.com".into(),
				label: "Alice".into(),
			}),
			Some("laptop".into()),
			UserProfile::Admin,
		)
	}

	#[test]
	fn slughash_is_sha256_of_org_and_device() {
		let org: OrganizationId = "Acme".parse().unwrap();
		let expected = hex::encode(Sha256::digest(b"Acme#alice@laptop"));
		assert_eq!(slughash(&org, "alice@laptop"), expected);
		assert_eq!(expected.len(), 64);
	}

	#[test]
	fn saved_device_is_listed_and_opens_with_its_key() {
		let temp = TempDir::new().unwrap();
		let device = alice();
		let available = save_device(temp.path(), &device, "s3cret", 10).unwrap();

		let listed = list_available_devices(temp.path()).unwrap();
		assert_eq!(listed, vec![available.clone()]);
		assert!(available.matches("alice@example.com", None));
		assert!(available.matches("alice@example.com", Some(&"Acme".parse().unwrap())));
		assert!(!available.matches("alice@example.com", Some(&"Other".parse().unwrap())));

		let loaded = load_device_with_key(&available, "s3cret").unwrap();
		assert_eq!(loaded.signing_key(), device.signing_key());
		assert_eq!(loaded.profile, UserProfile::Admin);
	}

	#[test]
	fn wrong_key_is_invalid_password() {
		let temp = TempDir::new().unwrap();
		let available = save_device(temp.path(), &alice(), "s3cret", 10).unwrap();
		assert!(matches!(load_device_with_key(&available, "nope"), Err(Error::InvalidPassword)));
	}

	#[test]
	fn missing_dir_lists_nothing_and_junk_is_skipped() {
		let temp = TempDir::new().unwrap();
		assert!(list_available_devices(&temp.path().join("absent")).unwrap().is_empty());

		fs::write(temp.path().join("junk.keys"), "{}").unwrap();
		fs::write(temp.path().join("notes.txt"), "hello").unwrap();
		assert!(list_available_devices(temp.path()).unwrap().is_empty());
	}

	#[test]
	fn debug_output_hides_signing_key() {
		let rendered = format!("{:?}", alice());
		assert!(rendered.contains("alice@laptop"));
		assert!(!rendered.contains("signing_key"));
	}
}
