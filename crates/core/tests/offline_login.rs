use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tether::crypto::encrypt_offline_key;
use tether::offline::{has_offline_key, load_offline_key, save_offline_key};
use tether::runtime::ComponentRegistry;
use tether::testing::{FakeEngine, bootstrap_device};
use tether::{AvailableDevice, CoreConfig, Credentials, Error, SessionManager};
use tokio::time::timeout;

const EMAIL: &str = "alice@example.com";
const KEY: &str = "device-secret";
const PASSWORD: &str = "P@ssw0rd";

fn setup() -> (TempDir, AvailableDevice, SessionManager<FakeEngine>) {
	let temp = TempDir::new().unwrap();
	let config = CoreConfig::default().with_config_dir(temp.path()).with_device_kdf_iterations(1_000);
	let device = bootstrap_device(&config, "Acme", EMAIL, KEY).unwrap();
	let sessions = SessionManager::new(config, Arc::new(FakeEngine::new()), Arc::new(ComponentRegistry::new()));
	(temp, device, sessions)
}

async fn wait_for_record(device: &AvailableDevice) {
	timeout(Duration::from_secs(10), async {
		while !has_offline_key(device) {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("offline record written");
}

#[tokio::test]
async fn password_login_after_online_login() {
	let (_temp, device, sessions) = setup();

	let online = sessions.login(EMAIL, Credentials::key_with_password(KEY, PASSWORD), None).await.unwrap();
	wait_for_record(&device).await;
	sessions.logout(&online).await.unwrap();

	let offline = sessions.login(EMAIL, Credentials::user_password(PASSWORD), None).await.unwrap();
	assert_ne!(online, offline);
	assert!(sessions.is_logged_in(&offline));

	let listed = sessions.list_available_devices(true).await.unwrap();
	assert_eq!(listed.len(), 1);
	assert!(listed[0].has_offline_key);
	assert_eq!(listed[0].token.as_ref(), Some(&offline));
}

#[tokio::test]
async fn password_login_without_record_fails() {
	let (_temp, _device, sessions) = setup();

	let outcome = sessions.login(EMAIL, Credentials::user_password(PASSWORD), None).await;

	assert!(matches!(outcome, Err(Error::EncryptedKeyNotFound)));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
	let (_temp, device, sessions) = setup();
	let online = sessions.login(EMAIL, Credentials::key_with_password(KEY, PASSWORD), None).await.unwrap();
	wait_for_record(&device).await;
	sessions.logout(&online).await.unwrap();

	let outcome = sessions.login(EMAIL, Credentials::user_password("hunter2"), None).await;

	match outcome {
		Err(err @ Error::InvalidPassword) => assert!(!err.to_string().contains(KEY)),
		other => panic!("expected InvalidPassword, got {other:?}"),
	}
}

#[tokio::test]
async fn malformed_stored_record_is_invalid_password() {
	let (_temp, device, sessions) = setup();
	save_offline_key(&device, "not base64!").await.unwrap();

	let outcome = sessions.login(EMAIL, Credentials::user_password(PASSWORD), None).await;

	assert!(matches!(outcome, Err(Error::InvalidPassword)), "got {outcome:?}");
}

#[tokio::test]
async fn front_end_record_is_stored_verbatim() {
	let (_temp, device, sessions) = setup();
	let record = encrypt_offline_key(PASSWORD, KEY).unwrap();

	sessions.login(EMAIL, Credentials::encrypted_key(record.clone(), PASSWORD), None).await.unwrap();
	wait_for_record(&device).await;

	assert_eq!(load_offline_key(&device).await.unwrap(), Some(record));
}

#[tokio::test]
async fn front_end_record_with_wrong_password_is_rejected() {
	let (_temp, device, sessions) = setup();
	let record = encrypt_offline_key(PASSWORD, KEY).unwrap();

	let outcome = sessions.login(EMAIL, Credentials::encrypted_key(record, "hunter2"), None).await;

	assert!(matches!(outcome, Err(Error::InvalidPassword)));
	assert!(!has_offline_key(&device));
}

#[tokio::test]
async fn record_of_wrong_secret_does_not_open_device() {
	let (_temp, _device, sessions) = setup();
	let record = encrypt_offline_key(PASSWORD, "some-other-secret").unwrap();

	let outcome = sessions.login(EMAIL, Credentials::encrypted_key(record, PASSWORD), None).await;

	assert!(matches!(outcome, Err(Error::InvalidPassword)));
}

#[tokio::test]
async fn plain_key_login_writes_no_record() {
	let (_temp, device, sessions) = setup();

	sessions.login(EMAIL, Credentials::key(KEY), None).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert!(!has_offline_key(&device));
}
