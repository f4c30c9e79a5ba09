use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tempfile::TempDir;
use tether::runtime::ComponentRegistry;
use tether::testing::{FakeEngine, bootstrap_device};
use tether::{CoreConfig, Credentials, Error, SessionManager};
use tokio::time::timeout;

const KEY: &str = "device-secret";

struct Fixture {
	_temp: TempDir,
	engine: Arc<FakeEngine>,
	registry: Arc<ComponentRegistry>,
	sessions: Arc<SessionManager<FakeEngine>>,
}

fn fixture(engine: FakeEngine) -> Fixture {
	let temp = TempDir::new().unwrap();
	let config = CoreConfig::default().with_config_dir(temp.path()).with_device_kdf_iterations(1_000);
	bootstrap_device(&config, "Acme", "alice@example.com", KEY).unwrap();
	bootstrap_device(&config, "Acme", "bob@example.com", "bob-secret").unwrap();

	let engine = Arc::new(engine);
	let registry = Arc::new(ComponentRegistry::new());
	let sessions = Arc::new(SessionManager::new(config, engine.clone(), registry.clone()));
	Fixture {
		_temp: temp,
		engine,
		registry,
		sessions,
	}
}

#[tokio::test]
async fn concurrent_logins_share_one_session() {
	let fx = fixture(FakeEngine::new().with_start_delay(Duration::from_millis(20)));

	let logins = (0..8).map(|_| {
		let sessions = fx.sessions.clone();
		async move { sessions.login("alice@example.com", Credentials::key(KEY), None).await }
	});
	let tokens: Vec<_> = join_all(logins).await.into_iter().map(Result::unwrap).collect();

	assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));
	assert_eq!(fx.engine.started(), 1);
	assert_eq!(fx.registry.len(), 1);
}

#[tokio::test]
async fn distinct_users_get_distinct_sessions() {
	let fx = fixture(FakeEngine::new());

	let alice = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();
	let bob = fx.sessions.login("bob@example.com", Credentials::key("bob-secret"), None).await.unwrap();

	assert_ne!(alice, bob);
	assert_eq!(fx.engine.started(), 2);
	let email = fx
		.sessions
		.with_session(&bob, |core| async move { Ok(core.device.email().map(str::to_owned)) })
		.await
		.unwrap();
	assert_eq!(email.as_deref(), Some("bob@example.com"));
}

#[tokio::test]
async fn logout_then_relogin_issues_fresh_token() {
	let fx = fixture(FakeEngine::new());
	let first = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	fx.sessions.logout(&first).await.unwrap();
	assert_eq!(fx.engine.stopped(), 1);
	assert!(!fx.sessions.is_logged_in(&first));
	let after_logout = fx.sessions.with_session(&first, |_core| async { Ok(()) }).await;
	assert!(matches!(after_logout, Err(Error::NotLoggedIn)));

	let second = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();
	assert_ne!(first, second);
	assert_eq!(fx.engine.started(), 2);
	assert!(fx.sessions.with_session(&second, |_core| async { Ok(()) }).await.is_ok());
}

#[tokio::test]
async fn second_logout_is_not_logged_in() {
	let fx = fixture(FakeEngine::new());
	let token = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	let (first, second) = tokio::join!(fx.sessions.logout(&token), fx.sessions.logout(&token));
	let outcomes = [first, second];

	assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
	assert!(outcomes.iter().any(|outcome| matches!(outcome, Err(Error::NotLoggedIn))));
	assert!(matches!(fx.sessions.logout(&token).await, Err(Error::NotLoggedIn)));
	assert_eq!(fx.engine.stopped(), 1);
}

#[tokio::test]
async fn logout_cancels_in_flight_request() {
	let fx = fixture(FakeEngine::new());
	let token = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	let request = {
		let sessions = fx.sessions.clone();
		let token = token.clone();
		tokio::spawn(async move {
			sessions
				.with_session(&token, |_core| async {
					std::future::pending::<()>().await;
					Ok(())
				})
				.await
		})
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	timeout(Duration::from_secs(2), fx.sessions.logout(&token)).await.unwrap().unwrap();
	let outcome = timeout(Duration::from_secs(2), request).await.unwrap().unwrap();
	assert!(matches!(outcome, Err(Error::NotLoggedIn)));
}

#[tokio::test]
async fn request_errors_are_component_failures() {
	let fx = fixture(FakeEngine::new());
	let token = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	let outcome: tether::Result<()> = fx
		.sessions
		.with_session(&token, |_core| async { Err(anyhow::anyhow!("workspace not found")) })
		.await;

	assert!(matches!(outcome, Err(Error::ComponentFailure(_))));
	assert!(fx.sessions.is_logged_in(&token));
}

#[tokio::test]
async fn crashed_core_logs_the_session_out() {
	let fx = fixture(FakeEngine::new());
	let token = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	fx.sessions
		.with_session(&token, |core| async move {
			core.crash();
			Ok(())
		})
		.await
		.unwrap();
	timeout(Duration::from_secs(2), async {
		while fx.engine.stopped() == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();

	let outcome = fx.sessions.with_session(&token, |_core| async { Ok(()) }).await;
	assert!(matches!(outcome, Err(Error::NotLoggedIn)));

	let fresh = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();
	assert_ne!(fresh, token);
}

#[tokio::test]
async fn failed_core_start_leaves_no_session() {
	let fx = fixture(FakeEngine::new());
	fx.engine.fail_next_start();

	let outcome = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await;
	assert!(matches!(outcome, Err(Error::ComponentFailure(_))));
	assert!(fx.registry.is_empty());

	let devices = fx.sessions.list_available_devices(false).await.unwrap();
	assert!(devices.iter().all(|device| device.token.is_none()));
	assert!(fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.is_ok());
}

#[tokio::test]
async fn unknown_identity_is_device_not_found() {
	let fx = fixture(FakeEngine::new());

	let unknown = fx.sessions.login("carol@example.com", Credentials::key(KEY), None).await;
	assert!(matches!(unknown, Err(Error::DeviceNotFound)));

	let other_org = "Globex".parse().unwrap();
	let wrong_org = fx.sessions.login("alice@example.com", Credentials::key(KEY), Some(&other_org)).await;
	assert!(matches!(wrong_org, Err(Error::DeviceNotFound)));
}

#[tokio::test]
async fn wrong_key_is_invalid_password() {
	let fx = fixture(FakeEngine::new());

	let outcome = fx.sessions.login("alice@example.com", Credentials::key("not-the-key"), None).await;

	assert!(matches!(outcome, Err(Error::InvalidPassword)));
	assert_eq!(fx.engine.started(), 0);
}

#[tokio::test]
async fn listing_reports_live_tokens() {
	let fx = fixture(FakeEngine::new());
	let token = fx.sessions.login("alice@example.com", Credentials::key(KEY), None).await.unwrap();

	let devices = fx.sessions.list_available_devices(false).await.unwrap();
	assert_eq!(devices.len(), 2);
	let alice = devices.iter().find(|entry| entry.device.email() == Some("alice@example.com")).unwrap();
	let bob = devices.iter().find(|entry| entry.device.email() == Some("bob@example.com")).unwrap();
	assert_eq!(alice.token.as_ref(), Some(&token));
	assert_eq!(bob.token, None);

	assert!(fx.sessions.list_available_devices(true).await.unwrap().is_empty());
}
