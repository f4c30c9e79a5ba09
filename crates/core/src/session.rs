//! Logged-in sessions, one running core per (organization, email).
//!
//! A login resolves the device key file for an identity, unlocks it and
//! registers the resulting core in the [`ComponentRegistry`]. The caller gets
//! back an opaque [`SessionToken`]; every later request goes through
//! [`SessionManager::with_session`], which runs under a read acquisition of the
//! core so that a logout cancels it instead of racing it.
//!
//! Logins for the same identity are serialized by a login lock and
//! deduplicated: a second login returns the token of the running session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tether_protocol::{OrganizationId, SessionToken};
use tether_runtime::{ComponentFactory, ComponentGuard, ComponentRegistry, Handle};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::CoreConfig;
use crate::crypto;
use crate::device::{self, AvailableDevice, LocalDevice};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::offline;

/// How a login proves it may open a device.
pub enum Credentials {
	/// The device secret itself.
	Key(Zeroizing<String>),
	/// The device secret plus a password; an offline record is written on success.
	KeyWithPassword { key: Zeroizing<String>, user_password: Zeroizing<String> },
	/// An offline record held by the front-end, opened with the password and
	/// stored as is on success.
	EncryptedKey { encrypted_key: String, user_password: Zeroizing<String> },
	/// Only the password; the offline record stored for the device is used.
	UserPassword(Zeroizing<String>),
}

impl Credentials {
	pub fn key(key: impl Into<String>) -> Self {
		Self::Key(Zeroizing::new(key.into()))
	}

	pub fn key_with_password(key: impl Into<String>, user_password: impl Into<String>) -> Self {
		Self::KeyWithPassword {
			key: Zeroizing::new(key.into()),
			user_password: Zeroizing::new(user_password.into()),
		}
	}

	pub fn encrypted_key(encrypted_key: impl Into<String>, user_password: impl Into<String>) -> Self {
		Self::EncryptedKey {
			encrypted_key: encrypted_key.into(),
			user_password: Zeroizing::new(user_password.into()),
		}
	}

	pub fn user_password(user_password: impl Into<String>) -> Self {
		Self::UserPassword(Zeroizing::new(user_password.into()))
	}

	fn mode(&self) -> &'static str {
		match self {
			Self::Key(_) => "key",
			Self::KeyWithPassword { .. } => "key_with_password",
			Self::EncryptedKey { .. } => "encrypted_key",
			Self::UserPassword(_) => "user_password",
		}
	}
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Credentials::{}(..)", self.mode())
	}
}

/// A device on disk, with the token of its session when logged in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
	#[serde(flatten)]
	pub device: AvailableDevice,
	pub token: Option<SessionToken>,
	pub has_offline_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
	organization_id: OrganizationId,
	email: String,
}

/// Both directions of the session index. A `None` handle marks a login that
/// is still starting its core.
struct SessionIndex<C> {
	handles: HashMap<SessionToken, Option<Handle<C>>>,
	tokens: HashMap<SessionKey, SessionToken>,
}

impl<C> Default for SessionIndex<C> {
	fn default() -> Self {
		Self {
			handles: HashMap::new(),
			tokens: HashMap::new(),
		}
	}
}

impl<C> SessionIndex<C> {
	/// Drops `token`, and the identity entry if it still points at `token`.
	fn forget(&mut self, key: &SessionKey, token: &SessionToken) -> Option<Handle<C>> {
		if self.tokens.get(key) == Some(token) {
			self.tokens.remove(key);
		}
		self.handles.remove(token).flatten()
	}
}

type SharedIndex<C> = Arc<Mutex<SessionIndex<C>>>;

/// Index entries of one session, removed when its core stops.
struct SessionEntry<C> {
	index: SharedIndex<C>,
	key: SessionKey,
	token: SessionToken,
}

impl<C> SessionEntry<C> {
	fn forget(&self) {
		self.index.lock().forget(&self.key, &self.token);
	}
}

/// Removes a pending login's entries unless the login completes.
struct PendingLogin<C> {
	entry: Option<SessionEntry<C>>,
}

impl<C> PendingLogin<C> {
	fn complete(mut self) {
		self.entry = None;
	}
}

impl<C> Drop for PendingLogin<C> {
	fn drop(&mut self) {
		if let Some(entry) = self.entry.take() {
			entry.forget();
		}
	}
}

struct CoreFactory<E: Engine> {
	engine: Arc<E>,
	config: CoreConfig,
	device: Option<LocalDevice>,
	entry: SessionEntry<E::Core>,
}

impl<E: Engine> ComponentFactory for CoreFactory<E> {
	type Component = E::Core;

	async fn start(&mut self) -> anyhow::Result<E::Core> {
		let device = self.device.take().ok_or_else(|| anyhow::anyhow!("core already started"))?;
		self.engine.start_core(&self.config, device).await
	}

	async fn supervise(&mut self, core: Arc<E::Core>) -> anyhow::Result<()> {
		self.engine.monitor_core(core).await
	}

	async fn teardown(self, core: Arc<E::Core>) {
		self.entry.forget();
		self.engine.stop_core(core).await;
		debug!(target = "tether.session", organization = %self.entry.key.organization_id, "core stopped");
	}
}

/// What to write to the offline record once the login is validated.
enum OfflineUpdate {
	Encrypt(Zeroizing<String>),
	Verbatim(String),
}

/// Session table of one process.
pub struct SessionManager<E: Engine> {
	config: CoreConfig,
	engine: Arc<E>,
	registry: Arc<ComponentRegistry>,
	index: SharedIndex<E::Core>,
	login_lock: tokio::sync::Mutex<()>,
}

impl<E: Engine> SessionManager<E> {
	pub fn new(config: CoreConfig, engine: Arc<E>, registry: Arc<ComponentRegistry>) -> Self {
		Self {
			config,
			engine,
			registry,
			index: Arc::default(),
			login_lock: tokio::sync::Mutex::new(()),
		}
	}

	pub fn config(&self) -> &CoreConfig {
		&self.config
	}

	pub fn engine(&self) -> &Arc<E> {
		&self.engine
	}

	pub fn registry(&self) -> &Arc<ComponentRegistry> {
		&self.registry
	}

	/// Opens a session for `email`, or returns the token of the running one.
	///
	/// # Errors
	///
	/// - [`Error::DeviceNotFound`] if no key file belongs to the identity.
	/// - [`Error::EncryptedKeyNotFound`] for a password-only login on a device
	///   without an offline record.
	/// - [`Error::InvalidPassword`] if the credentials open no matching device.
	/// - [`Error::ComponentFailure`] if the engine fails to start the core.
	pub async fn login(&self, email: &str, credentials: Credentials, organization_id: Option<&OrganizationId>) -> Result<SessionToken> {
		let candidates = self.matching_devices(email, organization_id).await?;
		if candidates.is_empty() {
			return Err(Error::DeviceNotFound);
		}
		debug!(target = "tether.session", mode = credentials.mode(), candidates = candidates.len(), "resolving login");

		let (secret, update) = match credentials {
			Credentials::Key(key) => (key, None),
			Credentials::KeyWithPassword { key, user_password } => (key, Some(OfflineUpdate::Encrypt(user_password))),
			Credentials::EncryptedKey {
				encrypted_key,
				user_password,
			} => {
				let record = encrypted_key.clone();
				let secret = spawn_blocking(move || crypto::decrypt_offline_key(&user_password, &record))
					.await?
					.map_err(|_| Error::InvalidPassword)?;
				(secret, Some(OfflineUpdate::Verbatim(encrypted_key)))
			}
			Credentials::UserPassword(user_password) => (unlock_offline(&candidates, user_password).await?, None),
		};

		let (available, device) = open_device(candidates, secret.clone()).await?;
		if let Some(update) = update {
			persist_offline_key(available.clone(), update, secret);
		}

		let key = SessionKey {
			organization_id: available.organization_id.clone(),
			email: email.to_owned(),
		};
		self.activate(key, device).await
	}

	/// Stops the session behind `token`.
	///
	/// A token that is unknown, or already logged out, yields [`Error::NotLoggedIn`].
	pub async fn logout(&self, token: &SessionToken) -> Result<()> {
		let handle = {
			let mut index = self.index.lock();
			let key = index.tokens.iter().find(|(_, candidate)| *candidate == token).map(|(key, _)| key.clone());
			match key {
				Some(key) => index.forget(&key, token),
				None => index.handles.remove(token).flatten(),
			}
		};
		let handle = handle.ok_or(Error::NotLoggedIn)?;

		self.registry
			.unregister(handle)
			.await
			.map_err(|err| Error::from_registry(err, Error::NotLoggedIn))?;
		info!(target = "tether.session", handle = handle.id(), "session closed");
		Ok(())
	}

	/// Runs `body` against the core of `token`.
	///
	/// `body` is dropped if the session is logged out meanwhile, and the call
	/// fails with [`Error::NotLoggedIn`]. Errors from `body` come back as
	/// [`Error::ComponentFailure`].
	pub async fn with_session<F, Fut, T>(&self, token: &SessionToken, body: F) -> Result<T>
	where
		F: FnOnce(Arc<E::Core>) -> Fut,
		Fut: Future<Output = anyhow::Result<T>>,
	{
		let handle = self.handle_for(token)?;
		let outcome = self
			.registry
			.with_component(handle, body)
			.await
			.map_err(|err| Error::from_registry(err, Error::NotLoggedIn))?;
		outcome.map_err(Error::ComponentFailure)
	}

	/// Acquires the core of `token` until the guard is dropped.
	pub async fn acquire_session(&self, token: &SessionToken) -> Result<ComponentGuard<E::Core>> {
		let handle = self.handle_for(token)?;
		self.registry
			.acquire(handle)
			.await
			.map_err(|err| Error::from_registry(err, Error::NotLoggedIn))
	}

	pub fn is_logged_in(&self, token: &SessionToken) -> bool {
		self.handle_for(token).is_ok_and(|handle| self.registry.is_registered(handle))
	}

	/// Lists the devices on disk with their session token, if logged in.
	pub async fn list_available_devices(&self, only_offline_available: bool) -> Result<Vec<DeviceSession>> {
		let devices_dir = self.config.devices_dir();
		let devices = spawn_blocking(move || {
			device::list_available_devices(&devices_dir).map(|devices| {
				devices
					.into_iter()
					.map(|device| {
						let has_offline_key = offline::has_offline_key(&device);
						(device, has_offline_key)
					})
					.collect::<Vec<_>>()
			})
		})
		.await??;

		let index = self.index.lock();
		Ok(devices
			.into_iter()
			.filter(|(_, has_offline_key)| !only_offline_available || *has_offline_key)
			.map(|(device, has_offline_key)| {
				let token = device.email().and_then(|email| {
					let key = SessionKey {
						organization_id: device.organization_id.clone(),
						email: email.to_owned(),
					};
					index
						.tokens
						.get(&key)
						.filter(|token| matches!(index.handles.get(*token), Some(Some(_))))
						.cloned()
				});
				DeviceSession {
					device,
					token,
					has_offline_key,
				}
			})
			.collect())
	}

	fn handle_for(&self, token: &SessionToken) -> Result<Handle<E::Core>> {
		self.index.lock().handles.get(token).copied().flatten().ok_or(Error::NotLoggedIn)
	}

	async fn matching_devices(&self, email: &str, organization_id: Option<&OrganizationId>) -> Result<Vec<AvailableDevice>> {
		let devices_dir = self.config.devices_dir();
		let devices = spawn_blocking(move || device::list_available_devices(&devices_dir)).await??;
		Ok(devices.into_iter().filter(|device| device.matches(email, organization_id)).collect())
	}

	/// Returns the running session for `key`, or starts a core for `device`.
	async fn activate(&self, key: SessionKey, device: LocalDevice) -> Result<SessionToken> {
		let _login = self.login_lock.lock().await;

		let running = self.index.lock().tokens.get(&key).cloned();
		if let Some(token) = running {
			debug!(target = "tether.session", organization = %key.organization_id, "reusing running session");
			return Ok(token);
		}

		let token = SessionToken::generate();
		{
			let mut index = self.index.lock();
			index.handles.insert(token.clone(), None);
			index.tokens.insert(key.clone(), token.clone());
		}
		let pending = PendingLogin {
			entry: Some(SessionEntry {
				index: self.index.clone(),
				key: key.clone(),
				token: token.clone(),
			}),
		};

		let factory = CoreFactory {
			engine: self.engine.clone(),
			config: self.config.clone(),
			device: Some(device),
			entry: SessionEntry {
				index: self.index.clone(),
				key: key.clone(),
				token: token.clone(),
			},
		};
		let handle = self
			.registry
			.register(factory)
			.await
			.map_err(|err| Error::from_registry(err, Error::ComponentFailure(anyhow::anyhow!("core stopped during startup"))))?;

		let activated = match self.index.lock().handles.get_mut(&token) {
			Some(slot) => {
				*slot = Some(handle);
				true
			}
			None => false,
		};
		if !activated {
			// The core already stopped and took its entries along.
			let _ = self.registry.unregister(handle).await;
			return Err(Error::ComponentFailure(anyhow::anyhow!("core stopped during login")));
		}
		pending.complete();

		info!(target = "tether.session", organization = %key.organization_id, handle = handle.id(), "session opened");
		Ok(token)
	}
}

/// Recovers the device secret from the offline record of the first candidate
/// whose record opens with `user_password`.
async fn unlock_offline(candidates: &[AvailableDevice], user_password: Zeroizing<String>) -> Result<Zeroizing<String>> {
	let mut last_error = None;
	for candidate in candidates {
		let Some(record) = offline::load_offline_key(candidate).await? else {
			continue;
		};
		let password = user_password.clone();
		match spawn_blocking(move || crypto::decrypt_offline_key(&password, &record)).await? {
			Ok(secret) => return Ok(secret),
			Err(err) => {
				debug!(target = "tether.session", device = %candidate.device_id, error = %err, "offline record did not open");
				last_error = Some(err);
			}
		}
	}
	match last_error {
		None => Err(Error::EncryptedKeyNotFound),
		Some(_) => Err(Error::InvalidPassword),
	}
}

/// Opens the first candidate key file `secret` unlocks.
async fn open_device(candidates: Vec<AvailableDevice>, secret: Zeroizing<String>) -> Result<(AvailableDevice, LocalDevice)> {
	spawn_blocking(move || {
		for available in candidates {
			match device::load_device_with_key(&available, &secret) {
				Ok(device) => return Ok((available, device)),
				Err(err) => debug!(target = "tether.session", device = %available.device_id, error = %err, "key file did not open"),
			}
		}
		Err(Error::InvalidPassword)
	})
	.await?
}

/// Writes the offline record of `device` in the background. Failures are logged.
fn persist_offline_key(device: AvailableDevice, update: OfflineUpdate, secret: Zeroizing<String>) {
	tokio::spawn(async move {
		let record = match update {
			OfflineUpdate::Verbatim(record) => record,
			OfflineUpdate::Encrypt(user_password) => {
				match spawn_blocking(move || crypto::encrypt_offline_key(&user_password, &secret)).await {
					Ok(Ok(record)) => record,
					Ok(Err(err)) => {
						warn!(target = "tether.session", device = %device.device_id, error = %err, "cannot encrypt offline key");
						return;
					}
					Err(err) => {
						warn!(target = "tether.session", device = %device.device_id, error = %err, "offline key task failed");
						return;
					}
				}
			}
		};
		if let Err(err) = offline::save_offline_key(&device, &record).await {
			warn!(target = "tether.session", device = %device.device_id, error = %err, "cannot save offline key");
		}
	});
}
