//! In-memory collaborators for tests and local experiments.
//!
//! [`FakeEngine`] starts cores without touching a backend and counts starts
//! and stops. [`FakeInviteEngine`] plays both sides of an invitation with
//! scripted SAS codes and records what the greeter created.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_protocol::{HumanHandle, InvitationAddr, OrganizationId, SasCode, UserProfile};
use tokio::sync::Notify;

use crate::config::CoreConfig;
use crate::device::{AvailableDevice, LocalDevice, save_device};
use crate::engine::{Engine, InviteEngine};
use crate::enrollment::claim::{ClaimInfo, ClaimerPeer};
use crate::enrollment::greet::{ClaimRequest, GreeterPeer};
use crate::error::Result;

/// Writes a key file for `email` in `config`'s devices directory.
pub fn bootstrap_device(config: &CoreConfig, organization_id: &str, email: &str, key: &str) -> Result<AvailableDevice> {
	let organization_id: OrganizationId = organization_id.parse()?;
	let device_id = format!("{email}@{:08x}", rand::random::<u32>());
	let device = LocalDevice::generate(
		organization_id,
		device_id,
		Some(HumanHandle {
			email: email.to_owned(),
			label: email.split('@').next().unwrap_or(email).to_owned(),
		}),
		Some("test device".to_owned()),
		UserProfile::Standard,
	);
	save_device(&config.devices_dir(), &device, key, config.device_kdf_iterations)
}

/// Session object handed out by [`FakeEngine`].
#[derive(Debug)]
pub struct FakeCore {
	pub id: u64,
	pub device: LocalDevice,
	crash: Notify,
}

impl FakeCore {
	/// Makes the core die on its own, as a lost backend connection would.
	pub fn crash(&self) {
		self.crash.notify_one();
	}
}

#[derive(Debug, Default)]
pub struct FakeEngine {
	next_id: AtomicU64,
	started: AtomicUsize,
	stopped: AtomicUsize,
	fail_next_start: AtomicBool,
	start_delay: Mutex<Option<Duration>>,
}

impl FakeEngine {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every core start sleeps for `delay` first.
	pub fn with_start_delay(self, delay: Duration) -> Self {
		*self.start_delay.lock() = Some(delay);
		self
	}

	pub fn fail_next_start(&self) {
		self.fail_next_start.store(true, Ordering::SeqCst);
	}

	pub fn started(&self) -> usize {
		self.started.load(Ordering::SeqCst)
	}

	pub fn stopped(&self) -> usize {
		self.stopped.load(Ordering::SeqCst)
	}

	pub fn running(&self) -> usize {
		self.started() - self.stopped()
	}
}

impl Engine for FakeEngine {
	type Core = FakeCore;

	async fn start_core(&self, _config: &CoreConfig, device: LocalDevice) -> anyhow::Result<FakeCore> {
		let delay = *self.start_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.fail_next_start.swap(false, Ordering::SeqCst) {
			anyhow::bail!("backend unreachable");
		}
		self.started.fetch_add(1, Ordering::SeqCst);
		Ok(FakeCore {
			id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
			device,
			crash: Notify::new(),
		})
	}

	async fn monitor_core(&self, core: Arc<FakeCore>) -> anyhow::Result<()> {
		core.crash.notified().await;
		anyhow::bail!("core {} lost its backend connection", core.id)
	}

	async fn stop_core(&self, _core: Arc<FakeCore>) {
		self.stopped.fetch_add(1, Ordering::SeqCst);
	}
}

/// Users created by a [`FakeGreeterPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedUser {
	pub human_handle: HumanHandle,
	pub device_label: Option<String>,
	pub profile: UserProfile,
}

#[derive(Debug, Default)]
struct Ledger {
	claimers: AtomicUsize,
	greeters: AtomicUsize,
	closed: AtomicUsize,
	users: Mutex<Vec<CreatedUser>>,
	devices: Mutex<Vec<Option<String>>>,
}

/// Both sides of an invitation, scripted.
#[derive(Debug)]
pub struct FakeInviteEngine {
	greeter_email: String,
	claimer_email: String,
	greeter_sas: SasCode,
	claimer_sas: SasCode,
	requested_device_label: Option<String>,
	fail_next_connect: AtomicBool,
	ledger: Arc<Ledger>,
}

impl Default for FakeInviteEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeInviteEngine {
	pub fn new() -> Self {
		Self {
			greeter_email: "greeter@example.com".to_owned(),
			claimer_email: "claimer@example.com".to_owned(),
			greeter_sas: SasCode::random(),
			claimer_sas: SasCode::random(),
			requested_device_label: Some("claimer laptop".to_owned()),
			fail_next_connect: AtomicBool::new(false),
			ledger: Arc::default(),
		}
	}

	pub fn greeter_email(&self) -> &str {
		&self.greeter_email
	}

	pub fn claimer_email(&self) -> &str {
		&self.claimer_email
	}

	pub fn greeter_sas(&self) -> &SasCode {
		&self.greeter_sas
	}

	pub fn claimer_sas(&self) -> &SasCode {
		&self.claimer_sas
	}

	pub fn fail_next_connect(&self) {
		self.fail_next_connect.store(true, Ordering::SeqCst);
	}

	/// Connections opened so far, claimer and greeter sides together.
	pub fn connected(&self) -> usize {
		self.ledger.claimers.load(Ordering::SeqCst) + self.ledger.greeters.load(Ordering::SeqCst)
	}

	/// Connections dropped so far.
	pub fn closed(&self) -> usize {
		self.ledger.closed.load(Ordering::SeqCst)
	}

	pub fn created_users(&self) -> Vec<CreatedUser> {
		self.ledger.users.lock().clone()
	}

	pub fn created_devices(&self) -> Vec<Option<String>> {
		self.ledger.devices.lock().clone()
	}

	fn check_connect(&self) -> anyhow::Result<()> {
		if self.fail_next_connect.swap(false, Ordering::SeqCst) {
			anyhow::bail!("invitation not found");
		}
		Ok(())
	}
}

impl InviteEngine for FakeInviteEngine {
	type Claimer = FakeClaimerPeer;
	type Greeter = FakeGreeterPeer;

	async fn connect_claimer(&self, _config: &CoreConfig, addr: &InvitationAddr) -> anyhow::Result<FakeClaimerPeer> {
		self.check_connect()?;
		self.ledger.claimers.fetch_add(1, Ordering::SeqCst);
		Ok(FakeClaimerPeer {
			addr: addr.clone(),
			greeter_email: self.greeter_email.clone(),
			claimer_email: self.claimer_email.clone(),
			greeter_sas: self.greeter_sas.clone(),
			claimer_sas: self.claimer_sas.clone(),
			ledger: self.ledger.clone(),
		})
	}

	async fn connect_greeter(&self, _config: &CoreConfig, _device: &LocalDevice, _addr: &InvitationAddr) -> anyhow::Result<FakeGreeterPeer> {
		self.check_connect()?;
		self.ledger.greeters.fetch_add(1, Ordering::SeqCst);
		Ok(FakeGreeterPeer {
			greeter_sas: self.greeter_sas.clone(),
			claimer_sas: self.claimer_sas.clone(),
			requested_device_label: self.requested_device_label.clone(),
			ledger: self.ledger.clone(),
		})
	}
}

#[derive(Debug)]
pub struct FakeClaimerPeer {
	addr: InvitationAddr,
	greeter_email: String,
	claimer_email: String,
	greeter_sas: SasCode,
	claimer_sas: SasCode,
	ledger: Arc<Ledger>,
}

impl ClaimerPeer for FakeClaimerPeer {
	async fn retrieve_info(&self) -> anyhow::Result<ClaimInfo> {
		Ok(ClaimInfo {
			greeter_email: self.greeter_email.clone(),
			kind: self.addr.kind(),
		})
	}

	async fn wait_peer(&self) -> anyhow::Result<SasCode> {
		Ok(self.greeter_sas.clone())
	}

	async fn signify_trust(&self) -> anyhow::Result<SasCode> {
		Ok(self.claimer_sas.clone())
	}

	async fn wait_peer_trust(&self) -> anyhow::Result<()> {
		Ok(())
	}

	async fn claim(&self, requested_device_label: &str) -> anyhow::Result<LocalDevice> {
		let device_id = format!("{}@{requested_device_label}", self.claimer_email);
		Ok(LocalDevice::generate(
			self.addr.organization_id().clone(),
			device_id,
			Some(HumanHandle {
				email: self.claimer_email.clone(),
				label: "Claimer".to_owned(),
			}),
			Some(requested_device_label.to_owned()),
			UserProfile::Standard,
		))
	}
}

impl Drop for FakeClaimerPeer {
	fn drop(&mut self) {
		self.ledger.closed.fetch_add(1, Ordering::SeqCst);
	}
}

#[derive(Debug)]
pub struct FakeGreeterPeer {
	greeter_sas: SasCode,
	claimer_sas: SasCode,
	requested_device_label: Option<String>,
	ledger: Arc<Ledger>,
}

impl GreeterPeer for FakeGreeterPeer {
	async fn wait_peer(&self) -> anyhow::Result<SasCode> {
		Ok(self.greeter_sas.clone())
	}

	async fn wait_peer_trust(&self) -> anyhow::Result<SasCode> {
		Ok(self.claimer_sas.clone())
	}

	async fn signify_trust(&self) -> anyhow::Result<()> {
		Ok(())
	}

	async fn get_claim_requests(&self) -> anyhow::Result<ClaimRequest> {
		Ok(ClaimRequest {
			requested_device_label: self.requested_device_label.clone(),
		})
	}

	async fn create_new_user(&self, human_handle: HumanHandle, device_label: Option<String>, profile: UserProfile) -> anyhow::Result<()> {
		self.ledger.users.lock().push(CreatedUser {
			human_handle,
			device_label,
			profile,
		});
		Ok(())
	}

	async fn create_new_device(&self, device_label: Option<String>) -> anyhow::Result<()> {
		self.ledger.devices.lock().push(device_label);
		Ok(())
	}
}

impl Drop for FakeGreeterPeer {
	fn drop(&mut self) {
		self.ledger.closed.fetch_add(1, Ordering::SeqCst);
	}
}
