//! Claimer side of an enrollment: the party joining an organization.

use std::future::Future;
use std::sync::Arc;

use tether_protocol::{InvitationAddr, InvitationKind, SAS_CANDIDATES, SasCode, sas_candidates};
use tracing::info;

use super::{Handshake, Step, StepSlot};
use crate::config::CoreConfig;
use crate::device::{AvailableDevice, LocalDevice, save_device};
use crate::engine::InviteEngine;
use crate::error::{Error, Result};

/// Invitation details returned by the backend before the handshake begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInfo {
	pub greeter_email: String,
	pub kind: InvitationKind,
}

/// Backend connection of a claimer. Each call is one exchange with the greeter.
pub trait ClaimerPeer: Send + Sync + 'static {
	fn retrieve_info(&self) -> impl Future<Output = anyhow::Result<ClaimInfo>> + Send;

	/// Waits for the greeter and returns the greeter's SAS code.
	fn wait_peer(&self) -> impl Future<Output = anyhow::Result<SasCode>> + Send;

	/// Tells the greeter its code was confirmed; returns the claimer's SAS code.
	fn signify_trust(&self) -> impl Future<Output = anyhow::Result<SasCode>> + Send;

	fn wait_peer_trust(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

	/// Exchanges the final requests and returns the newly created device.
	fn claim(&self, requested_device_label: &str) -> impl Future<Output = anyhow::Result<LocalDevice>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStep {
	Initial { greeter_email: String, kind: InvitationKind },
	PeerReady { greeter_sas: SasCode },
	TrustSignified { claimer_sas: SasCode },
	PeerTrusted,
}

impl Step for ClaimStep {
	fn name(&self) -> &'static str {
		match self {
			Self::Initial { .. } => "initial",
			Self::PeerReady { .. } => "peer_ready",
			Self::TrustSignified { .. } => "trust_signified",
			Self::PeerTrusted => "peer_trusted",
		}
	}
}

/// Connects as claimer for `addr` and fetches the invitation details.
pub struct ClaimHandshake<E> {
	engine: Arc<E>,
	config: CoreConfig,
	addr: InvitationAddr,
}

impl<E: InviteEngine> ClaimHandshake<E> {
	pub fn new(engine: Arc<E>, config: CoreConfig, addr: InvitationAddr) -> Self {
		Self { engine, config, addr }
	}
}

impl<E: InviteEngine> Handshake for ClaimHandshake<E> {
	type Peer = E::Claimer;
	type Step = ClaimStep;

	async fn start(self) -> anyhow::Result<(E::Claimer, ClaimStep)> {
		let peer = self.engine.connect_claimer(&self.config, &self.addr).await?;
		let ClaimInfo { greeter_email, kind } = peer.retrieve_info().await?;
		Ok((peer, ClaimStep::Initial { greeter_email, kind }))
	}
}

impl<P: ClaimerPeer> StepSlot<P, ClaimStep> {
	/// Invitation details; only available before the handshake begins.
	pub fn info(&self) -> Result<ClaimInfo> {
		match self.current() {
			Some(ClaimStep::Initial { greeter_email, kind }) => Ok(ClaimInfo {
				greeter_email: greeter_email.clone(),
				kind: *kind,
			}),
			_ => Err(self.invalid_state("initial")),
		}
	}

	/// Waits for the greeter and returns the SAS choices to show the user.
	pub async fn wait_peer(&mut self) -> Result<Vec<SasCode>> {
		if !matches!(self.current(), Some(ClaimStep::Initial { .. })) {
			return Err(self.invalid_state("initial"));
		}
		let greeter_sas = self.peer().wait_peer().await.map_err(Error::Peer)?;
		let candidates = sas_candidates(&greeter_sas, SAS_CANDIDATES);
		self.update(ClaimStep::PeerReady { greeter_sas });
		Ok(candidates)
	}

	/// Checks the code picked by the user and returns the claimer's own code.
	///
	/// A wrong pick fails with [`Error::BadSas`] and leaves the step unchanged.
	pub async fn check_trust(&mut self, greeter_sas: &SasCode) -> Result<SasCode> {
		let Some(ClaimStep::PeerReady { greeter_sas: expected }) = self.current() else {
			return Err(self.invalid_state("peer_ready"));
		};
		if expected != greeter_sas {
			return Err(Error::BadSas);
		}
		let claimer_sas = self.peer().signify_trust().await.map_err(Error::Peer)?;
		self.update(ClaimStep::TrustSignified {
			claimer_sas: claimer_sas.clone(),
		});
		Ok(claimer_sas)
	}

	pub async fn wait_peer_trust(&mut self) -> Result<()> {
		if !matches!(self.current(), Some(ClaimStep::TrustSignified { .. })) {
			return Err(self.invalid_state("trust_signified"));
		}
		self.peer().wait_peer_trust().await.map_err(Error::Peer)?;
		self.update(ClaimStep::PeerTrusted);
		Ok(())
	}

	/// Claims the new device, saves it sealed under `key` and ends the handshake.
	pub async fn finalize(&mut self, config: &CoreConfig, device_label: &str, key: &str) -> Result<AvailableDevice> {
		if !matches!(self.current(), Some(ClaimStep::PeerTrusted)) {
			return Err(self.invalid_state("peer_trusted"));
		}
		let device = self.peer().claim(device_label).await.map_err(Error::Peer)?;

		let devices_dir = config.devices_dir();
		let iterations = config.device_kdf_iterations;
		let key = key.to_owned();
		let available = tokio::task::spawn_blocking(move || save_device(&devices_dir, &device, &key, iterations)).await??;

		info!(target = "tether.enrollment", device = %available.device_id, "claimed new device");
		self.mark_as_terminated();
		Ok(available)
	}
}
