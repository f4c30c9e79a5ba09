//! Greeter side of an enrollment: a member letting someone in.

use std::future::Future;
use std::sync::Arc;

use tether_protocol::{HumanHandle, InvitationAddr, InvitationKind, SAS_CANDIDATES, SasCode, UserProfile, sas_candidates};
use tracing::info;

use super::{Handshake, Step, StepSlot};
use crate::config::CoreConfig;
use crate::device::LocalDevice;
use crate::engine::InviteEngine;
use crate::error::{Error, Result};

/// Label given to a human handle whose name the claimer did not provide.
pub const UNKNOWN_LABEL: &str = "-unknown-";

/// What the claimer asked for in the final exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimRequest {
	pub requested_device_label: Option<String>,
}

/// Backend connection of a greeter.
pub trait GreeterPeer: Send + Sync + 'static {
	/// Waits for the claimer and returns the greeter's SAS code.
	fn wait_peer(&self) -> impl Future<Output = anyhow::Result<SasCode>> + Send;

	/// Waits for the claimer to confirm; returns the claimer's SAS code.
	fn wait_peer_trust(&self) -> impl Future<Output = anyhow::Result<SasCode>> + Send;

	fn signify_trust(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

	fn get_claim_requests(&self) -> impl Future<Output = anyhow::Result<ClaimRequest>> + Send;

	fn create_new_user(
		&self,
		human_handle: HumanHandle,
		device_label: Option<String>,
		profile: UserProfile,
	) -> impl Future<Output = anyhow::Result<()>> + Send;

	fn create_new_device(&self, device_label: Option<String>) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetStep {
	PeerReady { kind: InvitationKind, greeter_sas: SasCode },
	AwaitingClaimerSas { kind: InvitationKind, claimer_sas: SasCode },
	TrustSignified { kind: InvitationKind },
}

impl Step for GreetStep {
	fn name(&self) -> &'static str {
		match self {
			Self::PeerReady { .. } => "peer_ready",
			Self::AwaitingClaimerSas { .. } => "awaiting_claimer_sas",
			Self::TrustSignified { .. } => "trust_signified",
		}
	}
}

/// What the greeter grants when finalizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetGrant {
	User { claimer_email: String, profile: UserProfile },
	Device,
}

/// Connects as greeter for `addr` and waits for the claimer to show up.
pub struct GreetHandshake<E> {
	engine: Arc<E>,
	config: CoreConfig,
	device: LocalDevice,
	addr: InvitationAddr,
}

impl<E: InviteEngine> GreetHandshake<E> {
	pub fn new(engine: Arc<E>, config: CoreConfig, device: LocalDevice, addr: InvitationAddr) -> Self {
		Self {
			engine,
			config,
			device,
			addr,
		}
	}
}

impl<E: InviteEngine> Handshake for GreetHandshake<E> {
	type Peer = E::Greeter;
	type Step = GreetStep;

	async fn start(self) -> anyhow::Result<(E::Greeter, GreetStep)> {
		let peer = self.engine.connect_greeter(&self.config, &self.device, &self.addr).await?;
		let greeter_sas = peer.wait_peer().await?;
		Ok((
			peer,
			GreetStep::PeerReady {
				kind: self.addr.kind(),
				greeter_sas,
			},
		))
	}
}

impl<P: GreeterPeer> StepSlot<P, GreetStep> {
	/// Invitation kind and the greeter's code, available right after start.
	pub fn greeter_sas(&self) -> Result<(InvitationKind, SasCode)> {
		match self.current() {
			Some(GreetStep::PeerReady { kind, greeter_sas }) => Ok((*kind, greeter_sas.clone())),
			_ => Err(self.invalid_state("peer_ready")),
		}
	}

	/// Waits for the claimer's confirmation and returns the SAS choices to show.
	pub async fn wait_peer_trust(&mut self) -> Result<Vec<SasCode>> {
		let Some(GreetStep::PeerReady { kind, .. }) = self.current() else {
			return Err(self.invalid_state("peer_ready"));
		};
		let kind = *kind;
		let claimer_sas = self.peer().wait_peer_trust().await.map_err(Error::Peer)?;
		let candidates = sas_candidates(&claimer_sas, SAS_CANDIDATES);
		self.update(GreetStep::AwaitingClaimerSas { kind, claimer_sas });
		Ok(candidates)
	}

	/// Checks the code picked by the user. A wrong pick leaves the step unchanged.
	pub async fn check_trust(&mut self, claimer_sas: &SasCode) -> Result<()> {
		let Some(GreetStep::AwaitingClaimerSas { kind, claimer_sas: expected }) = self.current() else {
			return Err(self.invalid_state("awaiting_claimer_sas"));
		};
		if expected != claimer_sas {
			return Err(Error::BadSas);
		}
		let kind = *kind;
		self.peer().signify_trust().await.map_err(Error::Peer)?;
		self.update(GreetStep::TrustSignified { kind });
		Ok(())
	}

	/// Creates the user or device the claimer asked for and ends the handshake.
	pub async fn finalize(&mut self, grant: GreetGrant) -> Result<()> {
		let Some(GreetStep::TrustSignified { kind }) = self.current() else {
			return Err(self.invalid_state("trust_signified"));
		};
		let expected = match kind {
			InvitationKind::User => "user grant",
			InvitationKind::Device => "device grant",
		};
		let found = match grant {
			GreetGrant::User { .. } => "user grant",
			GreetGrant::Device => "device grant",
		};
		if expected != found {
			return Err(Error::InvalidState { expected, found });
		}

		let request = self.peer().get_claim_requests().await.map_err(Error::Peer)?;
		match grant {
			GreetGrant::User { claimer_email, profile } => {
				let human_handle = HumanHandle {
					email: claimer_email,
					label: UNKNOWN_LABEL.to_owned(),
				};
				self.peer()
					.create_new_user(human_handle, request.requested_device_label, profile)
					.await
					.map_err(Error::Peer)?;
				info!(target = "tether.enrollment", ?profile, "greeted new user");
			}
			GreetGrant::Device => {
				self.peer().create_new_device(request.requested_device_label).await.map_err(Error::Peer)?;
				info!(target = "tether.enrollment", "greeted new device");
			}
		}
		self.mark_as_terminated();
		Ok(())
	}
}
