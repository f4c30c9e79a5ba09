//! Collaborators provided by the storage engine.
//!
//! The core never looks inside a running session or an invitation
//! connection; it only needs to create one asynchronously, keep it alive while
//! requests use it, and tear it down.

use std::future::Future;
use std::sync::Arc;

use tether_protocol::InvitationAddr;

use crate::config::CoreConfig;
use crate::device::LocalDevice;
use crate::enrollment::claim::ClaimerPeer;
use crate::enrollment::greet::GreeterPeer;

/// Starts and stops the per-user session object ("core").
pub trait Engine: Send + Sync + 'static {
	type Core: Send + Sync + 'static;

	/// Connects a device and returns its running core.
	fn start_core(&self, config: &CoreConfig, device: LocalDevice) -> impl Future<Output = anyhow::Result<Self::Core>> + Send;

	/// Resolves if the core dies on its own. The default never resolves.
	fn monitor_core(&self, core: Arc<Self::Core>) -> impl Future<Output = anyhow::Result<()>> + Send {
		drop(core);
		std::future::pending()
	}

	/// Releases everything the core holds.
	fn stop_core(&self, core: Arc<Self::Core>) -> impl Future<Output = ()> + Send;
}

/// Opens the backend connections used by enrollment handshakes.
pub trait InviteEngine: Send + Sync + 'static {
	type Claimer: ClaimerPeer;
	type Greeter: GreeterPeer;

	/// Anonymous connection for the party joining through `addr`.
	fn connect_claimer(&self, config: &CoreConfig, addr: &InvitationAddr) -> impl Future<Output = anyhow::Result<Self::Claimer>> + Send;

	/// Authenticated connection for `device`, greeting whoever joins through `addr`.
	fn connect_greeter(
		&self,
		config: &CoreConfig,
		device: &LocalDevice,
		addr: &InvitationAddr,
	) -> impl Future<Output = anyhow::Result<Self::Greeter>> + Send;
}
