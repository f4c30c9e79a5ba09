use std::sync::Arc;

use tether::runtime::ComponentRegistry;
use tether::{CoreConfig, Credentials, Engine, LocalDevice, SessionManager};
use tether_protocol::OrganizationId;
use tracing::info;
use zeroize::Zeroizing;

use crate::context::CommandContext;
use crate::error::Result;

/// Engine whose "core" is the unlocked device itself; nothing is contacted.
#[derive(Debug, Default)]
pub struct LocalEngine;

impl Engine for LocalEngine {
	type Core = LocalDevice;

	async fn start_core(&self, _config: &CoreConfig, device: LocalDevice) -> anyhow::Result<LocalDevice> {
		Ok(device)
	}

	async fn stop_core(&self, _core: Arc<LocalDevice>) {}
}

fn sessions(ctx: &CommandContext) -> SessionManager<LocalEngine> {
	SessionManager::new(ctx.config.clone(), Arc::new(LocalEngine), Arc::new(ComponentRegistry::new()))
}

pub(super) async fn list(ctx: &CommandContext, offline_only: bool) -> Result<Zeroizing<String>> {
	let devices = sessions(ctx).list_available_devices(offline_only).await?;
	Ok(Zeroizing::new(serde_json::to_string_pretty(&devices)?))
}

pub(super) async fn unlock(ctx: &CommandContext, email: &str, organization: Option<&OrganizationId>, password: String) -> Result<Zeroizing<String>> {
	let sessions = sessions(ctx);
	let token = sessions.login(email, Credentials::user_password(password), organization).await?;
	let device_id = sessions
		.with_session(&token, |device| async move { Ok(device.device_id.clone()) })
		.await?;
	sessions.logout(&token).await?;
	sessions.registry().shutdown().await;

	info!(target = "tether.cli", device = %device_id, "device unlocked offline");
	Ok(Zeroizing::new(device_id))
}
