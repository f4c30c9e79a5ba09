use tether::crypto::{decrypt_offline_key, encrypt_offline_key};
use tokio::task::spawn_blocking;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::Result;

pub(super) async fn encrypt(secret: String, password: String) -> Result<Zeroizing<String>> {
	let secret = Zeroizing::new(secret);
	let password = Zeroizing::new(password);
	let record = spawn_blocking(move || encrypt_offline_key(&password, &secret)).await??;
	info!(target = "tether.cli", "offline record created");
	Ok(Zeroizing::new(record))
}

pub(super) async fn decrypt(encrypted: String, password: String) -> Result<Zeroizing<String>> {
	let password = Zeroizing::new(password);
	let secret = spawn_blocking(move || decrypt_offline_key(&password, &encrypted)).await??;
	Ok(secret)
}
