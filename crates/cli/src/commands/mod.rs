mod crypto;
mod devices;

use crate::cli::{Commands, CryptoAction, DevicesAction};
use crate::context::CommandContext;
use crate::error::Result;

pub use devices::LocalEngine;

pub async fn dispatch(command: Commands, ctx: &CommandContext) -> Result<()> {
	let output = match command {
		Commands::Crypto { action } => match action {
			CryptoAction::Encrypt { secret, password } => crypto::encrypt(secret, password).await?,
			CryptoAction::Decrypt { encrypted, password } => crypto::decrypt(encrypted, password).await?,
		},
		Commands::Devices { action } => match action {
			DevicesAction::List { offline_only } => devices::list(ctx, offline_only).await?,
			DevicesAction::Unlock {
				email,
				organization,
				password,
			} => devices::unlock(ctx, &email, organization.as_ref(), password).await?,
		},
	};
	println!("{}", output.as_str());
	Ok(())
}
