use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tether_protocol::OrganizationId;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether - device keys, offline unlock and credential records")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration directory (defaults to the platform config dir)
	#[arg(long, global = true, value_name = "DIR")]
	pub config_dir: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Offline credential records
	Crypto {
		#[command(subcommand)]
		action: CryptoAction,
	},

	/// Device key files
	#[command(alias = "dev")]
	Devices {
		#[command(subcommand)]
		action: DevicesAction,
	},
}

#[derive(Subcommand, Debug)]
pub enum CryptoAction {
	/// Seal a device secret under a password and print the record
	Encrypt {
		#[arg(long)]
		secret: String,
		#[arg(long)]
		password: String,
	},

	/// Open a record with its password and print the device secret
	Decrypt {
		#[arg(long)]
		encrypted: String,
		#[arg(long)]
		password: String,
	},
}

#[derive(Subcommand, Debug)]
pub enum DevicesAction {
	/// List devices as JSON
	#[command(alias = "ls")]
	List {
		/// Only devices that can be unlocked offline
		#[arg(long)]
		offline_only: bool,
	},

	/// Unlock a device with its offline record and print its id
	Unlock {
		#[arg(long)]
		email: String,
		#[arg(long, value_name = "ORG")]
		organization: Option<OrganizationId>,
		#[arg(long)]
		password: String,
	},
}
