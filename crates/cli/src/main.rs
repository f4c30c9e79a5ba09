use clap::Parser;
use tether_cli::cli::Cli;
use tether_cli::context::CommandContext;
use tether_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let outcome = match CommandContext::load(cli.config_dir) {
		Ok(ctx) => commands::dispatch(cli.command, &ctx).await,
		Err(err) => Err(err),
	};
	if let Err(err) = outcome {
		error!(target = "tether.cli", error = %err, "command failed");
		std::process::exit(1);
	}
}
