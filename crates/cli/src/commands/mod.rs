mod daemon;
mod serve;
mod session;
mod watch;

pub use serve::resolve_config;

use crate::cli::{Cli, Commands, SessionAction};
use crate::error::Result;

/// Name reported in the result envelope for `command`.
pub fn command_name(command: &Commands) -> &'static str {
	match command {
		Commands::Serve(_) => "serve",
		Commands::Session(action) => match action {
			SessionAction::Ensure { .. } => "session ensure",
			SessionAction::Touch { .. } => "session touch",
			SessionAction::Close { .. } => "session close",
			SessionAction::Get { .. } => "session get",
			SessionAction::List => "session list",
			SessionAction::Exec { .. } => "session exec",
		},
		Commands::Status => "status",
		Commands::Stop => "stop",
		Commands::Watch(_) => "watch",
	}
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	let control = cli.control_addr();
	let name = command_name(&cli.command);

	match cli.command {
		Commands::Serve(args) => serve::run(args, cli.control, format).await,
		Commands::Session(action) => session::run(name, action, control, format).await,
		Commands::Status => daemon::status(control, format).await,
		Commands::Stop => daemon::stop(control, format).await,
		Commands::Watch(args) => watch::run(args, format).await,
	}
}
