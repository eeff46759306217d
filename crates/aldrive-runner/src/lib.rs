pub mod actions;
pub mod cli;
pub mod commands;
pub mod cycle;
pub mod driver;
pub mod error;
pub mod events;
pub mod notify;
pub mod template;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

pub use driver::{DriverLoop, RunSummary};

pub fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::load_config(&cli.config)?;
    match cli.command {
        Commands::Run(args) => commands::run::handle_run(args, config),
        Commands::Status(args) => commands::status::handle_status(args, &config),
    }
}
