use aldrive_core::config::Config;
use aldrive_core::model::CycleIndex;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "aldrive",
    author,
    version,
    about = "Checkpointed driver for active-learning cycles on HPC clusters.",
    long_about = "Runs the stages of each requested ALC cycle in order, submitting batch jobs to the configured scheduler and recording every completed stage in a restart ledger so an interrupted run resumes where it stopped."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        default_value_os_t = Config::default_path(),
        help = "Path to the driver configuration"
    )]
    pub config: PathBuf,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity level (-v for debug, -vv for trace)"
    )]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run (or resume) the given cycles in order")]
    Run(RunArgs),
    #[command(about = "Show what the restart ledger records, without modifying it")]
    Status(StatusArgs),
}

impl Commands {
    /// Names the session log, e.g. `run-ALC-0-1`.
    pub fn session_label(&self) -> String {
        match self {
            Commands::Run(args) => {
                let cycles: Vec<String> = args.cycles.iter().map(|c| c.to_string()).collect();
                format!("run-ALC-{}", cycles.join("-"))
            }
            Commands::Status(_) => "status".to_string(),
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(
        required = true,
        value_name = "CYCLE",
        help = "Ascending, gapless list of cycle indices, e.g. `0 1 2`"
    )]
    pub cycles: Vec<CycleIndex>,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(long, help = "Print the ledger state as JSON")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_label_lists_the_cycles() {
        let cli = Cli::parse_from(["aldrive", "run", "3", "4"]);
        assert_eq!(cli.command.session_label(), "run-ALC-3-4");
        let cli = Cli::parse_from(["aldrive", "-v", "status", "--json"]);
        assert_eq!(cli.command.session_label(), "status");
        assert_eq!(cli.verbose, 1);
    }
}
