use aldrive_core::config::Config;
use aldrive_core::logging::{self, LogSettings};
use aldrive_runner::cli::{Cli, Commands};
use clap::Parser;
use colored::Colorize;

fn main() {
    let cli = Cli::parse();

    let settings = LogSettings::from_env(cli.verbose);

    // Errors resurface with context once the command itself loads the file.
    let config = Config::load(&cli.config).ok();
    let limits = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    match logging::init_session_logger(&settings, &cli.command.session_label(), &limits) {
        Ok(path) => tracing::debug!("Session log: {}", path.display()),
        Err(e) => {
            eprintln!(
                "{}",
                format!("[WARN] Failed to initialize session logger: {}", e).yellow()
            );
            logging::init_stderr_logger(&settings);
        }
    }

    if let (Commands::Run(_), Some(config)) = (&cli.command, &config) {
        let ledger = config.ledger_path().to_path_buf();
        let _ = ctrlc::set_handler(move || {
            eprintln!(
                "\n{}",
                format!(
                    "Interrupted. Completed stages are recorded in {}; rerun the same command to resume.",
                    ledger.display()
                )
                .yellow()
            );
            std::process::exit(130);
        });
    }

    if let Err(e) = aldrive_runner::run(cli) {
        tracing::error!("{}", e);
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(1);
    }
}
