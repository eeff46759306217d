use aldrive_client::WaitEvent;
use aldrive_core::config::Config;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::cli::RunArgs;
use crate::driver::DriverLoop;
use crate::error::CliError;
use crate::events::{DriverEvent, EventSink};

/// A hidden bar (stdout is not a terminal) drops `println`, so fall back.
fn say(pb: &Option<ProgressBar>, line: String) {
    match pb {
        Some(pb) if !pb.is_hidden() => pb.println(line),
        _ => println!("{}", line),
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn handle_run(args: RunArgs, config: Config) -> Result<(), CliError> {
    let list = args
        .cycles
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "- Running ALC cycle(s) {} with the '{}' scheduler...",
        list.cyan(),
        config.scheduler.kind.to_string().cyan()
    );

    let (tx, rx) = mpsc::channel();
    let cycles = args.cycles;
    let driver_thread = thread::spawn(move || {
        DriverLoop::new(config)
            .with_events(EventSink::new(tx))
            .run(&cycles)
    });

    let mut pb: Option<ProgressBar> = None;
    for event in rx {
        match event {
            DriverEvent::CycleSkipped { cycle, last } => {
                say(
                    &pb,
                    format!(
                        "- ALC-{} already complete (ledger at ALC-{}), skipping.",
                        cycle, last
                    )
                    .dimmed()
                    .to_string(),
                );
            }
            DriverEvent::CycleStarted {
                cycle,
                variant,
                resumed,
                completed,
                total,
            } => {
                let verb = if resumed { "Resuming" } else { "Starting" };
                say(
                    &pb,
                    format!(
                        "- {} {} ({} stages, {}/{} complete)",
                        verb,
                        format!("ALC-{}", cycle).bold(),
                        variant,
                        completed,
                        total
                    ),
                );
            }
            DriverEvent::StageSkipped { stage, .. } => {
                tracing::debug!("stage {} already complete", stage);
            }
            DriverEvent::StageStarted { stage, .. } => {
                say(&pb, format!("  {} {}", ">>".cyan(), stage.label()));
            }
            DriverEvent::CommandStarted { command, .. } => {
                tracing::debug!("running: {}", command);
            }
            DriverEvent::JobSubmitted { name, handle, .. } => {
                say(
                    &pb,
                    format!("     Submitted {} as {}", name, handle.to_string().yellow()),
                );
            }
            DriverEvent::ResubmitRound {
                round, outstanding, ..
            } => {
                say(
                    &pb,
                    format!(
                        "     Round {}: {} outstanding unit(s)",
                        round,
                        outstanding.to_string().bold()
                    ),
                );
            }
            DriverEvent::Waiting(WaitEvent::StillWaiting {
                pending,
                total,
                next_poll,
            }) => {
                let bar = pb.get_or_insert_with(spinner);
                bar.set_message(format!(
                    "{}/{} job(s) outstanding, next poll in {}s",
                    pending,
                    total,
                    next_poll.as_secs()
                ));
            }
            DriverEvent::Waiting(WaitEvent::JobFinished { handle, outcome }) => {
                let tag = if outcome.is_success() {
                    "OK".green().bold()
                } else {
                    "FAIL".red().bold()
                };
                say(
                    &pb,
                    format!("     {} {} {}", tag, handle.to_string().dimmed(), outcome),
                );
            }
            DriverEvent::Waiting(WaitEvent::TransientError {
                handle,
                consecutive,
                detail,
            }) => {
                say(
                    &pb,
                    format!(
                        "     {} poll of {} failed ({} in a row): {}",
                        "WARN".yellow().bold(),
                        handle,
                        consecutive,
                        detail
                    ),
                );
            }
            DriverEvent::StageCompleted { stage, .. } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!("  {} {}", "OK".green().bold(), stage.label());
            }
            DriverEvent::StageFailed { stage, .. } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!("  {} {}", "FAIL".red().bold(), stage.label());
            }
            DriverEvent::CycleCompleted { cycle } => {
                println!("- {} complete.", format!("ALC-{}", cycle).bold());
            }
        }
    }

    let summary = driver_thread
        .join()
        .map_err(|_| CliError::DriverPanicked)??;

    println!(
        "{} {} cycle(s) completed, {} skipped, {} stage(s) executed.",
        "Done:".green().bold(),
        summary.completed.len(),
        summary.skipped.len(),
        summary.stages_executed
    );
    Ok(())
}
