use aldrive_core::config::Config;
use aldrive_core::ledger::LedgerReplay;
use aldrive_core::model::CycleVariant;
use aldrive_core::Ledger;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use serde::Serialize;

use crate::cli::StatusArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StageStatus {
    pub key: &'static str,
    pub label: &'static str,
    pub complete: bool,
}

#[derive(Debug, Serialize)]
pub struct DamagedStatus {
    pub line: usize,
    pub content: String,
    /// Part of the unterminated or unparseable tail the next `run` truncates.
    pub tail: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerStatus {
    pub ledger: String,
    pub exists: bool,
    pub last_cycle: Option<u32>,
    pub variant: Option<CycleVariant>,
    pub finished: bool,
    pub stages: Vec<StageStatus>,
    pub damaged: Vec<DamagedStatus>,
}

pub fn collect_status(config: &Config) -> Result<LedgerStatus, CliError> {
    let path = config.ledger_path();
    let replayed: Option<LedgerReplay> = Ledger::inspect(path)?;
    let mut status = LedgerStatus {
        ledger: path.display().to_string(),
        exists: replayed.is_some(),
        last_cycle: None,
        variant: None,
        finished: false,
        stages: Vec::new(),
        damaged: Vec::new(),
    };
    let Some(replayed) = replayed else {
        return Ok(status);
    };

    if let Some(cycle) = replayed.state.last_cycle() {
        let variant = cycle.variant();
        status.last_cycle = Some(cycle.0);
        status.variant = Some(variant);
        status.finished = replayed.state.last_cycle_finished();
        status.stages = variant
            .stages()
            .iter()
            .map(|s| StageStatus {
                key: s.key(),
                label: s.label(),
                complete: replayed.state.is_complete(*s),
            })
            .collect();
    }
    status.damaged = replayed
        .damaged
        .iter()
        .map(|d| DamagedStatus {
            line: d.line_number,
            content: d.content.clone(),
            tail: d.offset >= replayed.valid_len,
        })
        .collect();
    Ok(status)
}

pub fn render_table(status: &LedgerStatus) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Stage").add_attribute(Attribute::Bold).fg(Color::Cyan),
            Cell::new("Ledger label").add_attribute(Attribute::Bold).fg(Color::Cyan),
            Cell::new("State").add_attribute(Attribute::Bold).fg(Color::Cyan),
        ]);
    for stage in &status.stages {
        let state = if stage.complete {
            Cell::new("COMPLETE").fg(Color::Green)
        } else {
            Cell::new("pending").fg(Color::Yellow)
        };
        table.add_row(vec![Cell::new(stage.key), Cell::new(stage.label), state]);
    }
    table.to_string()
}

pub fn handle_status(args: StatusArgs, config: &Config) -> Result<(), CliError> {
    let status = collect_status(config)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Ledger: {}", status.ledger.cyan());
    if !status.exists {
        println!("No ledger yet; nothing has been run in this working directory.");
        return Ok(());
    }
    match (status.last_cycle, status.variant) {
        (Some(cycle), Some(variant)) => {
            let state = if status.finished {
                "finished".green()
            } else {
                "in progress".yellow()
            };
            println!(
                "Last cycle: {} ({} variant, {})",
                format!("ALC-{}", cycle).bold(),
                variant,
                state
            );
            println!("{}", render_table(&status));
        }
        _ => println!("The ledger records no cycle yet."),
    }

    if !status.damaged.is_empty() {
        println!("{}", "Unrecognized ledger lines:".yellow().bold());
        for d in &status.damaged {
            let note = if d.tail {
                "truncated on the next run"
            } else {
                "ignored"
            };
            println!("  line {}: {:?} ({})", d.line, d.content, note);
        }
    }
    Ok(())
}
