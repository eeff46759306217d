use crate::error::StageError;
use crate::events::{DriverEvent, EventSink};
use crate::template::TemplateVars;
use aldrive_client::resources::{resolve_for_stage, BatchDirectives};
use aldrive_client::runner::shell_quote;
use aldrive_client::{Clock, JobSpec, JobWaitCoordinator, PollPolicy, SchedulerGateway, WaitReport};
use aldrive_core::config::{Config, StageSettings};
use aldrive_core::constants::{dirs, files};
use aldrive_core::errors::ConfigError;
use aldrive_core::model::{CycleIndex, CycleVariant, JobHandle, Stage, StageKind};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;

/// What `perform` left behind: jobs for the state machine to wait on, or
/// nothing because the work already finished synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Submitted(Vec<JobHandle>),
    Done,
}

pub struct StageContext<'a> {
    pub config: &'a Config,
    pub cycle: CycleIndex,
    pub stage: Stage,
    pub cycle_dir: PathBuf,
    pub vars: TemplateVars,
    pub gateway: &'a dyn SchedulerGateway,
    pub clock: &'a dyn Clock,
    pub events: &'a EventSink,
}

fn job_suffix(case: Option<u32>, unit: Option<(u32, usize)>) -> String {
    let mut suffix = String::new();
    if let Some(c) = case {
        let _ = write!(suffix, "-c{}", c);
    }
    if let Some((round, i)) = unit {
        let _ = write!(suffix, "-r{}-u{}", round, i);
    }
    suffix
}

impl<'a> StageContext<'a> {
    pub fn new(
        config: &'a Config,
        cycle: CycleIndex,
        stage: Stage,
        gateway: &'a dyn SchedulerGateway,
        clock: &'a dyn Clock,
        events: &'a EventSink,
    ) -> Self {
        Self {
            config,
            cycle,
            stage,
            cycle_dir: config.cycle_dir(cycle),
            vars: TemplateVars::for_stage(config, cycle, stage),
            gateway,
            clock,
            events,
        }
    }

    pub fn cases(&self, per_case: bool) -> Vec<Option<u32>> {
        if per_case {
            (0..self.config.cases).map(Some).collect()
        } else {
            vec![None]
        }
    }

    fn vars_for(&self, case: Option<u32>) -> TemplateVars {
        match case {
            Some(c) => self.vars.with_case(c),
            None => self.vars.clone(),
        }
    }

    /// Runs `template` with `sh -c` in the cycle directory and returns its
    /// stdout.
    pub fn run_inline(&self, template: &str, vars: &TemplateVars) -> Result<String, StageError> {
        let command = vars.render(template);
        self.events.emit(DriverEvent::CommandStarted {
            stage: self.stage,
            command: command.clone(),
        });

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&self.cycle_dir)
            .envs(vars.env());
        aldrive_core::logging::log_command(&cmd);

        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stdout.trim().is_empty() {
            tracing::debug!("[{}] stdout:\n{}", self.stage, stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            tracing::debug!("[{}] stderr:\n{}", self.stage, stderr.trim_end());
        }

        if !output.status.success() {
            return Err(StageError::Action {
                command,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    pub fn write_job_script(
        &self,
        base: &str,
        body: &str,
        vars: &TemplateVars,
    ) -> Result<PathBuf, StageError> {
        let jobs_dir = self.cycle_dir.join(dirs::JOBS);
        fs_err::create_dir_all(&jobs_dir)?;
        let script = jobs_dir.join(format!("{}.{}", base, files::JOB_SCRIPT_EXT));

        let mut content = String::from("#!/bin/sh\n");
        let _ = writeln!(content, "# ALC-{} {} ({})", self.cycle, self.stage.label(), base);
        for (key, value) in vars.env() {
            let _ = writeln!(content, "export {}={}", key, shell_quote(&value));
        }
        let _ = writeln!(
            content,
            "cd {} || exit 1",
            shell_quote(&self.cycle_dir.to_string_lossy())
        );
        content.push_str(&vars.render(body));
        content.push('\n');

        fs_err::write(&script, content)?;
        Ok(script)
    }

    pub fn submit(
        &self,
        job: &str,
        vars: &TemplateVars,
        directives: &BatchDirectives,
        case: Option<u32>,
        unit: Option<(u32, usize)>,
    ) -> Result<JobHandle, StageError> {
        let base = format!("{}{}", self.stage.key(), job_suffix(case, unit));
        let script = self.write_job_script(&base, job, vars)?;
        let spec = JobSpec {
            name: format!("ALC-{}-{}", self.cycle, base),
            output: script.with_extension(files::JOB_OUTPUT_EXT),
            script,
            workdir: self.cycle_dir.clone(),
            directives: directives.clone(),
        };

        let handle = self.gateway.submit(&spec)?;
        self.events.emit(DriverEvent::JobSubmitted {
            stage: self.stage,
            name: spec.name.clone(),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    pub fn wait_all(&self, handles: &[JobHandle]) -> WaitReport {
        let policy = PollPolicy::from_config(&self.config.scheduler);
        JobWaitCoordinator::new(self.gateway, self.clock, policy)
            .wait_all_with(handles, |e| self.events.emit(DriverEvent::Waiting(e.clone())))
    }
}

pub trait StageAction: Send + Sync {
    fn perform(&self, ctx: &StageContext<'_>) -> Result<StageResult, StageError>;

    /// Runs once every submitted job has been accounted for.
    fn finish(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
        Ok(())
    }

    fn tolerates_partial_failure(&self) -> bool {
        false
    }
}

pub struct InlineAction {
    pub run: String,
    pub per_case: bool,
}

impl StageAction for InlineAction {
    fn perform(&self, ctx: &StageContext<'_>) -> Result<StageResult, StageError> {
        for case in ctx.cases(self.per_case) {
            ctx.run_inline(&self.run, &ctx.vars_for(case))?;
        }
        Ok(StageResult::Done)
    }
}

pub struct BatchAction {
    pub before: Option<String>,
    pub job: String,
    pub after: Option<String>,
    pub per_case: bool,
    pub tolerate_failures: bool,
    pub directives: BatchDirectives,
}

impl StageAction for BatchAction {
    fn perform(&self, ctx: &StageContext<'_>) -> Result<StageResult, StageError> {
        if let Some(before) = &self.before {
            ctx.run_inline(before, &ctx.vars)?;
        }
        let mut handles = Vec::new();
        for case in ctx.cases(self.per_case) {
            handles.push(ctx.submit(&self.job, &ctx.vars_for(case), &self.directives, case, None)?);
        }
        Ok(StageResult::Submitted(handles))
    }

    fn finish(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        if let Some(after) = &self.after {
            ctx.run_inline(after, &ctx.vars)?;
        }
        Ok(())
    }

    fn tolerates_partial_failure(&self) -> bool {
        self.tolerate_failures
    }
}

/// Polls `check` for outstanding units and resubmits `job` for each one
/// until nothing is left or `max_rounds` submission rounds have run.
pub struct ResubmitAction {
    pub check: String,
    pub job: String,
    pub per_case: bool,
    pub max_rounds: u32,
    pub directives: BatchDirectives,
}

impl ResubmitAction {
    fn outstanding(
        &self,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<(Option<u32>, String)>, StageError> {
        let mut units = Vec::new();
        for case in ctx.cases(self.per_case) {
            let listing = ctx.run_inline(&self.check, &ctx.vars_for(case))?;
            units.extend(
                listing
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| (case, l.to_string())),
            );
        }
        Ok(units)
    }
}

impl StageAction for ResubmitAction {
    fn perform(&self, ctx: &StageContext<'_>) -> Result<StageResult, StageError> {
        let mut round = 1;
        loop {
            let units = self.outstanding(ctx)?;
            if units.is_empty() {
                tracing::info!("[{}] no outstanding units after {} round(s)", ctx.stage, round - 1);
                return Ok(StageResult::Done);
            }
            if round > self.max_rounds {
                return Err(StageError::Incomplete {
                    rounds: self.max_rounds,
                    outstanding: units.len(),
                });
            }

            tracing::info!(
                "[{}] round {}: resubmitting {} outstanding unit(s)",
                ctx.stage,
                round,
                units.len()
            );
            ctx.events.emit(DriverEvent::ResubmitRound {
                stage: ctx.stage,
                round,
                outstanding: units.len(),
            });

            let mut handles = Vec::new();
            for (i, (case, unit)) in units.iter().enumerate() {
                let vars = ctx.vars_for(*case).with_unit(round, unit);
                handles.push(ctx.submit(
                    &self.job,
                    &vars,
                    &self.directives,
                    *case,
                    Some((round, i + 1)),
                )?);
            }

            // Failed units show up again in the next check.
            let report = ctx.wait_all(&handles);
            for (handle, outcome) in report.failures() {
                tracing::warn!("[{}] round {} job {} {}", ctx.stage, round, handle, outcome);
            }
            round += 1;
        }
    }
}

fn required(
    settings: &StageSettings,
    option: &'static str,
    value: &Option<String>,
) -> Result<String, ConfigError> {
    value.clone().ok_or(ConfigError::MissingStageOption {
        stage: settings.stage.key(),
        kind: settings.kind(),
        option,
    })
}

pub fn build_action(settings: &StageSettings) -> Result<Box<dyn StageAction>, ConfigError> {
    let raw = &settings.raw;
    let action: Box<dyn StageAction> = match settings.kind() {
        StageKind::Inline => Box::new(InlineAction {
            run: required(settings, "run", &raw.run)?,
            per_case: settings.per_case,
        }),
        StageKind::Batch => Box::new(BatchAction {
            before: raw.before.clone(),
            job: required(settings, "job", &raw.job)?,
            after: raw.after.clone(),
            per_case: settings.per_case,
            tolerate_failures: settings.tolerate_failures,
            directives: resolve_for_stage(settings),
        }),
        StageKind::Resubmit => Box::new(ResubmitAction {
            check: required(settings, "check", &raw.check)?,
            job: required(settings, "job", &raw.job)?,
            per_case: settings.per_case,
            max_rounds: settings.max_rounds,
            directives: resolve_for_stage(settings),
        }),
    };
    Ok(action)
}

/// Stage actions keyed by cycle variant, so cycle 0 and later cycles can
/// run different commands for the same stage.
#[derive(Default)]
pub struct ActionTable {
    actions: HashMap<(CycleVariant, Stage), Box<dyn StageAction>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and builds every stage of `variants`. Nothing is written or
    /// submitted, so a configuration error here leaves no state behind.
    pub fn from_config(config: &Config, variants: &[CycleVariant]) -> Result<Self, ConfigError> {
        config.validate_stages(variants)?;
        let mut table = Self::new();
        for variant in variants {
            for stage in variant.stages() {
                let settings = config.stage_settings(*stage, *variant);
                table.insert(*variant, *stage, build_action(&settings)?);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, variant: CycleVariant, stage: Stage, action: Box<dyn StageAction>) {
        self.actions.insert((variant, stage), action);
    }

    pub fn get(&self, variant: CycleVariant, stage: Stage) -> Option<&dyn StageAction> {
        self.actions.get(&(variant, stage)).map(|a| a.as_ref())
    }
}
