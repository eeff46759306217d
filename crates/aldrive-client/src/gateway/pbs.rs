use super::{first_token, JobSpec, SchedulerGateway};
use crate::error::{ClientError, Result};
use crate::runner::{CommandOutput, CommandRunner};
use aldrive_core::model::{JobHandle, JobState};
use std::collections::HashMap;
use std::sync::Arc;

const NAME: &str = "pbs";

/// PBS/Torque through `qsub` and `qstat -f`.
pub struct PbsGateway {
    runner: Arc<dyn CommandRunner>,
}

impl PbsGateway {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn qstat(&self, handle: &JobHandle, history: bool) -> Result<CommandOutput> {
        let mut args = Vec::new();
        if history {
            args.push("-x".to_string());
        }
        args.push("-f".to_string());
        args.push(handle.0.clone());
        self.runner.run_command("qstat", &args, None)
    }
}

pub fn parse_job_id(output: &str) -> Option<JobHandle> {
    let id = first_token(output)?;
    if id.starts_with(|c: char| c.is_ascii_digit()) {
        Some(JobHandle(id.to_string()))
    } else {
        None
    }
}

/// `key = value` attributes from `qstat -f`. Continuation lines are ignored.
fn parse_attributes(output: &str) -> HashMap<&str, &str> {
    output
        .lines()
        .filter_map(|line| line.split_once(" = "))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

fn state_from_attributes(attrs: &HashMap<&str, &str>) -> Option<JobState> {
    let state = attrs.get("job_state")?;
    Some(match *state {
        "Q" | "H" | "W" | "T" | "S" => JobState::Queued,
        "R" | "E" | "B" => JobState::Running,
        "C" | "F" | "X" => match attrs.get("exit_status").map(|s| s.parse::<i32>()) {
            Some(Ok(0)) => JobState::Succeeded,
            Some(Ok(code)) => JobState::Failed {
                detail: format!("exit status {}", code),
            },
            _ => JobState::Failed {
                detail: format!("job_state {} without exit status", state),
            },
        },
        other => JobState::Failed {
            detail: format!("unexpected job_state {}", other),
        },
    })
}

fn is_unknown_job(out: &CommandOutput) -> bool {
    out.stderr.contains("Unknown Job Id") || out.stderr.contains("Job has finished")
}

impl SchedulerGateway for PbsGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let mut args = vec![
            "-N".to_string(),
            spec.name.clone(),
            "-o".to_string(),
            spec.output.to_string_lossy().to_string(),
            "-j".to_string(),
            "oe".to_string(),
            "-d".to_string(),
            spec.workdir.to_string_lossy().to_string(),
        ];
        args.extend(spec.directives.to_qsub_args());
        args.push(spec.script.to_string_lossy().to_string());

        let out = self
            .runner
            .run_command("qsub", &args, Some(&spec.workdir))?;
        if !out.success {
            return Err(ClientError::Submission {
                scheduler: NAME,
                name: spec.name.clone(),
                detail: out.stderr.trim().to_string(),
            });
        }

        let handle = parse_job_id(&out.stdout).ok_or_else(|| ClientError::JobIdParse {
            scheduler: NAME,
            output: out.stdout.clone(),
        })?;
        tracing::info!("Submitted '{}' as PBS job {}", spec.name, handle);
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let live = self.qstat(handle, false)?;
        if live.success {
            if let Some(state) = state_from_attributes(&parse_attributes(&live.stdout)) {
                return Ok(state);
            }
        } else if !is_unknown_job(&live) {
            return Err(ClientError::TransientPoll {
                handle: handle.clone(),
                detail: format!("qstat failed: {}", live.stderr.trim()),
            });
        }

        let history = self.qstat(handle, true)?;
        if history.success {
            return Ok(state_from_attributes(&parse_attributes(&history.stdout))
                .unwrap_or(JobState::Missing));
        }
        // Torque has no -x; both "unknown" answers mean the job left no record.
        if is_unknown_job(&history) || history.stderr.contains("invalid option") {
            return Ok(JobState::Missing);
        }
        Err(ClientError::TransientPoll {
            handle: handle.clone(),
            detail: format!("qstat -x failed: {}", history.stderr.trim()),
        })
    }
}
