use super::{first_token, JobSpec, SchedulerGateway};
use crate::error::{ClientError, Result};
use crate::runner::CommandRunner;
use aldrive_core::model::{JobHandle, JobState};
use std::sync::Arc;

const NAME: &str = "slurm";

pub struct SlurmGateway {
    runner: Arc<dyn CommandRunner>,
}

impl SlurmGateway {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn query_accounting(&self, handle: &JobHandle) -> Result<JobState> {
        let args: Vec<String> = ["-n", "-X", "-P", "-j", handle.0.as_str(), "-o", "State"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = self.runner.run_command("sacct", &args, None)?;
        if !out.success {
            return Err(ClientError::TransientPoll {
                handle: handle.clone(),
                detail: format!("sacct failed: {}", out.stderr.trim()),
            });
        }
        Ok(match first_token(&out.stdout) {
            Some(state) => map_state(state),
            None => JobState::Missing,
        })
    }
}

/// Parses `sbatch --parsable` output: `<id>` or `<id>;<cluster>`.
pub fn parse_job_id(output: &str) -> Option<JobHandle> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        Some(JobHandle(id.to_string()))
    } else {
        None
    }
}

fn map_state(state: &str) -> JobState {
    match state.trim_end_matches('+') {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESIZING"
        | "SUSPENDED" => JobState::Queued,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobState::Running,
        "COMPLETED" => JobState::Succeeded,
        other => JobState::Failed {
            detail: other.to_string(),
        },
    }
}

impl SchedulerGateway for SlurmGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name={}", spec.name),
            format!("--output={}", spec.output.display()),
            format!("--chdir={}", spec.workdir.display()),
        ];
        args.extend(spec.directives.to_sbatch_args());
        args.push(spec.script.to_string_lossy().to_string());

        let out = self
            .runner
            .run_command("sbatch", &args, Some(&spec.workdir))?;
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
        tracing::info!("Submitted '{}' as SLURM job {}", spec.name, handle);
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let args: Vec<String> = ["-h", "-j", handle.0.as_str(), "-o", "%T"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = self.runner.run_command("squeue", &args, None)?;

        if out.success {
            if let Some(state) = first_token(&out.stdout) {
                return Ok(map_state(state));
            }
        } else if !out.stderr.contains("Invalid job id") {
            return Err(ClientError::TransientPoll {
                handle: handle.clone(),
                detail: format!("squeue failed: {}", out.stderr.trim()),
            });
        }

        tracing::debug!("Job {} left the queue; consulting accounting", handle);
        self.query_accounting(handle)
    }
}
