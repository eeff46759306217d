use crate::error::Result;
use crate::resources::BatchDirectives;
use crate::runner::{CommandRunner, LocalShell};
use aldrive_core::model::{JobHandle, JobState, SchedulerType};
use std::path::PathBuf;
use std::sync::Arc;

pub mod local;
pub mod pbs;
pub mod slurm;

pub use local::LocalGateway;
pub use pbs::PbsGateway;
pub use slurm::SlurmGateway;

/// Everything a scheduler needs to run one generated job script.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub script: PathBuf,
    pub workdir: PathBuf,
    pub output: PathBuf,
    pub directives: BatchDirectives,
}

pub trait SchedulerGateway: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, spec: &JobSpec) -> Result<JobHandle>;

    /// A single status query. `Err` means the scheduler itself could not be
    /// reached; the wait coordinator decides how long to tolerate that.
    fn poll(&self, handle: &JobHandle) -> Result<JobState>;
}

pub fn gateway_for(kind: SchedulerType) -> Arc<dyn SchedulerGateway> {
    gateway_with_runner(kind, Arc::new(LocalShell))
}

pub fn gateway_with_runner(
    kind: SchedulerType,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn SchedulerGateway> {
    match kind {
        SchedulerType::Slurm => Arc::new(SlurmGateway::new(runner)),
        SchedulerType::Pbs => Arc::new(PbsGateway::new(runner)),
        SchedulerType::Local => Arc::new(LocalGateway::new()),
    }
}

/// First whitespace-delimited token of the first non-empty line.
pub(crate) fn first_token(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next())
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::error::Result;
    use crate::runner::{CommandOutput, CommandRunner};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Replays canned outputs in order and records every invocation.
    #[derive(Default)]
    pub struct CannedRunner {
        pub responses: Mutex<VecDeque<CommandOutput>>,
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl CannedRunner {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for CannedRunner {
        fn run_command(
            &self,
            program: &str,
            args: &[String],
            _cwd: Option<&Path>,
        ) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::failed(127, "no canned response")))
        }
    }
}
