use super::{JobSpec, SchedulerGateway};
use crate::error::{ClientError, Result};
use aldrive_core::model::{JobHandle, JobState};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

const NAME: &str = "local";

enum Slot {
    Running(Child),
    Done(JobState),
}

/// Runs job scripts as children of the driver. Batch directives are ignored.
#[derive(Default)]
pub struct LocalGateway {
    jobs: Mutex<HashMap<JobHandle, Slot>>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulerGateway for LocalGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        if let Some(parent) = spec.output.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let log = fs_err::File::create(&spec.output)?;
        let log_err = log.file().try_clone()?;

        let mut cmd = Command::new("sh");
        cmd.arg(&spec.script)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.into_parts().0))
            .stderr(Stdio::from(log_err));

        aldrive_core::logging::log_command(&cmd);

        let child = cmd.spawn().map_err(|e| ClientError::Submission {
            scheduler: NAME,
            name: spec.name.clone(),
            detail: e.to_string(),
        })?;

        let handle = JobHandle(format!("local-{}", child.id()));
        tracing::info!("Started '{}' as {}", spec.name, handle);

        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        jobs.insert(handle.clone(), Slot::Running(child));
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let Some(slot) = jobs.get_mut(handle) else {
            return Ok(JobState::Missing);
        };

        let finished = match slot {
            Slot::Done(state) => return Ok(state.clone()),
            Slot::Running(child) => match child.try_wait() {
                Ok(None) => return Ok(JobState::Running),
                Ok(Some(status)) if status.success() => JobState::Succeeded,
                Ok(Some(status)) => JobState::Failed {
                    detail: match status.code() {
                        Some(code) => format!("exit status {}", code),
                        None => "terminated by signal".to_string(),
                    },
                },
                Err(e) => {
                    return Err(ClientError::TransientPoll {
                        handle: handle.clone(),
                        detail: e.to_string(),
                    })
                }
            },
        };

        *slot = Slot::Done(finished.clone());
        Ok(finished)
    }
}

fn poisoned() -> ClientError {
    ClientError::Io(std::io::Error::other("local job table lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BatchDirectives;
    use std::path::Path;
    use std::time::Duration;

    fn spec_for(dir: &Path, name: &str, body: &str) -> JobSpec {
        let script = dir.join(format!("{}.sh", name));
        fs_err::write(&script, body).unwrap();
        JobSpec {
            name: name.to_string(),
            script,
            workdir: dir.to_path_buf(),
            output: dir.join(format!("{}.out", name)),
            directives: BatchDirectives::default(),
        }
    }

    fn wait_terminal(gw: &LocalGateway, h: &JobHandle) -> JobState {
        for _ in 0..500 {
            let state = gw.poll(h).unwrap();
            if state.is_terminal() {
                return state;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job {h} never finished");
    }

    #[test]
    fn test_local_job_success_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let gw = LocalGateway::new();
        let h = gw
            .submit(&spec_for(dir.path(), "ok", "echo out; echo err >&2; touch marker\n"))
            .unwrap();

        assert_eq!(wait_terminal(&gw, &h), JobState::Succeeded);
        assert_eq!(gw.poll(&h).unwrap(), JobState::Succeeded);
        assert!(dir.path().join("marker").exists());
        let log = fs_err::read_to_string(dir.path().join("ok.out")).unwrap();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[test]
    fn test_local_job_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gw = LocalGateway::new();
        let h = gw.submit(&spec_for(dir.path(), "bad", "exit 4\n")).unwrap();
        assert_eq!(
            wait_terminal(&gw, &h),
            JobState::Failed {
                detail: "exit status 4".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_handle_is_missing() {
        let gw = LocalGateway::new();
        assert_eq!(
            gw.poll(&JobHandle::from("local-1")).unwrap(),
            JobState::Missing
        );
    }
}
