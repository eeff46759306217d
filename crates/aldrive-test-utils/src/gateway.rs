use aldrive_client::error::{ClientError, Result};
use aldrive_client::{JobSpec, SchedulerGateway};
use aldrive_core::model::{JobHandle, JobState};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    State(JobState),
    Error(String),
}

impl From<JobState> for PollStep {
    fn from(state: JobState) -> Self {
        PollStep::State(state)
    }
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<JobHandle, VecDeque<PollStep>>,
    by_name: Vec<(String, Vec<PollStep>)>,
    rejected_names: Vec<String>,
    submitted: Vec<(JobHandle, JobSpec)>,
    polls: HashMap<JobHandle, usize>,
    next_id: usize,
}

/// In-memory scheduler. Each handle replays a list of poll steps; the last
/// step repeats forever. Handles never scripted or submitted poll as missing.
pub struct ScriptedGateway {
    inner: Mutex<Inner>,
    default_steps: Vec<PollStep>,
}

impl ScriptedGateway {
    /// Submitted jobs succeed on their first poll.
    pub fn new() -> Self {
        Self::with_default(vec![PollStep::State(JobState::Succeeded)])
    }

    pub fn with_default(steps: Vec<PollStep>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_steps: steps,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("scripted gateway lock")
    }

    pub fn script(&self, handle: &str, steps: Vec<PollStep>) {
        self.lock()
            .scripts
            .insert(JobHandle::from(handle), steps.into());
    }

    /// Jobs whose name contains `fragment` get `steps` instead of the default.
    pub fn script_by_name(&self, fragment: &str, steps: Vec<PollStep>) {
        self.lock().by_name.push((fragment.to_string(), steps));
    }

    pub fn reject_by_name(&self, fragment: &str) {
        self.lock().rejected_names.push(fragment.to_string());
    }

    pub fn submitted(&self) -> Vec<(JobHandle, JobSpec)> {
        self.lock().submitted.clone()
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.lock()
            .submitted
            .iter()
            .map(|(_, s)| s.name.clone())
            .collect()
    }

    pub fn poll_count(&self, handle: &str) -> usize {
        self.lock()
            .polls
            .get(&JobHandle::from(handle))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let mut inner = self.lock();
        if inner
            .rejected_names
            .iter()
            .any(|frag| spec.name.contains(frag.as_str()))
        {
            return Err(ClientError::Submission {
                scheduler: "scripted",
                name: spec.name.clone(),
                detail: "rejected by test script".to_string(),
            });
        }

        inner.next_id += 1;
        let handle = JobHandle(format!("job-{}", inner.next_id));
        let steps = inner
            .by_name
            .iter()
            .rev()
            .find(|(frag, _)| spec.name.contains(frag.as_str()))
            .map(|(_, steps)| steps.clone())
            .unwrap_or_else(|| self.default_steps.clone());
        inner.scripts.insert(handle.clone(), steps.into());
        inner.submitted.push((handle.clone(), spec.clone()));
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let mut inner = self.lock();
        *inner.polls.entry(handle.clone()).or_insert(0) += 1;

        let Some(steps) = inner.scripts.get_mut(handle) else {
            return Ok(JobState::Missing);
        };
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        };

        match step {
            Some(PollStep::State(state)) => Ok(state),
            Some(PollStep::Error(detail)) => Err(ClientError::TransientPoll {
                handle: handle.clone(),
                detail,
            }),
            None => Ok(JobState::Missing),
        }
    }
}
