use crate::gateway::SchedulerGateway;
use aldrive_core::config::SchedulerConfig;
use aldrive_core::model::{JobHandle, JobOutcome};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff: f64,
    pub max_transient_errors: u32,
}

impl PollPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_interval: config.max_poll_interval(),
            backoff: config.backoff_factor,
            max_transient_errors: config.max_transient_errors,
        }
    }

    /// Never below `interval`, never above `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let ceiling = self.max_interval.max(self.interval);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff.max(1.0))
            .unwrap_or(ceiling)
            .clamp(self.interval, ceiling)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitEvent {
    JobFinished {
        handle: JobHandle,
        outcome: JobOutcome,
    },
    TransientError {
        handle: JobHandle,
        consecutive: u32,
        detail: String,
    },
    StillWaiting {
        pending: usize,
        total: usize,
        next_poll: Duration,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitReport {
    pub outcomes: BTreeMap<JobHandle, JobOutcome>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl WaitReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(JobOutcome::is_success)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&JobHandle, &JobOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_success())
    }
}

/// Blocks until every handle is terminal. Sibling failures never cancel the
/// remaining jobs; the caller decides what a failure means for the stage.
pub struct JobWaitCoordinator<'a> {
    gateway: &'a dyn SchedulerGateway,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> JobWaitCoordinator<'a> {
    pub fn new(
        gateway: &'a dyn SchedulerGateway,
        clock: &'a dyn Clock,
        policy: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            clock,
            policy,
        }
    }

    pub fn wait_all(&self, handles: &[JobHandle]) -> WaitReport {
        self.wait_all_with(handles, |_| {})
    }

    pub fn wait_all_with(&self, handles: &[JobHandle], observe: impl Fn(&WaitEvent)) -> WaitReport {
        let started = self.clock.now();
        let wanted: BTreeSet<&JobHandle> = handles.iter().collect();
        let total = wanted.len();
        let mut report = WaitReport::default();
        let mut transient: HashMap<JobHandle, u32> = HashMap::new();
        let mut interval = self.policy.interval;

        tracing::debug!(
            "Waiting on {} job(s) via {}",
            total,
            self.gateway.name()
        );

        loop {
            let pending: Vec<&JobHandle> = wanted
                .iter()
                .copied()
                .filter(|h| !report.outcomes.contains_key(*h))
                .collect();
            if pending.is_empty() {
                break;
            }

            let polled: Vec<_> = pending
                .par_iter()
                .map(|h| ((*h).clone(), self.gateway.poll(h)))
                .collect();
            report.polls += 1;

            let mut progressed = false;
            for (handle, result) in polled {
                match result {
                    Ok(state) => {
                        transient.remove(&handle);
                        if let Some(outcome) = state.into_outcome() {
                            if outcome.is_success() {
                                tracing::info!("Job {} {}", handle, outcome);
                            } else {
                                tracing::warn!("Job {} {}", handle, outcome);
                            }
                            observe(&WaitEvent::JobFinished {
                                handle: handle.clone(),
                                outcome: outcome.clone(),
                            });
                            report.outcomes.insert(handle, outcome);
                            progressed = true;
                        }
                    }
                    Err(e) => {
                        let count = transient.entry(handle.clone()).or_insert(0);
                        *count += 1;
                        tracing::warn!(
                            "Transient poll error {} for job {}: {}",
                            count,
                            handle,
                            e
                        );
                        observe(&WaitEvent::TransientError {
                            handle: handle.clone(),
                            consecutive: *count,
                            detail: e.to_string(),
                        });
                        if *count > self.policy.max_transient_errors {
                            let outcome = JobOutcome::Missing {
                                detail: format!(
                                    "status unavailable after {} consecutive poll errors (last: {})",
                                    count, e
                                ),
                            };
                            tracing::error!("Job {} {}", handle, outcome);
                            observe(&WaitEvent::JobFinished {
                                handle: handle.clone(),
                                outcome: outcome.clone(),
                            });
                            report.outcomes.insert(handle, outcome);
                            progressed = true;
                        }
                    }
                }
            }

            if report.outcomes.len() == total {
                break;
            }

            if progressed {
                interval = self.policy.interval;
            }
            observe(&WaitEvent::StillWaiting {
                pending: total - report.outcomes.len(),
                total,
                next_poll: interval,
            });
            self.clock.sleep(interval);
            interval = self.policy.next_interval(interval);
        }

        report.elapsed = self.clock.now().saturating_duration_since(started);
        report
    }
}
