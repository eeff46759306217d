use crate::actions::ActionTable;
use crate::cycle::CycleStateMachine;
use crate::error::DriverError;
use crate::events::{DriverEvent, EventSink};
use crate::notify::{notifier_for, Notifier};
use aldrive_client::{gateway_for, Clock, SchedulerGateway, SystemClock};
use aldrive_core::config::Config;
use aldrive_core::errors::DomainError;
use aldrive_core::ledger::LedgerState;
use aldrive_core::model::{CycleIndex, CycleVariant};
use aldrive_core::Ledger;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStart {
    /// Continue the cycle the ledger last recorded; its completed stages stay
    /// complete.
    Resume,
    /// Write a new cycle marker and start from the first stage.
    NewLineage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedCycle {
    pub cycle: CycleIndex,
    pub start: CycleStart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    pub skipped: Vec<CycleIndex>,
    pub cycles: Vec<PlannedCycle>,
}

/// Distinct stage tables needed for `cycles`, in table order.
pub fn variants_for(cycles: &[CycleIndex]) -> Vec<CycleVariant> {
    cycles
        .iter()
        .map(|c| c.variant())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The requested list must be non-empty, ascending and gapless.
pub fn check_requested(requested: &[CycleIndex]) -> Result<(), DomainError> {
    if requested.is_empty() {
        return Err(DomainError::NoCyclesRequested);
    }
    for pair in requested.windows(2) {
        if pair[1] != pair[0].next() {
            return Err(DomainError::InvalidCycleOrder {
                previous: pair[0],
                next: pair[1],
            });
        }
    }
    Ok(())
}

/// Reconciles the requested cycles with what the ledger last recorded.
///
/// Cycles before the ledger's last cycle are skipped, as is the last cycle
/// itself once all its stages are complete. An unfinished last cycle resumes.
/// Any other cycle starts a new lineage with every stage pending, whatever
/// state the previous cycle was left in.
pub fn plan(requested: &[CycleIndex], state: &LedgerState) -> Result<RunPlan, DomainError> {
    check_requested(requested)?;

    let mut result = RunPlan::default();
    let Some(last) = state.last_cycle() else {
        if requested[0] != CycleIndex(0) {
            tracing::warn!(
                "The ledger is empty but the first requested cycle is ALC-{}; \
                 earlier cycles are assumed to exist on disk.",
                requested[0]
            );
        }
        result.cycles = requested
            .iter()
            .map(|c| PlannedCycle {
                cycle: *c,
                start: CycleStart::NewLineage,
            })
            .collect();
        return Ok(result);
    };

    let finished = state.last_cycle_finished();
    for cycle in requested {
        if *cycle < last || (*cycle == last && finished) {
            result.skipped.push(*cycle);
            continue;
        }

        let start = if *cycle == last {
            CycleStart::Resume
        } else {
            CycleStart::NewLineage
        };
        if result.cycles.is_empty() && start == CycleStart::NewLineage {
            if !finished {
                tracing::warn!(
                    "ALC-{} was left unfinished in the ledger; ALC-{} starts a new lineage anyway.",
                    last,
                    cycle
                );
            } else if *cycle != last.next() {
                tracing::warn!(
                    "The ledger stops at ALC-{} but ALC-{} was requested; \
                     the cycles in between are assumed to exist on disk.",
                    last,
                    cycle
                );
            }
        }
        result.cycles.push(PlannedCycle {
            cycle: *cycle,
            start,
        });
    }
    Ok(result)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub skipped: Vec<CycleIndex>,
    pub completed: Vec<CycleIndex>,
    pub stages_executed: usize,
}

pub struct DriverLoop {
    config: Config,
    gateway: Arc<dyn SchedulerGateway>,
    clock: Arc<dyn Clock>,
    notifier: Box<dyn Notifier>,
    events: EventSink,
}

impl DriverLoop {
    pub fn new(config: Config) -> Self {
        let gateway = gateway_for(config.scheduler.kind);
        let notifier = notifier_for(config.notify.as_ref());
        Self {
            config,
            gateway,
            clock: Arc::new(SystemClock),
            notifier,
            events: EventSink::none(),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn SchedulerGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the requested cycles in order, stopping at the first cycle that
    /// fails. Configuration is validated for every cycle variant involved
    /// before the ledger is opened.
    pub fn run(&self, requested: &[CycleIndex]) -> Result<RunSummary, DriverError> {
        check_requested(requested)?;
        let actions = ActionTable::from_config(&self.config, &variants_for(requested))?;

        let ledger_path = self.config.ledger_path();
        let mut ledger = Ledger::load(&ledger_path)?;
        let plan = plan(requested, ledger.state())?;
        tracing::info!(
            "Scheduler '{}', ledger {}: {} cycle(s) to run, {} skipped",
            self.gateway.name(),
            ledger_path.display(),
            plan.cycles.len(),
            plan.skipped.len()
        );

        let mut summary = RunSummary::default();
        for cycle in &plan.skipped {
            let last = ledger.last_cycle().unwrap_or(*cycle);
            tracing::info!(
                "ALC-{} is already complete (ledger is at ALC-{}); skipping",
                cycle,
                last
            );
            self.events.emit(DriverEvent::CycleSkipped {
                cycle: *cycle,
                last,
            });
            summary.skipped.push(*cycle);
        }

        let machine = CycleStateMachine {
            config: &self.config,
            actions: &actions,
            gateway: self.gateway.as_ref(),
            clock: self.clock.as_ref(),
            notifier: self.notifier.as_ref(),
            events: &self.events,
        };

        for planned in &plan.cycles {
            let cycle = planned.cycle;
            let variant = cycle.variant();
            if planned.start == CycleStart::NewLineage {
                ledger.reset_for_new_lineage();
                ledger.record_cycle_start(cycle)?;
            }

            let completed = variant
                .stages()
                .iter()
                .filter(|s| ledger.is_stage_complete(**s))
                .count();
            let verb = if planned.start == CycleStart::Resume {
                "Resuming"
            } else {
                "Starting"
            };
            tracing::info!(
                "{} ALC-{} ({} variant, {}/{} stages complete)",
                verb,
                cycle,
                variant,
                completed,
                variant.stages().len()
            );
            self.events.emit(DriverEvent::CycleStarted {
                cycle,
                variant,
                resumed: planned.start == CycleStart::Resume,
                completed,
                total: variant.stages().len(),
            });

            let cycle_summary = machine.run_cycle(&mut ledger, cycle)?;
            summary.stages_executed += cycle_summary.executed.len();
            summary.completed.push(cycle);
            tracing::info!("ALC-{} complete", cycle);
            self.events.emit(DriverEvent::CycleCompleted { cycle });
        }

        Ok(summary)
    }
}
