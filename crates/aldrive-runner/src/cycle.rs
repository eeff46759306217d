use crate::actions::{ActionTable, StageContext, StageResult};
use crate::error::{DriverError, StageError};
use crate::events::{DriverEvent, EventSink};
use crate::notify::Notifier;
use aldrive_client::{Clock, SchedulerGateway};
use aldrive_core::config::Config;
use aldrive_core::errors::ConfigError;
use aldrive_core::model::{CycleIndex, Stage};
use aldrive_core::Ledger;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub executed: Vec<Stage>,
    pub already_complete: usize,
}

/// Walks one cycle's stage table, running each stage the ledger does not
/// already mark complete and committing it before moving on.
pub struct CycleStateMachine<'a> {
    pub config: &'a Config,
    pub actions: &'a ActionTable,
    pub gateway: &'a dyn SchedulerGateway,
    pub clock: &'a dyn Clock,
    pub notifier: &'a dyn Notifier,
    pub events: &'a EventSink,
}

impl CycleStateMachine<'_> {
    /// `ledger` must already have `cycle` as its last recorded cycle.
    pub fn run_cycle(
        &self,
        ledger: &mut Ledger,
        cycle: CycleIndex,
    ) -> Result<CycleSummary, DriverError> {
        let variant = cycle.variant();
        let mut summary = CycleSummary {
            already_complete: variant
                .stages()
                .iter()
                .filter(|s| ledger.is_stage_complete(**s))
                .count(),
            ..Default::default()
        };

        self.prepare_cycle_dir(cycle, summary.already_complete == 0)?;

        for stage in variant.stages() {
            if ledger.is_stage_complete(*stage) {
                tracing::debug!("ALC-{} {} already complete; skipping", cycle, stage);
                self.events.emit(DriverEvent::StageSkipped {
                    cycle,
                    stage: *stage,
                });
            }
        }

        while let Some(stage) = variant.first_pending(ledger.completed_stages()) {
            tracing::info!("ALC-{} starting stage {}", cycle, stage);
            self.events.emit(DriverEvent::StageStarted { cycle, stage });

            if let Err(source) = self.run_stage(cycle, stage) {
                let err = DriverError::StageFailed {
                    cycle,
                    stage,
                    source,
                };
                tracing::error!("{}", err);
                self.events.emit(DriverEvent::StageFailed {
                    cycle,
                    stage,
                    message: err.to_string(),
                });
                self.send_notification(
                    &format!("ALC-{} status: {}: FAILED", cycle, stage.label()),
                    &err.to_string(),
                );
                return Err(err);
            }

            ledger.record_stage_complete(stage)?;
            tracing::info!("ALC-{} stage {} complete", cycle, stage);
            self.events.emit(DriverEvent::StageCompleted { cycle, stage });
            self.send_notification(
                &format!("ALC-{} status: {}: COMPLETE", cycle, stage.label()),
                &format!("ALC-{} finished stage {} ({}).\n", cycle, stage.label(), stage.key()),
            );
            summary.executed.push(stage);
        }

        Ok(summary)
    }

    /// A cycle with nothing complete starts from an empty directory; a
    /// resumed one keeps whatever its finished stages produced.
    fn prepare_cycle_dir(&self, cycle: CycleIndex, fresh: bool) -> Result<(), DriverError> {
        let dir = self.config.cycle_dir(cycle);
        let io_err = |source| DriverError::Workspace {
            path: dir.clone(),
            source,
        };
        if fresh && dir.exists() {
            tracing::info!("Recreating {} for a fresh start of ALC-{}", dir.display(), cycle);
            fs_err::remove_dir_all(&dir).map_err(io_err)?;
        }
        fs_err::create_dir_all(&dir).map_err(io_err)?;
        Ok(())
    }

    fn run_stage(&self, cycle: CycleIndex, stage: Stage) -> Result<(), StageError> {
        let variant = cycle.variant();
        let action = self
            .actions
            .get(variant, stage)
            .ok_or(ConfigError::NoAction(stage))?;
        let ctx = StageContext::new(
            self.config,
            cycle,
            stage,
            self.gateway,
            self.clock,
            self.events,
        );

        if let StageResult::Submitted(handles) = action.perform(&ctx)? {
            if !handles.is_empty() {
                let report = ctx.wait_all(&handles);
                let failures: Vec<String> = report
                    .failures()
                    .map(|(h, o)| format!("{} {}", h, o))
                    .collect();

                if !failures.is_empty() {
                    if action.tolerates_partial_failure() && report.succeeded() > 0 {
                        for failure in &failures {
                            tracing::warn!(
                                "ALC-{} {}: tolerated failure: {}",
                                cycle,
                                stage,
                                failure
                            );
                        }
                    } else {
                        return Err(StageError::JobFailure {
                            failed: failures.len(),
                            total: report.outcomes.len(),
                            detail: failures.join("; "),
                        });
                    }
                }
            }
        }

        action.finish(&ctx)
    }

    fn send_notification(&self, subject: &str, body: &str) {
        if let Err(e) = self.notifier.notify(subject, body) {
            tracing::warn!("Notification '{}' not delivered: {}", subject, e);
        }
    }
}
