use aldrive_client::WaitEvent;
use aldrive_core::model::{CycleIndex, CycleVariant, JobHandle, Stage};
use std::sync::mpsc::Sender;

#[derive(Debug, Clone)]
pub enum DriverEvent {
    CycleSkipped {
        cycle: CycleIndex,
        last: CycleIndex,
    },
    CycleStarted {
        cycle: CycleIndex,
        variant: CycleVariant,
        resumed: bool,
        completed: usize,
        total: usize,
    },
    StageSkipped {
        cycle: CycleIndex,
        stage: Stage,
    },
    StageStarted {
        cycle: CycleIndex,
        stage: Stage,
    },
    CommandStarted {
        stage: Stage,
        command: String,
    },
    JobSubmitted {
        stage: Stage,
        name: String,
        handle: JobHandle,
    },
    Waiting(WaitEvent),
    ResubmitRound {
        stage: Stage,
        round: u32,
        outstanding: usize,
    },
    StageCompleted {
        cycle: CycleIndex,
        stage: Stage,
    },
    StageFailed {
        cycle: CycleIndex,
        stage: Stage,
        message: String,
    },
    CycleCompleted {
        cycle: CycleIndex,
    },
}

/// Optional progress channel. Sending never fails the run: a dropped
/// receiver just means nobody is watching.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<DriverEvent>>,
}

impl EventSink {
    pub fn new(sender: Sender<DriverEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: DriverEvent) {
        if let Some(tx) = &self.sender {
            let _ = tx.send(event);
        }
    }
}
