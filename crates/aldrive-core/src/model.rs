use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize, Default,
)]
pub struct CycleIndex(pub u32);

impl CycleIndex {
    pub fn previous(self) -> Option<CycleIndex> {
        self.0.checked_sub(1).map(CycleIndex)
    }

    pub fn next(self) -> CycleIndex {
        CycleIndex(self.0 + 1)
    }

    pub fn variant(self) -> CycleVariant {
        CycleVariant::for_cycle(self)
    }
}

impl fmt::Display for CycleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCycleIndexError(pub String);

impl fmt::Display for ParseCycleIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid cycle index: '{}'. Expected a non-negative integer",
            self.0
        )
    }
}

impl std::error::Error for ParseCycleIndexError {}

impl FromStr for CycleIndex {
    type Err = ParseCycleIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(CycleIndex)
            .map_err(|_| ParseCycleIndexError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Batch,
    Inline,
    Resubmit,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Batch => write!(f, "batch"),
            StageKind::Inline => write!(f, "inline"),
            StageKind::Resubmit => write!(f, "resubmit"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Stage {
    BuildMatrix,
    SolveMatrix,
    RunMd,
    PostProcessMd,
    ExtractClusters,
    ClusterEnergies,
    SelectClusters,
    SetupReference,
    LaunchReference,
    CollectReference,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::BuildMatrix,
        Stage::SolveMatrix,
        Stage::RunMd,
        Stage::PostProcessMd,
        Stage::ExtractClusters,
        Stage::ClusterEnergies,
        Stage::SelectClusters,
        Stage::SetupReference,
        Stage::LaunchReference,
        Stage::CollectReference,
        Stage::Finalize,
    ];

    /// Label written to the ledger. These are shared with ledgers produced by
    /// earlier drivers and must never change.
    pub fn label(self) -> &'static str {
        match self {
            Stage::BuildMatrix => "BUILD_AMAT",
            Stage::SolveMatrix => "SOLVE_AMAT",
            Stage::RunMd => "RUN_MD",
            Stage::PostProcessMd => "POST_PROC",
            Stage::ExtractClusters => "CLUSTER_EXTRACTION",
            Stage::ClusterEnergies => "CLUENER_CALC",
            Stage::SelectClusters => "CLU_SELECTION",
            Stage::SetupReference => "CLEANSETUP_VASP",
            Stage::LaunchReference => "INIT_VASPJOB",
            Stage::CollectReference => "ALL_VASPJOBS",
            Stage::Finalize => "THIS_ALC",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Stage::BuildMatrix => "build-matrix",
            Stage::SolveMatrix => "solve-matrix",
            Stage::RunMd => "run-md",
            Stage::PostProcessMd => "post-process-md",
            Stage::ExtractClusters => "extract-clusters",
            Stage::ClusterEnergies => "cluster-energies",
            Stage::SelectClusters => "select-clusters",
            Stage::SetupReference => "setup-reference",
            Stage::LaunchReference => "launch-reference",
            Stage::CollectReference => "collect-reference",
            Stage::Finalize => "finalize",
        }
    }

    pub fn kind(self) -> StageKind {
        match self {
            Stage::BuildMatrix
            | Stage::SolveMatrix
            | Stage::RunMd
            | Stage::ClusterEnergies
            | Stage::LaunchReference => StageKind::Batch,
            Stage::PostProcessMd
            | Stage::ExtractClusters
            | Stage::SelectClusters
            | Stage::SetupReference
            | Stage::Finalize => StageKind::Inline,
            Stage::CollectReference => StageKind::Resubmit,
        }
    }

    pub fn default_per_case(self, variant: CycleVariant) -> bool {
        match (self, variant) {
            (Stage::RunMd | Stage::PostProcessMd, _) => true,
            (Stage::LaunchReference, CycleVariant::Iteration) => true,
            _ => false,
        }
    }

    pub fn from_label(label: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.label() == label)
    }

    pub fn from_key(key: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.key() == key)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStageError(pub String);

impl fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = Stage::ALL.iter().map(|s| s.key()).collect();
        write!(
            f,
            "invalid stage: '{}'. Valid values are: {}",
            self.0,
            keys.join(", ")
        )
    }
}

impl std::error::Error for ParseStageError {}

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::from_key(s)
            .or_else(|| Stage::from_label(s))
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

const SEED_STAGES: [Stage; 9] = [
    Stage::BuildMatrix,
    Stage::SolveMatrix,
    Stage::ExtractClusters,
    Stage::ClusterEnergies,
    Stage::SelectClusters,
    Stage::SetupReference,
    Stage::LaunchReference,
    Stage::CollectReference,
    Stage::Finalize,
];

const ITERATION_STAGES: [Stage; 11] = [
    Stage::BuildMatrix,
    Stage::SolveMatrix,
    Stage::RunMd,
    Stage::PostProcessMd,
    Stage::ExtractClusters,
    Stage::ClusterEnergies,
    Stage::SelectClusters,
    Stage::SetupReference,
    Stage::LaunchReference,
    Stage::CollectReference,
    Stage::Finalize,
];

/// Cycle 0 seeds from pre-supplied files; every later cycle consumes the
/// reference calculations of the cycle before it and adds MD sampling.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleVariant {
    Seed,
    Iteration,
}

impl CycleVariant {
    pub fn for_cycle(cycle: CycleIndex) -> Self {
        if cycle.0 == 0 {
            CycleVariant::Seed
        } else {
            CycleVariant::Iteration
        }
    }

    pub fn stages(self) -> &'static [Stage] {
        match self {
            CycleVariant::Seed => &SEED_STAGES,
            CycleVariant::Iteration => &ITERATION_STAGES,
        }
    }

    pub fn contains(self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }

    pub fn first_stage(self) -> Stage {
        self.stages()[0]
    }

    /// Transition table: the stage that follows `stage`, or `None` once the
    /// cycle is complete. Stages foreign to the variant have no successor.
    pub fn next_stage(self, stage: Stage) -> Option<Stage> {
        let stages = self.stages();
        let pos = stages.iter().position(|s| *s == stage)?;
        stages.get(pos + 1).copied()
    }

    pub fn first_pending(self, completed: &BTreeSet<Stage>) -> Option<Stage> {
        self.stages()
            .iter()
            .copied()
            .find(|s| !completed.contains(s))
    }

    pub fn is_complete(self, completed: &BTreeSet<Stage>) -> bool {
        self.first_pending(completed).is_none()
    }
}

impl fmt::Display for CycleVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleVariant::Seed => write!(f, "seed"),
            CycleVariant::Iteration => write!(f, "iteration"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    Local,
    #[default]
    Slurm,
    Pbs,
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerType::Local => write!(f, "local"),
            SchedulerType::Slurm => write!(f, "slurm"),
            SchedulerType::Pbs => write!(f, "pbs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSchedulerTypeError(pub String);

impl fmt::Display for ParseSchedulerTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid scheduler type: '{}'. Valid values are: local, slurm, pbs",
            self.0
        )
    }
}

impl std::error::Error for ParseSchedulerTypeError {}

impl FromStr for SchedulerType {
    type Err = ParseSchedulerTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SchedulerType::Local),
            "slurm" => Ok(SchedulerType::Slurm),
            "pbs" | "torque" => Ok(SchedulerType::Pbs),
            _ => Err(ParseSchedulerTypeError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobHandle {
    fn from(s: String) -> Self {
        JobHandle(s)
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        JobHandle(s.to_string())
    }
}

/// What a single scheduler poll reports for a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed { detail: String },
    Missing,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn into_outcome(self) -> Option<JobOutcome> {
        match self {
            JobState::Queued | JobState::Running => None,
            JobState::Succeeded => Some(JobOutcome::Succeeded),
            JobState::Failed { detail } => Some(JobOutcome::Failed { detail }),
            JobState::Missing => Some(JobOutcome::Missing {
                detail: "job is neither queued nor running and left no completion record"
                    .to_string(),
            }),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed { detail } => write!(f, "failed ({})", detail),
            JobState::Missing => write!(f, "missing"),
        }
    }
}

/// Terminal result of a wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobOutcome {
    Succeeded,
    Failed { detail: String },
    Missing { detail: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::Failed { detail } => write!(f, "failed: {}", detail),
            JobOutcome::Missing { detail } => write!(f, "missing: {}", detail),
        }
    }
}
