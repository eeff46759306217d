use crate::constants::{dirs, files, ledger};
use crate::errors::ConfigError;
use crate::model::{CycleIndex, CycleVariant, SchedulerType, Stage, StageKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_ROUNDS: u32 = 10;
/// One week; no scheduler poll needs to wait longer.
const POLL_INTERVAL_LIMIT_SECS: f64 = 604_800.0;
const BACKOFF_FACTOR_LIMIT: f64 = 10.0;

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from(ledger::FILE_NAME)
}

fn default_cases() -> u32 {
    1
}

fn default_poll_interval_secs() -> f64 {
    60.0
}

fn default_max_poll_interval_secs() -> f64 {
    600.0
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_max_transient_errors() -> u32 {
    5
}

fn default_notify_command() -> String {
    "mail".to_string()
}

fn default_max_log_files() -> usize {
    20
}

fn default_max_log_age_days() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    #[serde(default = "default_cases")]
    pub cases: u32,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub hpc: JobResources,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stages: BTreeMap<String, StageConfig>,
    #[serde(default)]
    pub seed_stages: BTreeMap<String, StageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub kind: SchedulerType,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_max_poll_interval_secs")]
    pub max_poll_interval_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_transient_errors")]
    pub max_transient_errors: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerType::default(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_interval_secs: default_max_poll_interval_secs(),
            backoff_factor: default_backoff_factor(),
            max_transient_errors: default_max_transient_errors(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        bounded_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        bounded_secs(self.max_poll_interval_secs.max(self.poll_interval_secs))
    }
}

/// Out-of-range values saturate at the poll limit instead of panicking.
fn bounded_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(POLL_INTERVAL_LIMIT_SECS))
        .unwrap_or(Duration::from_secs_f64(POLL_INTERVAL_LIMIT_SECS))
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobResources {
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub walltime: Option<String>,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub extra_opts: Vec<String>,
}

impl JobResources {
    fn merge(&mut self, other: &JobResources) {
        if let Some(val) = other.nodes {
            self.nodes = Some(val);
        }
        if let Some(val) = other.ppn {
            self.ppn = Some(val);
        }
        if let Some(val) = &other.walltime {
            self.walltime = Some(val.clone());
        }
        if let Some(val) = &other.queue {
            self.queue = Some(val.clone());
        }
        if let Some(val) = &other.account {
            self.account = Some(val.clone());
        }
        if let Some(val) = &other.email {
            self.email = Some(val.clone());
        }
        if !other.extra_opts.is_empty() {
            self.extra_opts = other.extra_opts.clone();
        }
    }

    fn is_empty(&self) -> bool {
        *self == JobResources::default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    pub email: String,
    #[serde(default = "default_notify_command")]
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
    #[serde(default = "default_max_log_age_days")]
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_log_files(),
            max_age_days: default_max_log_age_days(),
        }
    }
}

/// One `[stages.<key>]` table. Which fields are meaningful depends on the
/// stage's kind; see [`StageSettings::validate`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub run: Option<String>,
    pub before: Option<String>,
    pub job: Option<String>,
    pub after: Option<String>,
    pub check: Option<String>,
    pub per_case: Option<bool>,
    pub tolerate_failures: Option<bool>,
    pub max_rounds: Option<u32>,
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub walltime: Option<String>,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub extra_opts: Vec<String>,
}

impl StageConfig {
    fn resources(&self) -> JobResources {
        JobResources {
            nodes: self.nodes,
            ppn: self.ppn,
            walltime: self.walltime.clone(),
            queue: self.queue.clone(),
            account: self.account.clone(),
            email: self.email.clone(),
            extra_opts: self.extra_opts.clone(),
        }
    }

    fn overlay(&mut self, other: &StageConfig) {
        fn pick<T: Clone>(slot: &mut Option<T>, val: &Option<T>) {
            if let Some(v) = val {
                *slot = Some(v.clone());
            }
        }
        pick(&mut self.run, &other.run);
        pick(&mut self.before, &other.before);
        pick(&mut self.job, &other.job);
        pick(&mut self.after, &other.after);
        pick(&mut self.check, &other.check);
        pick(&mut self.per_case, &other.per_case);
        pick(&mut self.tolerate_failures, &other.tolerate_failures);
        pick(&mut self.max_rounds, &other.max_rounds);
        pick(&mut self.nodes, &other.nodes);
        pick(&mut self.ppn, &other.ppn);
        pick(&mut self.walltime, &other.walltime);
        pick(&mut self.queue, &other.queue);
        pick(&mut self.account, &other.account);
        pick(&mut self.email, &other.email);
        if !other.extra_opts.is_empty() {
            self.extra_opts = other.extra_opts.clone();
        }
    }
}

/// Effective parameters for one stage in one cycle variant.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub stage: Stage,
    pub variant: CycleVariant,
    pub raw: StageConfig,
    pub per_case: bool,
    pub tolerate_failures: bool,
    pub max_rounds: u32,
    pub resources: JobResources,
}

impl StageSettings {
    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn validate(&self, scheduler: SchedulerType) -> Result<(), ConfigError> {
        let stage = self.stage.key();
        let kind = self.kind();
        let raw = &self.raw;

        let missing = |option| ConfigError::MissingStageOption {
            stage,
            kind,
            option,
        };
        let unrecognized = |option| ConfigError::UnrecognizedStageOption {
            stage,
            kind,
            option,
        };

        let (required, rejected): (&[(&'static str, bool)], &[(&'static str, bool)]) = match kind
        {
            StageKind::Inline => (
                &[("run", raw.run.is_some())],
                &[
                    ("before", raw.before.is_some()),
                    ("job", raw.job.is_some()),
                    ("after", raw.after.is_some()),
                    ("check", raw.check.is_some()),
                    ("tolerate_failures", raw.tolerate_failures.is_some()),
                    ("max_rounds", raw.max_rounds.is_some()),
                    ("resources", !raw.resources().is_empty()),
                ],
            ),
            StageKind::Batch => (
                &[("job", raw.job.is_some())],
                &[
                    ("run", raw.run.is_some()),
                    ("check", raw.check.is_some()),
                    ("max_rounds", raw.max_rounds.is_some()),
                ],
            ),
            StageKind::Resubmit => (
                &[("check", raw.check.is_some()), ("job", raw.job.is_some())],
                &[
                    ("run", raw.run.is_some()),
                    ("before", raw.before.is_some()),
                    ("after", raw.after.is_some()),
                    ("tolerate_failures", raw.tolerate_failures.is_some()),
                ],
            ),
        };

        if let Some((option, _)) = required.iter().find(|(_, present)| !present) {
            return Err(missing(option));
        }
        if let Some((option, _)) = rejected.iter().find(|(_, present)| *present) {
            return Err(unrecognized(option));
        }

        if kind != StageKind::Inline
            && scheduler != SchedulerType::Local
            && self.resources.walltime.is_none()
        {
            return Err(missing("walltime"));
        }

        if self.max_rounds == 0 {
            return Err(ConfigError::General(format!(
                "Stage '{}': max_rounds must be at least 1.",
                stage
            )));
        }

        Ok(())
    }
}

fn expand_path(raw: &Path, base: &Path) -> Result<PathBuf, ConfigError> {
    let raw_str = raw.to_string_lossy();
    let expanded = shellexpand::full(&raw_str).map_err(|e| {
        ConfigError::General(format!("Failed to expand path '{}': {}", raw_str, e))
    })?;
    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_absolute() {
        path
    } else {
        base.join(path)
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(ConfigError::PathIo {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let base = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };

        let mut config = Self::from_toml_str(&content)?;
        config.resolve_paths(&base)?;
        tracing::debug!(
            "Loaded configuration from {} (working dir {})",
            path.display(),
            config.working_dir.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) -> Result<(), ConfigError> {
        self.working_dir = expand_path(&self.working_dir, base)?;
        if let Some(seed) = &self.seed_dir {
            self.seed_dir = Some(expand_path(seed, base)?);
        }
        self.ledger_file = expand_path(&self.ledger_file, &self.working_dir)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for key in self.stages.keys() {
            if Stage::from_key(key).is_none() {
                return Err(ConfigError::UnknownStage(key.clone()));
            }
        }
        for key in self.seed_stages.keys() {
            match Stage::from_key(key) {
                None => return Err(ConfigError::UnknownStage(key.clone())),
                Some(stage) if !CycleVariant::Seed.contains(stage) => {
                    return Err(ConfigError::General(format!(
                        "Stage '{}' does not run in cycle 0 and cannot appear under [seed_stages].",
                        key
                    )))
                }
                Some(_) => {}
            }
        }
        if self.cases == 0 {
            return Err(ConfigError::General(
                "'cases' must be at least 1.".to_string(),
            ));
        }
        let s = &self.scheduler;
        if !(s.poll_interval_secs > 0.0 && s.poll_interval_secs <= POLL_INTERVAL_LIMIT_SECS) {
            return Err(ConfigError::General(format!(
                "scheduler.poll_interval_secs must be positive and at most {} seconds.",
                POLL_INTERVAL_LIMIT_SECS
            )));
        }
        if !(s.backoff_factor >= 1.0 && s.backoff_factor <= BACKOFF_FACTOR_LIMIT) {
            return Err(ConfigError::General(format!(
                "scheduler.backoff_factor must be between 1.0 and {}.",
                BACKOFF_FACTOR_LIMIT
            )));
        }
        if !(s.max_poll_interval_secs > 0.0 && s.max_poll_interval_secs <= POLL_INTERVAL_LIMIT_SECS)
        {
            return Err(ConfigError::General(format!(
                "scheduler.max_poll_interval_secs must be positive and at most {} seconds.",
                POLL_INTERVAL_LIMIT_SECS
            )));
        }
        Ok(())
    }

    /// Checks every stage of the given variants against its kind's required
    /// and recognized options.
    pub fn validate_stages(&self, variants: &[CycleVariant]) -> Result<(), ConfigError> {
        for variant in variants {
            for stage in variant.stages() {
                self.stage_settings(*stage, *variant)
                    .validate(self.scheduler.kind)?;
            }
        }
        Ok(())
    }

    pub fn stage_settings(&self, stage: Stage, variant: CycleVariant) -> StageSettings {
        let mut raw = self.stages.get(stage.key()).cloned().unwrap_or_default();
        if variant == CycleVariant::Seed {
            if let Some(seed) = self.seed_stages.get(stage.key()) {
                raw.overlay(seed);
            }
        }

        let mut resources = self.hpc.clone();
        resources.merge(&raw.resources());

        StageSettings {
            stage,
            variant,
            per_case: raw
                .per_case
                .unwrap_or_else(|| stage.default_per_case(variant)),
            tolerate_failures: raw.tolerate_failures.unwrap_or(false),
            max_rounds: raw.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            resources,
            raw,
        }
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_file
    }

    pub fn cycle_dir(&self, cycle: CycleIndex) -> PathBuf {
        self.working_dir
            .join(format!("{}{}", dirs::CYCLE_PREFIX, cycle))
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(files::CONFIG)
    }
}
