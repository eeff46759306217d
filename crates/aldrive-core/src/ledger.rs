//! Append-only checkpoint ledger.
//!
//! Every line is either a cycle marker (`ALC: <n>`) or a stage completion
//! (`<LABEL>: COMPLETE`). State is rebuilt by replaying the whole file: a
//! cycle marker starts a fresh set of stage flags, completions accumulate
//! until the next marker. Lines are only ever appended; the single exception
//! is dropping a damaged tail left by an interrupted write.
//!
//! A last line without its newline is damaged unless it is a complete stage
//! line such as `THIS_ALC: COMPLETE` (a hand edit, or a write cut off right
//! before the newline). A torn write cannot produce one of those, since the
//! `: COMPLETE` suffix comes last. An unterminated cycle marker is never
//! trusted: `ALC: 1` may be the start of `ALC: 12`.

use crate::constants::ledger as consts;
use crate::errors::LedgerError;
use crate::model::{CycleIndex, CycleVariant, Stage};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerLine {
    CycleStart(CycleIndex),
    StageComplete(Stage),
}

impl LedgerLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix(consts::CYCLE_PREFIX) {
            return rest.trim().parse().ok().map(LedgerLine::CycleStart);
        }
        let label = line.strip_suffix(consts::COMPLETE_SUFFIX)?;
        Stage::from_label(label.trim()).map(LedgerLine::StageComplete)
    }

    pub fn render(&self) -> String {
        match self {
            LedgerLine::CycleStart(cycle) => format!("{}{}", consts::CYCLE_PREFIX, cycle),
            LedgerLine::StageComplete(stage) => {
                format!("{}{}", stage.label(), consts::COMPLETE_SUFFIX)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    last_cycle: Option<CycleIndex>,
    completed: BTreeSet<Stage>,
}

impl LedgerState {
    pub fn last_cycle(&self) -> Option<CycleIndex> {
        self.last_cycle
    }

    pub fn completed(&self) -> &BTreeSet<Stage> {
        &self.completed
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// True when the last recorded cycle has every stage of its variant
    /// marked complete.
    pub fn last_cycle_finished(&self) -> bool {
        self.last_cycle
            .is_some_and(|c| CycleVariant::for_cycle(c).is_complete(&self.completed))
    }

    fn apply(&mut self, line: LedgerLine) {
        match line {
            LedgerLine::CycleStart(cycle) => {
                self.last_cycle = Some(cycle);
                self.completed.clear();
            }
            LedgerLine::StageComplete(stage) => {
                if self.last_cycle.is_some() {
                    self.completed.insert(stage);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamagedLine {
    pub line_number: usize,
    pub offset: u64,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerReplay {
    pub state: LedgerState,
    /// Byte length up to and including the last well-formed line.
    pub valid_len: u64,
    pub total_len: u64,
    pub damaged: Vec<DamagedLine>,
    /// The last line was accepted without its newline.
    pub missing_newline: bool,
}

impl LedgerReplay {
    pub fn has_damaged_tail(&self) -> bool {
        self.valid_len < self.total_len
    }

    pub fn skipped_lines(&self) -> impl Iterator<Item = &DamagedLine> {
        self.damaged.iter().filter(|d| d.offset < self.valid_len)
    }

    pub fn tail_lines(&self) -> impl Iterator<Item = &DamagedLine> {
        self.damaged.iter().filter(|d| d.offset >= self.valid_len)
    }
}

fn complete_stage_line(text: &str) -> Option<LedgerLine> {
    match LedgerLine::parse(text)? {
        line @ LedgerLine::StageComplete(_) if line.render() == text => Some(line),
        _ => None,
    }
}

pub fn replay(content: &[u8]) -> LedgerReplay {
    let mut result = LedgerReplay {
        total_len: content.len() as u64,
        ..Default::default()
    };

    let mut offset = 0usize;
    let mut line_number = 0usize;
    while offset < content.len() {
        line_number += 1;
        let rest = &content[offset..];
        let (raw, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => (&rest[..pos], true),
            None => (rest, false),
        };
        let end = offset + raw.len() + usize::from(terminated);

        let text = std::str::from_utf8(raw).ok();
        let parsed = if terminated {
            text.and_then(|t| {
                if t.trim().is_empty() {
                    Some(None)
                } else {
                    LedgerLine::parse(t).map(Some)
                }
            })
        } else {
            text.and_then(complete_stage_line).map(Some)
        };

        match parsed {
            Some(line) => {
                if let Some(line) = line {
                    result.state.apply(line);
                }
                result.valid_len = end as u64;
                result.missing_newline = !terminated;
            }
            None => result.damaged.push(DamagedLine {
                line_number,
                offset: offset as u64,
                content: String::from_utf8_lossy(raw).to_string(),
            }),
        }
        offset = end;
    }

    result
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    state: LedgerState,
}

impl Ledger {
    /// Loads the ledger at `path`, or starts an empty one if the file does not
    /// exist yet. The file itself is only created by the first append.
    /// A damaged tail is truncated away before returning.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let replayed = match Self::inspect(path)? {
            Some(replayed) => replayed,
            None => {
                tracing::info!(
                    "No ledger found at {}. Starting a new run.",
                    path.display()
                );
                return Ok(Self {
                    path: path.to_path_buf(),
                    state: LedgerState::default(),
                });
            }
        };

        for line in replayed.skipped_lines() {
            tracing::warn!(
                "Ignoring unrecognized ledger line {} in {}: {:?}",
                line.line_number,
                path.display(),
                line.content
            );
        }

        if replayed.has_damaged_tail() {
            for line in replayed.tail_lines() {
                tracing::warn!(
                    "Dropping damaged ledger line {} in {}: {:?}",
                    line.line_number,
                    path.display(),
                    line.content
                );
            }
            tracing::warn!(
                "Truncating ledger {} from {} to {} bytes (last well-formed line).",
                path.display(),
                replayed.total_len,
                replayed.valid_len
            );
            truncate(path, replayed.valid_len)?;
        } else if replayed.missing_newline {
            tracing::warn!(
                "Ledger {} does not end with a newline; terminating its last line.",
                path.display()
            );
            terminate_last_line(path)?;
        }

        tracing::debug!(
            "Loaded ledger {}: last cycle {:?}, {} stage(s) complete",
            path.display(),
            replayed.state.last_cycle,
            replayed.state.completed.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: replayed.state,
        })
    }

    /// Read-only replay; never modifies the file.
    pub fn inspect(path: &Path) -> Result<Option<LedgerReplay>, LedgerError> {
        match fs_err::read(path) {
            Ok(content) => Ok(Some(replay(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LedgerError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn last_cycle(&self) -> Option<CycleIndex> {
        self.state.last_cycle
    }

    pub fn completed_stages(&self) -> &BTreeSet<Stage> {
        &self.state.completed
    }

    pub fn is_stage_complete(&self, stage: Stage) -> bool {
        self.state.is_complete(stage)
    }

    pub fn record_cycle_start(&mut self, cycle: CycleIndex) -> Result<(), LedgerError> {
        let line = LedgerLine::CycleStart(cycle);
        self.append(line)?;
        self.state.apply(line);
        Ok(())
    }

    pub fn record_stage_complete(&mut self, stage: Stage) -> Result<(), LedgerError> {
        if self.state.last_cycle.is_none() {
            return Err(LedgerError::NoActiveCycle(stage));
        }
        let line = LedgerLine::StageComplete(stage);
        self.append(line)?;
        self.state.apply(line);
        Ok(())
    }

    /// Clears in-memory stage flags. On-disk history is left for audit.
    pub fn reset_for_new_lineage(&mut self) {
        self.state.completed.clear();
    }

    fn append(&self, line: LedgerLine) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(format!("{}\n", line.render()).as_bytes())
            .map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        tracing::debug!("ledger += {}", line.render());
        Ok(())
    }
}

fn terminate_last_line(path: &Path) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs_err::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(b"\n").map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

fn truncate(path: &Path, len: u64) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = fs_err::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(io_err)?;
    file.set_len(len).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn stages(list: &[Stage]) -> BTreeSet<Stage> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_missing_file_is_a_fresh_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");

        let ledger = Ledger::load(&path).unwrap();
        assert_eq!(ledger.last_cycle(), None);
        assert!(ledger.completed_stages().is_empty());
        assert!(!path.exists(), "loading must not create the ledger");
    }

    #[test]
    fn test_records_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.record_cycle_start(CycleIndex(0)).unwrap();
        ledger.record_stage_complete(Stage::BuildMatrix).unwrap();
        ledger.record_stage_complete(Stage::SolveMatrix).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nBUILD_AMAT: COMPLETE\nSOLVE_AMAT: COMPLETE\n"
        );

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.last_cycle(), Some(CycleIndex(0)));
        assert_eq!(
            reloaded.completed_stages(),
            &stages(&[Stage::BuildMatrix, Stage::SolveMatrix])
        );
    }

    #[test]
    fn test_latest_cycle_marker_wins() {
        let replayed = replay(
            b"ALC: 0\nBUILD_AMAT: COMPLETE\nTHIS_ALC: COMPLETE\nALC: 1\nBUILD_AMAT: COMPLETE\n",
        );
        assert_eq!(replayed.state.last_cycle(), Some(CycleIndex(1)));
        assert_eq!(replayed.state.completed(), &stages(&[Stage::BuildMatrix]));
        assert!(!replayed.has_damaged_tail());
    }

    #[test]
    fn test_duplicate_completion_is_harmless() {
        let replayed = replay(b"ALC: 2\nRUN_MD: COMPLETE\nRUN_MD: COMPLETE\n");
        assert_eq!(replayed.state.completed(), &stages(&[Stage::RunMd]));
    }

    #[test]
    fn test_completion_before_any_marker_is_ignored() {
        let replayed = replay(b"BUILD_AMAT: COMPLETE\nALC: 0\n");
        assert_eq!(replayed.state.last_cycle(), Some(CycleIndex(0)));
        assert!(replayed.state.completed().is_empty());
    }

    #[test]
    fn test_truncated_tail_is_repaired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        fs::write(&path, "ALC: 0\nBUILD_AMAT: COMPLETE\nSOLVE_AM").unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        assert_eq!(ledger.completed_stages(), &stages(&[Stage::BuildMatrix]));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nBUILD_AMAT: COMPLETE\n"
        );

        ledger.record_stage_complete(Stage::SolveMatrix).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nBUILD_AMAT: COMPLETE\nSOLVE_AMAT: COMPLETE\n"
        );
    }

    #[test]
    fn test_unterminated_marker_is_not_trusted() {
        let replayed = replay(b"ALC: 0\nTHIS_ALC: COMPLETE\nALC: 1");
        assert_eq!(replayed.state.last_cycle(), Some(CycleIndex(0)));
        assert!(replayed.has_damaged_tail());
        assert_eq!(replayed.valid_len, 26);
    }

    #[test]
    fn test_complete_stage_line_without_newline_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        fs::write(&path, "ALC: 0\nALL_VASPJOBS: COMPLETE\nTHIS_ALC: COMPLETE").unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        assert!(ledger.is_stage_complete(Stage::Finalize));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nALL_VASPJOBS: COMPLETE\nTHIS_ALC: COMPLETE\n"
        );

        ledger.record_cycle_start(CycleIndex(1)).unwrap();
        assert!(fs::read_to_string(&path)
            .unwrap()
            .ends_with("THIS_ALC: COMPLETE\nALC: 1\n"));
    }

    #[test]
    fn test_partial_stage_line_without_newline_is_damaged() {
        let replayed = replay(b"ALC: 0\nBUILD_AMAT: COMPLETE\nSOLVE_AMAT: COMPLET");
        assert!(replayed.has_damaged_tail());
        assert!(!replayed.missing_newline);
        let padded = replay(b"ALC: 0\n BUILD_AMAT: COMPLETE");
        assert!(padded.has_damaged_tail(), "only an exact line is accepted");
    }

    #[test]
    fn test_garbage_in_the_middle_is_skipped_not_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        let content = "ALC: 0\n#### noise\nBUILD_AMAT: COMPLETE\n";
        fs::write(&path, content).unwrap();

        let ledger = Ledger::load(&path).unwrap();
        assert_eq!(ledger.completed_stages(), &stages(&[Stage::BuildMatrix]));
        assert_eq!(fs::read_to_string(&path).unwrap(), content);

        let replayed = Ledger::inspect(&path).unwrap().unwrap();
        assert_eq!(replayed.skipped_lines().count(), 1);
        assert_eq!(replayed.tail_lines().count(), 0);
    }

    #[test]
    fn test_garbage_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        fs::write(&path, "ALC: 0\nBUILD_AMAT: COMPLETE\n\u{0}\u{0}\u{0}\n").unwrap();

        let ledger = Ledger::load(&path).unwrap();
        assert_eq!(ledger.completed_stages(), &stages(&[Stage::BuildMatrix]));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nBUILD_AMAT: COMPLETE\n"
        );
    }

    #[test]
    fn test_inspect_does_not_repair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        fs::write(&path, "ALC: 0\nBUILD").unwrap();

        let replayed = Ledger::inspect(&path).unwrap().unwrap();
        assert!(replayed.has_damaged_tail());
        assert_eq!(fs::read_to_string(&path).unwrap(), "ALC: 0\nBUILD");
    }

    #[test]
    fn test_completed_set_never_shrinks_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");
        let order = CycleVariant::Seed.stages();

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.record_cycle_start(CycleIndex(0)).unwrap();

        let mut previous = BTreeSet::new();
        for stage in order {
            ledger.record_stage_complete(*stage).unwrap();
            ledger = Ledger::load(&path).unwrap();
            assert!(ledger.completed_stages().is_superset(&previous));
            previous = ledger.completed_stages().clone();
        }
        assert!(ledger.state().last_cycle_finished());
    }

    #[test]
    fn test_reset_for_new_lineage_keeps_disk_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.record_cycle_start(CycleIndex(0)).unwrap();
        ledger.record_stage_complete(Stage::BuildMatrix).unwrap();
        ledger.reset_for_new_lineage();
        assert!(ledger.completed_stages().is_empty());

        ledger.record_cycle_start(CycleIndex(1)).unwrap();
        assert_eq!(ledger.last_cycle(), Some(CycleIndex(1)));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ALC: 0\nBUILD_AMAT: COMPLETE\nALC: 1\n"
        );
    }

    #[test]
    fn test_stage_without_cycle_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.dat");

        let mut ledger = Ledger::load(&path).unwrap();
        let err = ledger.record_stage_complete(Stage::BuildMatrix);
        assert!(matches!(err, Err(LedgerError::NoActiveCycle(Stage::BuildMatrix))));
        assert!(!path.exists());
    }
}
