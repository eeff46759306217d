//! Per-invocation session logs.
//!
//! Every `aldrive` invocation writes one file under
//! `$XDG_CACHE_HOME/aldrive/logs`, named after its start time and what it
//! was asked to do (`aldrive_2024-05-01_09-30-00_run-ALC-3-4.log`), so the
//! log of a given cycle can be found again after the batch jobs are long
//! gone. `aldrive.log` next to the directory points at the newest session.

use crate::config::LoggingConfig;
use crate::constants::{dirs, env as env_vars};
use crate::errors::ConfigError;
use chrono::Local;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const APP: &str = "aldrive";
const SESSION_PREFIX: &str = "aldrive_";
const SESSION_EXT: &str = "log";
const LATEST_LINK: &str = "aldrive.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    /// Mirror the session log on stderr.
    pub tee: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            tee: false,
        }
    }
}

impl LogSettings {
    /// `-v` selects debug and `-vv` trace. Without it `ALDRIVE_LOG_LEVEL`
    /// applies, then info.
    pub fn resolve(verbose: u8, env_level: Option<&str>, tee: bool) -> Self {
        let level = match verbose {
            0 => env_level
                .and_then(|l| Level::from_str(l.trim()).ok())
                .unwrap_or(Level::INFO),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self { level, tee }
    }

    pub fn from_env(verbose: u8) -> Self {
        let env_level = env::var(env_vars::LOG_LEVEL).ok();
        Self::resolve(
            verbose,
            env_level.as_deref(),
            env::var_os(env_vars::LOG_TEE).is_some(),
        )
    }

    /// `RUST_LOG` overrides the resolved level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

struct LocalClock;

impl FormatTime for LocalClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Keeps a session label usable as part of a file name.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

fn session_file_name(label: &str) -> String {
    format!(
        "{}{}_{}.{}",
        SESSION_PREFIX,
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        sanitize_label(label),
        SESSION_EXT
    )
}

fn is_session_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SESSION_PREFIX))
        && path.extension().is_some_and(|e| e == SESSION_EXT)
}

/// Deletes session logs beyond `max_files` (oldest first) and those not
/// touched for `max_age_days`. Zero disables either limit. Returns how many
/// files were removed.
fn prune_sessions(
    log_dir: &Path,
    limits: &LoggingConfig,
    now: SystemTime,
) -> Result<usize, ConfigError> {
    let mut sessions: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| is_session_log(p))
        .filter_map(|p| Some((fs::metadata(&p).ok()?.modified().ok()?, p)))
        .collect();
    sessions.sort();

    let excess = if limits.max_files > 0 {
        sessions.len().saturating_sub(limits.max_files)
    } else {
        0
    };
    let max_age =
        (limits.max_age_days > 0).then(|| Duration::from_secs(limits.max_age_days * 86_400));

    let mut removed = 0;
    for (i, (modified, path)) in sessions.iter().enumerate() {
        let expired = max_age
            .is_some_and(|limit| now.duration_since(*modified).is_ok_and(|age| age > limit));
        if (i < excess || expired) && fs::remove_file(path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn point_latest_at(cache_home: &Path, file_name: &str) {
    let link = cache_home.join(LATEST_LINK);
    let _ = fs::remove_file(&link);
    #[cfg(unix)]
    {
        let _ = std::os::unix::fs::symlink(Path::new(dirs::LOGS).join(file_name), &link);
    }
}

/// Starts the session log for one invocation and returns its path.
///
/// `label` names what the invocation does, e.g. `run-ALC-0-1`. A subscriber
/// that is already installed (several sessions in one test process) stays in
/// place.
pub fn init_session_logger(
    settings: &LogSettings,
    label: &str,
    limits: &LoggingConfig,
) -> Result<PathBuf, ConfigError> {
    let cache_home = xdg::BaseDirectories::with_prefix(APP)
        .get_cache_home()
        .ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find cache home directory",
            ))
        })?;
    let log_dir = cache_home.join(dirs::LOGS);
    fs::create_dir_all(&log_dir)?;
    let pruned = prune_sessions(&log_dir, limits, SystemTime::now())?;

    let file_name = session_file_name(label);
    let log_path = log_dir.join(&file_name);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_timer(LocalClock)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);
    let tee_layer = settings.tee.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_timer(LocalClock)
            .with_target(false)
    });
    let _ = tracing_subscriber::registry()
        .with(settings.filter())
        .with(file_layer)
        .with(tee_layer)
        .try_init();

    point_latest_at(&cache_home, &file_name);
    tracing::info!(
        "aldrive {} session '{}' (pid {}) in {}",
        env!("CARGO_PKG_VERSION"),
        label,
        std::process::id(),
        env::current_dir().unwrap_or_default().display()
    );
    if pruned > 0 {
        tracing::debug!("Pruned {} old session log(s)", pruned);
    }
    Ok(log_path)
}

/// Fallback when no session file can be opened.
pub fn init_stderr_logger(settings: &LogSettings) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_writer(std::io::stderr)
        .with_timer(LocalClock)
        .with_target(false)
        .try_init();
}

fn shell_word(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Debug-logs a scheduler or shell command as it could be pasted into a
/// terminal, prefixed with its working directory when one is set.
pub fn log_command(command: &Command) {
    let mut line = shell_word(&command.get_program().to_string_lossy());
    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&shell_word(&arg.to_string_lossy()));
    }
    match command.get_current_dir() {
        Some(dir) => tracing::debug!("[CMD] (cd {}) {}", dir.display(), line),
        None => tracing::debug!("[CMD] {}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(modified).unwrap();
        path
    }

    #[test]
    fn test_level_resolution() {
        assert_eq!(LogSettings::resolve(0, None, false).level, Level::INFO);
        assert_eq!(LogSettings::resolve(0, Some("debug"), false).level, Level::DEBUG);
        assert_eq!(LogSettings::resolve(0, Some("WARN"), false).level, Level::WARN);
        assert_eq!(LogSettings::resolve(0, Some("loud"), false).level, Level::INFO);
        assert_eq!(LogSettings::resolve(1, Some("error"), false).level, Level::DEBUG);
        assert_eq!(LogSettings::resolve(3, None, true).level, Level::TRACE);
        assert!(LogSettings::resolve(0, None, true).tee);
    }

    #[test]
    fn test_session_names_carry_the_label() {
        let name = session_file_name("run-ALC-3-4");
        assert!(name.starts_with(SESSION_PREFIX));
        assert!(name.ends_with("_run-ALC-3-4.log"));
        assert!(is_session_log(Path::new(&name)));
        assert_eq!(sanitize_label("run ALC 0/1"), "run-ALC-0-1");
        assert_eq!(sanitize_label("//"), "session");
    }

    #[test]
    fn test_prune_keeps_the_newest_sessions() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let oldest = touch(dir.path(), "aldrive_a_run-ALC-0.log", now - DAY * 3);
        let older = touch(dir.path(), "aldrive_b_run-ALC-1.log", now - DAY * 2);
        let newer = touch(dir.path(), "aldrive_c_run-ALC-2.log", now - DAY);
        let newest = touch(dir.path(), "aldrive_d_status.log", now);
        let ledger = touch(dir.path(), "restart.dat", now - DAY * 9);

        let limits = LoggingConfig {
            max_files: 2,
            max_age_days: 0,
        };
        assert_eq!(prune_sessions(dir.path(), &limits, now).unwrap(), 2);

        assert!(!oldest.exists());
        assert!(!older.exists());
        assert!(newer.exists());
        assert!(newest.exists());
        assert!(ledger.exists(), "only session logs are pruned");
    }

    #[test]
    fn test_prune_drops_stale_sessions() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let fresh = touch(dir.path(), "aldrive_x_run-ALC-5.log", now - DAY);
        let stale = touch(dir.path(), "aldrive_y_run-ALC-1.log", now - DAY * 40);
        let other = touch(dir.path(), "aldrive_notes.txt", now - DAY * 40);

        let limits = LoggingConfig {
            max_files: 0,
            max_age_days: 30,
        };
        assert_eq!(prune_sessions(dir.path(), &limits, now).unwrap(), 1);

        assert!(fresh.exists());
        assert!(!stale.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_shell_words_are_quoted_when_needed() {
        assert_eq!(shell_word("--parsable"), "--parsable");
        assert_eq!(shell_word("--job-name=ALC-1 run"), "'--job-name=ALC-1 run'");
        assert_eq!(shell_word(""), "''");
        assert_eq!(shell_word("it's"), r"'it'\''s'");
    }
}
