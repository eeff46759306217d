use aldrive_core::config::Config;
use aldrive_core::model::CycleIndex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TRACE_FILE: &str = "trace.log";
pub const CONFIG_FILE: &str = "aldrive.toml";

/// Stage tables for a run on the local scheduler where every stage appends
/// `<key> <cycle> [<case>]` to the trace file.
pub fn default_stage_tables() -> BTreeMap<&'static str, String> {
    let trace = "{working_dir}/trace.log";
    let mut stages = BTreeMap::new();
    stages.insert(
        "build-matrix",
        format!("job = \"echo build-matrix {{cycle}} >> {trace}\""),
    );
    stages.insert(
        "solve-matrix",
        format!(
            "job = \"echo solve-matrix {{cycle}} >> {trace}\"\nafter = \"echo solve-matrix-after {{cycle}} >> {trace}\""
        ),
    );
    stages.insert(
        "run-md",
        format!("job = \"echo run-md {{cycle}} {{case}} >> {trace}\""),
    );
    stages.insert(
        "post-process-md",
        format!("run = \"echo post-process-md {{cycle}} {{case}} >> {trace}\""),
    );
    stages.insert(
        "extract-clusters",
        format!("run = \"echo extract-clusters {{cycle}} >> {trace}\""),
    );
    stages.insert(
        "cluster-energies",
        format!("job = \"echo cluster-energies {{cycle}} >> {trace}\""),
    );
    stages.insert(
        "select-clusters",
        format!("run = \"echo select-clusters {{cycle}} >> {trace}\""),
    );
    stages.insert(
        "setup-reference",
        format!("run = \"echo setup-reference {{cycle}} >> {trace}\""),
    );
    stages.insert(
        "launch-reference",
        format!("job = \"echo launch-reference {{cycle}} {{case}} >> {trace}\""),
    );
    stages.insert(
        "collect-reference",
        format!("check = \"true\"\njob = \"echo collect-reference {{cycle}} {{unit}} >> {trace}\""),
    );
    stages.insert(
        "finalize",
        format!("run = \"echo finalize {{cycle}} >> {trace}\""),
    );
    stages
}

/// A temporary working directory with an `aldrive.toml` for the local
/// scheduler.
pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub config_path: PathBuf,
    pub cases: u32,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_stages(&[])
    }

    /// Replaces the bodies of the named stage tables. An empty body drops
    /// the table entirely.
    pub fn with_stages(overrides: &[(&str, &str)]) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("aldrive-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let cache_dir = root.join("cache");
        fs::create_dir_all(&cache_dir).expect("Failed to create cache dir");
        fs::create_dir_all(root.join("ALC-0_BASEFILES")).expect("Failed to create seed dir");

        let ctx = Self {
            _temp_dir: temp_dir,
            config_path: root.join(CONFIG_FILE),
            root,
            cache_dir,
            cases: 2,
        };
        ctx.write_config(overrides, "");
        ctx
    }

    pub fn write_config(&self, overrides: &[(&str, &str)], extra: &str) {
        let mut stages = default_stage_tables();
        for (key, body) in overrides {
            let known = stages.keys().copied().find(|k| k == key);
            match known {
                Some(k) if body.is_empty() => {
                    stages.remove(k);
                }
                Some(k) => {
                    stages.insert(k, body.to_string());
                }
                None => panic!("unknown stage key in test override: {}", key),
            }
        }

        let mut content = format!(
            "working_dir = \".\"\nseed_dir = \"ALC-0_BASEFILES\"\ncases = {}\n\n[scheduler]\nkind = \"local\"\npoll_interval_secs = 0.01\nmax_poll_interval_secs = 0.05\n\n[logging]\nmax_files = 5\n\n",
            self.cases
        );
        content.push_str(extra);
        for (key, body) in &stages {
            content.push_str(&format!("[stages.{}]\n{}\n\n", key, body));
        }
        fs::write(&self.config_path, content).expect("Failed to write test config");
    }

    pub fn load_config(&self) -> Config {
        Config::load(&self.config_path).expect("Failed to load test config")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("restart.dat")
    }

    pub fn read_ledger(&self) -> String {
        fs::read_to_string(self.ledger_path()).unwrap_or_default()
    }

    pub fn write_ledger(&self, content: &str) {
        fs::write(self.ledger_path(), content).expect("Failed to write ledger");
    }

    pub fn cycle_dir(&self, cycle: u32) -> PathBuf {
        self.root.join(format!("ALC-{}", CycleIndex(cycle)))
    }

    pub fn trace_path(&self) -> PathBuf {
        self.root.join(TRACE_FILE)
    }

    pub fn trace_lines(&self) -> Vec<String> {
        fs::read_to_string(self.trace_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn clear_trace(&self) {
        let _ = fs::remove_file(self.trace_path());
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
