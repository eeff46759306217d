pub mod ledger {
    pub const FILE_NAME: &str = "restart.dat";
    pub const CYCLE_PREFIX: &str = "ALC: ";
    pub const COMPLETE_SUFFIX: &str = ": COMPLETE";
}

pub mod dirs {
    pub const CYCLE_PREFIX: &str = "ALC-";
    pub const JOBS: &str = "jobs";
    pub const LOGS: &str = "logs";
}

pub mod files {
    pub const CONFIG: &str = "aldrive.toml";
    pub const JOB_SCRIPT_EXT: &str = "sh";
    pub const JOB_OUTPUT_EXT: &str = "out";
}

pub mod env {
    pub const LOG_LEVEL: &str = "ALDRIVE_LOG_LEVEL";
    pub const LOG_TEE: &str = "ALDRIVE_LOG_TEE";
    pub const CYCLE: &str = "ALC_CYCLE";
    pub const CASE: &str = "ALC_CASE";
    pub const STAGE: &str = "ALC_STAGE";
    pub const CYCLE_DIR: &str = "ALC_CYCLE_DIR";
    pub const PREV_CYCLE_DIR: &str = "ALC_PREV_CYCLE_DIR";
    pub const WORKING_DIR: &str = "ALC_WORKING_DIR";
    pub const SEED_DIR: &str = "ALC_SEED_DIR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_constants() {
        assert_eq!(ledger::FILE_NAME, "restart.dat");
        assert_eq!(ledger::CYCLE_PREFIX, "ALC: ");
        assert_eq!(ledger::COMPLETE_SUFFIX, ": COMPLETE");
    }

    #[test]
    fn test_dir_constants() {
        assert_eq!(dirs::CYCLE_PREFIX, "ALC-");
        assert_eq!(dirs::JOBS, "jobs");
    }
}
