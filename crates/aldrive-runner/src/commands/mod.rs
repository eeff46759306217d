use aldrive_core::config::Config;
use std::path::Path;

use crate::error::CliError;

pub mod run;
pub mod status;

pub fn load_config(path: &Path) -> Result<Config, CliError> {
    let config = Config::load(path)?;
    tracing::debug!(
        "Loaded configuration from {} (working dir {})",
        path.display(),
        config.working_dir.display()
    );
    Ok(config)
}
