pub mod config;
pub mod constants;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod model;

pub use config::Config;
pub use ledger::Ledger;
