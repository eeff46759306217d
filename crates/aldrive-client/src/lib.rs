pub mod error;
pub mod gateway;
pub mod resources;
pub mod runner;
pub mod wait;

pub use error::ClientError;
pub use gateway::{gateway_for, JobSpec, SchedulerGateway};
pub use wait::{Clock, JobWaitCoordinator, PollPolicy, SystemClock, WaitEvent, WaitReport};
