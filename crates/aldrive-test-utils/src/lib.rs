pub mod clock;
pub mod gateway;
pub mod harness;

pub use clock::ManualClock;
pub use gateway::{PollStep, ScriptedGateway};
pub use harness::TestContext;
