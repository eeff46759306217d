use aldrive_client::Clock;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Clock whose `sleep` returns immediately and only advances virtual time.
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock lock").clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("clock lock")
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().expect("clock lock") += duration;
        self.sleeps.lock().expect("clock lock").push(duration);
    }
}
