use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observes events manually to report a rate over a sliding window.
pub struct RateCounter {
    observations: Mutex<VecDeque<Instant>>,
    window: Duration,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        Self { observations: Mutex::new(VecDeque::new()), window }
    }

    pub fn observe(&self) {
        let mut observations = self.observations.lock().expect("ratecounter lock");
        observations.push_back(Instant::now());
        Self::truncate(&mut observations, self.window);
    }

    /// Current rate in events per second. Truncates first so the rate
    /// decays even without new observations.
    pub fn rate(&self) -> f64 {
        let mut observations = self.observations.lock().expect("ratecounter lock");
        Self::truncate(&mut observations, self.window);
        observations.len() as f64 / self.window.as_secs_f64()
    }

    fn truncate(observations: &mut VecDeque<Instant>, window: Duration) {
        // checked_sub: the process may be younger than the window
        let Some(cutoff) = Instant::now().checked_sub(window) else { return };
        while observations.front().is_some_and(|t| *t < cutoff) {
            observations.pop_front();
        }
    }
}
