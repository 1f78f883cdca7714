use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

/// Logs how long a named pipeline stage took.
pub struct Timer {
    stage: String,
    started: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
}

impl Timer {
    pub fn new(stage: &str) -> Self {
        Timer {
            stage: stage.to_owned(),
            started: None,
            elapsed: None,
        }
    }

    /// Create a timer that is already running
    pub fn start_new(stage: &str) -> Self {
        let mut t = Timer::new(stage);
        t.start();
        t
    }

    pub fn start(&mut self) {
        info!("{}: starting", self.stage);

        self.started = Some(Utc::now());
        self.elapsed = None;
    }

    /// Stop the timer and return the elapsed milliseconds
    pub fn stop(&mut self) -> i64 {
        match self.started.take() {
            None => debug!("{}: not running!", self.stage),
            Some(started) => {
                let d = Utc::now() - started;
                self.elapsed = Some(d);
                info!("{} took {} msec", self.stage, d.num_milliseconds());
            }
        }

        self.elapsed_ms()
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed.map_or(0, |d| d.num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::Timer;

    #[test]
    fn stopped_timer_reports_elapsed() {
        let mut t = Timer::start_new("stage");
        let ms = t.stop();
        assert!(ms >= 0);
        assert_eq!(ms, t.elapsed_ms());
    }

    #[test]
    fn never_started_timer_is_zero() {
        let mut t = Timer::new("idle");
        assert_eq!(t.stop(), 0);
    }
}
