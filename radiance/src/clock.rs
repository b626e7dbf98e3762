use std::time::{Duration, Instant};

/// Source of frame timing, in seconds.
pub trait FrameClock {
    /// Time between the two most recent ticks.
    fn delta_time(&self) -> f32;
    /// Time since reset, excluding stopped periods.
    fn total_time(&self) -> f32;
}

/// Wall clock frame timer.
#[derive(Debug, Clone)]
pub struct Timer {
    base: Instant,
    previous: Instant,
    current: Instant,
    paused: Duration,
    stopped_at: Option<Instant>,
    delta: f32,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            base: now,
            previous: now,
            current: now,
            paused: Duration::ZERO,
            stopped_at: None,
            delta: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Samples the clock. Call once per frame.
    pub fn tick(&mut self) {
        if self.stopped_at.is_some() {
            self.delta = 0.0;
            return;
        }

        self.current = Instant::now();
        self.delta = self.current.duration_since(self.previous).as_secs_f32();
        self.previous = self.current;
    }

    pub fn stop(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    pub fn start(&mut self) {
        if let Some(stopped_at) = self.stopped_at.take() {
            let now = Instant::now();
            self.paused += now.duration_since(stopped_at);
            self.previous = now;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for Timer {
    fn delta_time(&self) -> f32 {
        self.delta
    }

    fn total_time(&self) -> f32 {
        let end = self.stopped_at.unwrap_or(self.current);
        end.duration_since(self.base).saturating_sub(self.paused).as_secs_f32()
    }
}

/// Clock advanced by hand, for tests and offline rendering.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct ManualClock {
    pub delta: f32,
    pub total: f32,
}

impl ManualClock {
    pub fn advance(&mut self, delta: f32) {
        self.delta = delta;
        self.total += delta;
    }
}

impl FrameClock for ManualClock {
    fn delta_time(&self) -> f32 {
        self.delta
    }

    fn total_time(&self) -> f32 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn timer_measures_ticks() {
        let mut timer = Timer::new();
        thread::sleep(Duration::from_millis(5));
        timer.tick();
        assert!(timer.delta_time() > 0.0);
        assert!(timer.total_time() >= timer.delta_time() - f32::EPSILON);
    }

    #[test]
    fn stopped_timer_freezes() {
        let mut timer = Timer::new();
        timer.tick();
        timer.stop();
        assert!(timer.is_stopped());
        let frozen = timer.total_time();
        thread::sleep(Duration::from_millis(5));
        timer.tick();
        assert_eq!(timer.delta_time(), 0.0);
        assert_eq!(timer.total_time(), frozen);

        timer.start();
        assert!(!timer.is_stopped());
        timer.tick();
        assert!(timer.total_time() >= frozen);
        assert!(timer.total_time() < frozen + 0.5);
    }

    #[test]
    fn manual_clock() {
        let mut clock = ManualClock::default();
        clock.advance(0.5);
        clock.advance(0.25);
        assert_eq!(clock.delta_time(), 0.25);
        assert_eq!(clock.total_time(), 0.75);
    }
}
