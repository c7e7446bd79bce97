// Count-up timer for elapsed-time logic in the simulation.

#[derive(Debug, Clone)]
pub struct Timer {
    pub period: f32,
    pub elapsed: f32,
}

impl Timer {
    /// Create a new timer with a period and an initial elapsed value.
    pub fn new(period: f32, initial_elapsed: f32) -> Self {
        Self {
            period,
            elapsed: initial_elapsed,
        }
    }

    /// Returns true once the elapsed time has reached the period.
    pub fn is_ready(&self) -> bool {
        self.elapsed >= self.period
    }

    /// Returns true only once the elapsed time has gone strictly past the
    /// period. Used where the boundary itself must not trigger.
    pub fn is_expired(&self) -> bool {
        self.elapsed > self.period
    }

    /// Advance the timer by dt (delta time).
    pub fn update(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    /// Wraps the elapsed value back within bounds.
    pub fn wrap(&mut self) {
        self.elapsed %= self.period;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_inclusive_expired_is_strict() {
        let mut timer = Timer::new(1.0, 0.0);
        timer.update(1.0);
        assert!(timer.is_ready());
        assert!(!timer.is_expired());
        timer.update(0.001);
        assert!(timer.is_expired());
    }

    #[test]
    fn wrap_keeps_remainder() {
        let mut timer = Timer::new(0.5, 0.0);
        timer.update(1.2);
        timer.wrap();
        assert!((timer.elapsed - 0.2).abs() < 1e-6);
    }
}
