use super::physics::FoodBodyHandle;
use super::timer::Timer;

/// Transient consumable. Ages from the moment it is spawned; once past the
/// configured maximum age it dies even if never eaten. No way back from dead.
pub struct Food {
    pub id: u64,
    pub handle: FoodBodyHandle,
    pub value: f32,
    pub dead: bool,
    age: Timer,
}

impl Food {
    pub fn new(handle: FoodBodyHandle, value: f32) -> Self {
        Self {
            id: handle.id,
            handle,
            value,
            dead: false,
            // Placeholder period; the world arms it with the configured max
            // age on the first update.
            age: Timer::new(f32::MAX, 0.0),
        }
    }

    /// Age by dt and expire strictly past `max_age` seconds.
    pub fn update(&mut self, dt: f32, max_age: f32) {
        if self.dead {
            return;
        }
        self.age.period = max_age;
        self.age.update(dt);
        if self.age.is_expired() {
            self.dead = true;
        }
    }

    pub fn be_eaten(&mut self) {
        self.dead = true;
    }
}
