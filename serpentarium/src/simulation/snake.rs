use super::food::Food;
use super::physics::{PhysicsAdapter, SnakeBodyHandle};
use glam::Vec2;

/// A controlled organism: a physical chain plus an energy budget.
///
/// State machine: ALIVE -> (energy <= 0) -> DEAD -> (reset) -> ALIVE.
/// No other transitions.
pub struct Snake {
    /// Stable for the snake's lifetime within a generation; equals the head
    /// body id, which the physics adapter reproduces across generations.
    pub id: u64,
    pub body: SnakeBodyHandle,
    pub energy_level: f32,
    pub energy_intake: f32,
    pub dead: bool,
    initial_energy: f32,
}

impl Snake {
    pub fn new(body: SnakeBodyHandle, initial_energy: f32) -> Self {
        Self {
            id: body.head_id,
            body,
            energy_level: initial_energy,
            energy_intake: 0.0,
            dead: false,
            initial_energy,
        }
    }

    pub fn color(&self) -> [u8; 3] {
        self.body.color
    }

    /// Steering applied directly to the head velocity. The chain follows
    /// through the adapter's constraints.
    pub fn set_velocity(&self, physics: &mut PhysicsAdapter, velocity: Vec2) {
        physics.set_velocity(self.body.head, velocity);
    }

    pub fn velocity(&self, physics: &PhysicsAdapter) -> Vec2 {
        physics.velocity(self.body.head).unwrap_or(Vec2::ZERO)
    }

    /// Per-tick upkeep: a flat base cost plus a cost proportional to speed.
    /// Flags death the instant the level reaches zero. No-op when dead.
    pub fn update(&mut self, physics: &PhysicsAdapter, base_cost: f32, velocity_cost: f32) {
        if self.dead {
            return;
        }

        let speed = self.velocity(physics).length();
        self.energy_level -= base_cost + velocity_cost * speed;

        if self.energy_level <= 0.0 {
            self.dead = true;
        }
    }

    /// Transfer the food's value into this snake. Caller guarantees neither
    /// party is already dead.
    pub fn eat(&mut self, food: &mut Food) {
        self.energy_level += food.value;
        self.energy_intake += food.value;
        food.be_eaten();
    }

    /// Restore the economy for reuse in the next generation. The physical
    /// body is untouched; the caller repositions it separately.
    pub fn reset(&mut self) {
        self.energy_intake = 0.0;
        self.energy_level = self.initial_energy;
        self.dead = false;
    }
}
