pub mod food;
pub mod physics;
pub mod snake;
mod timer;
mod world;

// Re-export key types for easier imports
pub use food::Food;
pub use physics::{BodyKey, BodyKind, PhysicsAdapter, SnakeBodyHandle};
pub use snake::Snake;
pub use timer::Timer;
pub use world::{EndReason, GenerationEnded, World, WorldStatus};

// Time constants
pub const TICK_RATE: f32 = 60.0;
pub const TICK_INTERVAL: f32 = 1.0 / TICK_RATE;

// Physics constants
pub const HEAD_FRICTION_AIR: f32 = 0.1;
pub const TAIL_FRICTION_AIR: f32 = 0.2;
pub const FOOD_FRICTION_AIR: f32 = 0.4;
/// Spacing between chained tail segments, in body radii.
pub const TAIL_SPACING: f32 = 2.0;
/// How strongly tail segments relax toward their anchor each step.
pub const CHAIN_STIFFNESS: f32 = 0.6;
