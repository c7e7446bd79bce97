use super::food::Food;
use super::physics::{BodyKind, PhysicsAdapter};
use super::snake::Snake;
use crate::channel::{ControlChannel, MessageListener};
use crate::config::SimulationConfig;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use shared::{
    GenerationReport, Message, MessageId, MessageType, Prediction, ReportedSnake, SnakeRoster,
    SnakeState, SnakeSummary,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The generation ran its full configured duration.
    TimeLimit,
    /// Every snake died before the time was up.
    Extinction,
}

/// Returned by `World::step` on the tick a generation ends. The caller owns
/// what happens next (reporting, waiting for the next START).
#[derive(Debug, Clone)]
pub struct GenerationEnded {
    pub reason: EndReason,
    pub generation: u32,
    /// Snakes still alive at the end of the round.
    pub champions: Vec<ReportedSnake>,
}

/// Point-in-time snapshot for the periodic status readout.
#[derive(Debug, Clone, Copy)]
pub struct WorldStatus {
    pub generation: u32,
    pub alive: usize,
    pub total: usize,
    pub foods: usize,
    pub tick: u64,
    pub progress: f32,
    pub pending: usize,
}

/// The sandbox: population, food economy and the physics substrate, advanced
/// one fixed tick at a time.
///
/// The world never talks to the predictor on its own schedule; it offers one
/// DATA message every `ai_call_frequency` ticks and only while no previous
/// request is outstanding. Inbound traffic reaches it through the
/// `MessageListener` impl during the channel pump.
pub struct World {
    physics: PhysicsAdapter,
    channel: Rc<RefCell<ControlChannel>>,
    config: SimulationConfig,
    rng: StdRng,
    snakes: Vec<Snake>,
    foods: Vec<Food>,
    tick: u64,
    elapsed: f64,
    generation: u32,
    running: bool,
    /// Ids of our requests still awaiting any reply. At most one entry.
    pending: Vec<MessageId>,
    /// Trainer-reported progress through its work, for the status readout.
    progress: f32,
}

impl World {
    pub fn new(channel: Rc<RefCell<ControlChannel>>, config: &SimulationConfig) -> Self {
        let physics = PhysicsAdapter::new(
            config.world_width,
            config.world_height,
            config.boundary_margin,
            config.starting_body_id,
            config.seed,
        );
        Self {
            physics,
            channel,
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.seed),
            snakes: Vec::new(),
            foods: Vec::new(),
            tick: 0,
            elapsed: 0.0,
            generation: 0,
            running: false,
            pending: Vec::new(),
            progress: 0.0,
        }
    }

    /// Create the population. Ids depend only on the configured starting body
    /// id and chain length, so they repeat exactly across generations.
    pub fn populate(&mut self) {
        for _ in 0..self.config.snake_count {
            let position = self.physics.random_position();
            let body = self.physics.create_agent_body(
                position.x,
                position.y,
                self.config.snake_length,
                self.config.snake_head_size,
                self.config.snake_tail_size,
            );
            self.snakes.push(Snake::new(body, self.config.initial_energy));
        }
        log::info!("populated world with {} snakes", self.snakes.len());
    }

    pub fn begin(&mut self) {
        self.running = true;
        self.physics.run();
        log::info!("generation {} running", self.generation);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.physics.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn alive_count(&self) -> usize {
        self.snakes.iter().filter(|s| !s.dead).count()
    }

    pub fn status(&self) -> WorldStatus {
        WorldStatus {
            generation: self.generation,
            alive: self.alive_count(),
            total: self.snakes.len(),
            foods: self.foods.len(),
            tick: self.tick,
            progress: self.progress,
            pending: self.pending.len(),
        }
    }

    pub fn roster(&self) -> SnakeRoster {
        SnakeRoster {
            snakes: self
                .snakes
                .iter()
                .map(|snake| SnakeSummary {
                    id: snake.id,
                    color: snake.color(),
                })
                .collect(),
        }
    }

    /// Fitness report for the round that just ended: every snake's id and
    /// cumulative intake, dead or not.
    pub fn generation_report(&self) -> GenerationReport {
        GenerationReport {
            snake_ids: self.snakes.iter().map(|s| s.id).collect(),
            champions: self
                .snakes
                .iter()
                .map(|snake| ReportedSnake {
                    id: snake.id,
                    energy_intake: snake.energy_intake,
                })
                .collect(),
        }
    }

    /// Reuse the same population for a fresh round: restore every snake's
    /// economy, scatter the chains, clear leftover food and forget any
    /// in-flight request.
    pub fn prepare_generation(&mut self, generation: u32) {
        self.stop();
        for food in &self.foods {
            self.physics.remove_body(food.handle.key);
        }
        self.foods.clear();

        for i in 0..self.snakes.len() {
            let position = self.physics.random_position();
            let snake = &mut self.snakes[i];
            if snake.dead {
                // The chain was removed on death; rebuild it in place so the
                // snake keeps its id-by-construction.
                snake.body = self.physics.create_agent_body(
                    position.x,
                    position.y,
                    self.config.snake_length,
                    self.config.snake_head_size,
                    self.config.snake_tail_size,
                );
            } else {
                self.physics.translate_agent(&snake.body, position);
            }
            snake.reset();
        }

        self.pending.clear();
        self.tick = 0;
        self.elapsed = 0.0;
        self.progress = 0.0;
        self.generation = generation;
        log::info!("prepared generation {generation}");
    }

    /// Tear the world down completely. `populate` after this reproduces the
    /// original ids.
    pub fn destroy(&mut self) {
        self.stop();
        self.snakes.clear();
        self.foods.clear();
        self.pending.clear();
        self.tick = 0;
        self.elapsed = 0.0;
        self.progress = 0.0;
        self.physics.destroy();
    }

    /// Advance one tick. Returns `Some` on the tick the generation ends; the
    /// world is stopped by then and waits for `prepare_generation`.
    pub fn step(&mut self, dt: f32) -> Option<GenerationEnded> {
        if !self.running {
            return None;
        }

        self.elapsed += dt as f64;
        self.tick += 1;

        if self.elapsed >= self.config.generation_duration_secs() {
            return Some(self.end_generation(EndReason::TimeLimit));
        }
        if self.alive_count() == 0 {
            return Some(self.end_generation(EndReason::Extinction));
        }

        if self.rng.gen_bool(self.config.food_spawn_probability) {
            let position = self.sample_food_position();
            self.spawn_food_at(position);
        }

        // Energy upkeep; chains of snakes that died this tick leave the
        // substrate immediately, so they cannot eat below.
        let mut dead_bodies = Vec::new();
        for snake in &mut self.snakes {
            if snake.dead {
                continue;
            }
            snake.update(
                &self.physics,
                self.config.base_energy_cost,
                self.config.velocity_energy_cost,
            );
            if snake.dead {
                log::debug!("snake {} starved at tick {}", snake.id, self.tick);
                dead_bodies.push(snake.body.clone());
            }
        }
        for body in &dead_bodies {
            self.physics.remove_agent(body);
        }

        // Resolve last step's contacts, then age and sweep the food supply.
        for event in self.physics.take_collision_events() {
            let (head_ref, food_ref) = match (event.a.kind, event.b.kind) {
                (BodyKind::SnakeHead, BodyKind::Food) => (event.a, event.b),
                (BodyKind::Food, BodyKind::SnakeHead) => (event.b, event.a),
                _ => continue,
            };
            // The body goes regardless of the outcome, so a stale pair can
            // never be consumed twice.
            self.physics.remove_body(food_ref.key);
            let Some(food) = self
                .foods
                .iter_mut()
                .find(|f| f.id == food_ref.id && !f.dead)
            else {
                continue;
            };
            match self
                .snakes
                .iter_mut()
                .find(|s| !s.dead && s.body.head == head_ref.key)
            {
                Some(snake) => snake.eat(food),
                None => food.be_eaten(),
            }
        }
        let max_age = self.config.max_food_age_secs();
        for food in &mut self.foods {
            food.update(dt, max_age);
        }
        for food in self.foods.iter().filter(|f| f.dead) {
            self.physics.remove_body(food.handle.key);
        }
        self.foods.retain(|f| !f.dead);

        // Offer the predictor fresh state, but never stack requests: a slow
        // peer just sees a lower effective rate.
        if self.tick % self.config.ai_call_frequency == 0
            && self.pending.is_empty()
            && self.alive_count() > 0
        {
            let payload = self.build_data_payload();
            let id = self
                .channel
                .borrow_mut()
                .send(MessageType::Data, Some(payload));
            self.pending.push(id);
        }

        self.physics.step(dt);
        None
    }

    fn end_generation(&mut self, reason: EndReason) -> GenerationEnded {
        let champions: Vec<ReportedSnake> = self
            .snakes
            .iter()
            .filter(|s| !s.dead)
            .map(|snake| ReportedSnake {
                id: snake.id,
                energy_intake: snake.energy_intake,
            })
            .collect();
        log::info!(
            "generation {} over ({reason:?}), {} survivor(s)",
            self.generation,
            champions.len()
        );
        self.stop();
        GenerationEnded {
            reason,
            generation: self.generation,
            champions,
        }
    }

    fn spawn_food_at(&mut self, position: Vec2) {
        let handle = self
            .physics
            .spawn_food(position.x, position.y, self.config.food_size);
        self.foods.push(Food::new(handle, self.config.food_value));
    }

    /// Gaussian spawn centered on the world, so food clusters where the
    /// action is but can land anywhere.
    fn sample_food_position(&mut self) -> Vec2 {
        let x = gaussian_unit(&mut self.rng) * self.config.world_width;
        let y = gaussian_unit(&mut self.rng) * self.config.world_height;
        Vec2::new(x, y)
    }

    fn build_data_payload(&self) -> Value {
        let mut states = HashMap::new();
        for snake in self.snakes.iter().filter(|s| !s.dead) {
            let velocity = snake.velocity(&self.physics);
            let matrix = self.physics.occupancy_matrix(
                self.config.matrix_width,
                self.config.matrix_height,
                Some(&snake.body),
            );
            states.insert(
                snake.id.to_string(),
                SnakeState {
                    energy_level: snake.energy_level,
                    energy_intake: snake.energy_intake,
                    matrix,
                    velocity_x: velocity.x,
                    velocity_y: velocity.y,
                },
            );
        }
        serde_json::to_value(states).unwrap_or_default()
    }

    fn apply_prediction(&mut self, prediction: Prediction) {
        if let Some(progress) = prediction.progress {
            self.progress = progress;
        }
        for (id, [vx, vy]) in prediction.prediction {
            let Ok(id) = id.parse::<u64>() else {
                log::debug!("ignoring steering for unparseable id {id:?}");
                continue;
            };
            let Some(snake) = self.snakes.iter().find(|s| !s.dead && s.id == id) else {
                continue;
            };
            snake.set_velocity(&mut self.physics, Vec2::new(vx, vy));
        }
    }
}

impl MessageListener for World {
    fn on_message(&mut self, message: &Message) {
        // Any reply carrying one of our ids settles the in-flight request,
        // whatever its type.
        if let Some(id) = message.message_id {
            self.pending.retain(|&pending| pending != id);
        }

        match message.kind {
            MessageType::Ack => {
                if !self.running {
                    self.begin();
                }
            }
            MessageType::Error => {
                log::error!("predictor reported an error: {:?}", message.data);
                self.stop();
            }
            MessageType::Data => {
                if let Some(prediction) = message.data_as::<Prediction>() {
                    self.apply_prediction(prediction);
                }
            }
            // START, RESUME and GENERATION drive the generation lifecycle,
            // which is the orchestrator's job.
            MessageType::Start | MessageType::Resume | MessageType::Generation => {}
        }
    }
}

/// Box-Muller sample with mean 0.5, resampled until it lands in [0, 1].
fn gaussian_unit(rng: &mut StdRng) -> f32 {
    loop {
        let u1 = rng.gen_range(0.0f32..1.0).max(f32::MIN_POSITIVE);
        let u2 = rng.gen_range(0.0f32..1.0);
        let normal = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
        let sample = 0.5 + normal * 0.25;
        if (0.0..=1.0).contains(&sample) {
            return sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DT: f32 = 1.0 / 60.0;

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            snake_count: 2,
            snake_length: 3,
            food_spawn_probability: 0.0,
            ..SimulationConfig::default()
        }
    }

    fn world_with(config: SimulationConfig) -> (World, Rc<RefCell<ControlChannel>>) {
        let channel = Rc::new(RefCell::new(ControlChannel::disconnected()));
        let mut world = World::new(channel.clone(), &config);
        world.populate();
        world.begin();
        (world, channel)
    }

    fn reply(id: Option<MessageId>, kind: MessageType, data: Option<Value>) -> Message {
        Message {
            message_id: id,
            kind,
            data,
        }
    }

    #[test]
    fn generation_ends_exactly_at_the_time_limit() {
        let config = SimulationConfig {
            generation_duration_ms: 1_000,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);

        assert!(world.step(0.5).is_none());
        let ended = world.step(0.5).expect("time limit reached");
        assert_eq!(ended.reason, EndReason::TimeLimit);
        assert_eq!(ended.champions.len(), 2);
        assert!(!world.is_running());
    }

    #[test]
    fn extinction_ends_the_generation_early() {
        let config = SimulationConfig {
            initial_energy: 1.0,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);

        // Every snake starves on the first upkeep.
        assert!(world.step(DT).is_none());
        assert_eq!(world.alive_count(), 0);
        assert_eq!(world.physics.body_count(), 0);

        let ended = world.step(DT).expect("extinct");
        assert_eq!(ended.reason, EndReason::Extinction);
        assert!(ended.champions.is_empty());
    }

    #[test]
    fn at_most_one_request_in_flight() {
        let config = SimulationConfig {
            ai_call_frequency: 1,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);

        for _ in 0..5 {
            world.step(DT);
            assert_eq!(world.pending, vec![0]);
        }

        world.on_message(&reply(Some(0), MessageType::Data, None));
        assert!(world.pending.is_empty());

        world.step(DT);
        assert_eq!(world.pending, vec![1]);
    }

    #[test]
    fn no_request_offered_once_everyone_is_dead() {
        let config = SimulationConfig {
            initial_energy: 1.0,
            ai_call_frequency: 1,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);
        world.step(DT);
        assert!(world.pending.is_empty());
    }

    #[test]
    fn predictions_steer_known_snakes_and_skip_the_rest() {
        let (mut world, _channel) = world_with(quiet_config());
        let steered = world.snakes[0].id;
        let untouched = world.snakes[1].body.head;

        world.pending.push(3);
        world.on_message(&reply(
            Some(3),
            MessageType::Data,
            Some(json!({
                "prediction": {
                    (steered.to_string()): [2.0, 3.0],
                    "999999": [5.0, 5.0],
                    "not-a-number": [1.0, 1.0],
                },
                "progress": 0.25,
            })),
        ));

        assert!(world.pending.is_empty());
        let head = world.snakes[0].body.head;
        assert_eq!(world.physics.velocity(head).unwrap(), Vec2::new(2.0, 3.0));
        assert_eq!(world.physics.velocity(untouched).unwrap(), Vec2::ZERO);
        assert_eq!(world.progress, 0.25);
    }

    #[test]
    fn dead_snakes_are_left_out_of_the_data_payload() {
        let (mut world, _channel) = world_with(quiet_config());
        world.snakes[0].dead = true;
        let payload = world.build_data_payload();
        let map = payload.as_object().unwrap();
        assert_eq!(map.len(), 1);
        let state = &map[&world.snakes[1].id.to_string()];
        assert_eq!(
            state["matrix"].as_array().unwrap().len(),
            (world.config.matrix_width * world.config.matrix_height) as usize
        );
    }

    #[test]
    fn certain_spawn_probability_drops_food_every_tick() {
        let config = SimulationConfig {
            food_spawn_probability: 1.0,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);
        world.step(DT);
        assert_eq!(world.foods.len(), 1);
        let position = world.physics.position(world.foods[0].handle.key).unwrap();
        assert!(position.x >= 0.0 && position.x <= world.config.world_width);
        assert!(position.y >= 0.0 && position.y <= world.config.world_height);
    }

    #[test]
    fn snake_eats_food_it_runs_into() {
        let (mut world, _channel) = world_with(quiet_config());
        let head = world.snakes[0].body.head;
        let head_position = world.physics.position(head).unwrap();
        world.spawn_food_at(head_position);
        let bodies_before = world.physics.body_count();

        // First step detects the contact, second resolves it.
        world.step(DT);
        world.step(DT);

        let snake = &world.snakes[0];
        let expected = world.config.initial_energy - 2.0 * world.config.base_energy_cost
            + world.config.food_value;
        assert!((snake.energy_level - expected).abs() < 1e-3);
        assert_eq!(snake.energy_intake, world.config.food_value);
        assert!(world.foods.is_empty());
        assert_eq!(world.physics.body_count(), bodies_before - 1);
    }

    #[test]
    fn food_expires_even_if_never_eaten() {
        let config = SimulationConfig {
            max_food_age_ms: 100,
            generation_duration_ms: 600_000,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);
        world.spawn_food_at(Vec2::new(50.0, 50.0));
        let bodies_before = world.physics.body_count();

        for _ in 0..20 {
            world.step(DT);
        }
        assert!(world.foods.is_empty());
        assert_eq!(world.physics.body_count(), bodies_before - 1);
    }

    #[test]
    fn error_message_halts_the_world() {
        let (mut world, _channel) = world_with(quiet_config());
        world.on_message(&reply(None, MessageType::Error, Some(json!("boom"))));
        assert!(!world.is_running());
        assert!(world.step(DT).is_none());
        assert_eq!(world.tick, 0);
    }

    #[test]
    fn ack_starts_a_stopped_world() {
        let channel = Rc::new(RefCell::new(ControlChannel::disconnected()));
        let mut world = World::new(channel, &quiet_config());
        world.populate();
        assert!(!world.is_running());
        world.on_message(&reply(None, MessageType::Ack, None));
        assert!(world.is_running());
    }

    #[test]
    fn prepare_generation_resets_population_and_bookkeeping() {
        let config = SimulationConfig {
            initial_energy: 1.0,
            ..quiet_config()
        };
        let (mut world, _channel) = world_with(config);
        world.spawn_food_at(Vec2::new(50.0, 50.0));
        world.step(DT);
        world.pending.push(9);
        assert_eq!(world.alive_count(), 0);

        world.prepare_generation(2);
        assert_eq!(world.generation(), 2);
        assert_eq!(world.alive_count(), 2);
        assert!(world.foods.is_empty());
        assert!(world.pending.is_empty());
        assert_eq!(world.tick, 0);
        // Both chains are back in the substrate.
        assert_eq!(world.physics.body_count(), 2 * (3 + 1));
    }

    #[test]
    fn report_covers_every_snake_dead_or_alive() {
        let (mut world, _channel) = world_with(quiet_config());
        world.snakes[0].dead = true;
        world.snakes[1].energy_intake = 500.0;

        let report = world.generation_report();
        assert_eq!(report.snake_ids.len(), 2);
        assert_eq!(report.champions.len(), 2);
        assert_eq!(report.champions[1].energy_intake, 500.0);
    }
}
