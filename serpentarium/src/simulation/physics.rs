use super::{
    CHAIN_STIFFNESS, FOOD_FRICTION_AIR, HEAD_FRICTION_AIR, TAIL_FRICTION_AIR, TAIL_SPACING,
    TICK_RATE,
};
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Key for the physics body slotmap.
    pub struct BodyKey;
}

/// Object-type codes used in occupancy matrices, shared with the predictor.
pub const CODE_NONE: u8 = 0;
pub const CODE_FOOD: u8 = 1;
pub const CODE_SNAKE: u8 = 2;
pub const CODE_ME: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    SnakeHead,
    SnakeTail,
    Food,
}

#[derive(Debug, Clone)]
pub struct Body {
    pub id: u64,
    pub kind: BodyKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub friction_air: f32,
}

/// Handle to a snake's physical chain: one head plus linked tail segments.
#[derive(Debug, Clone)]
pub struct SnakeBodyHandle {
    pub head: BodyKey,
    pub head_id: u64,
    pub segments: Vec<BodyKey>,
    /// Cosmetic tag reported to the predictor, no simulation meaning.
    pub color: [u8; 3],
}

impl SnakeBodyHandle {
    pub fn contains(&self, key: BodyKey) -> bool {
        self.head == key || self.segments.contains(&key)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FoodBodyHandle {
    pub key: BodyKey,
    pub id: u64,
}

/// One end of a collision pair, resolved enough for the world to route it
/// without reaching back into the slotmap.
#[derive(Debug, Clone, Copy)]
pub struct BodyRef {
    pub key: BodyKey,
    pub id: u64,
    pub kind: BodyKind,
}

#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
    pub a: BodyRef,
    pub b: BodyRef,
}

/// Soft distance constraint linking consecutive chain segments.
#[derive(Debug, Clone, Copy)]
struct Constraint {
    anchor: BodyKey,
    follower: BodyKey,
    rest: f32,
}

/// Owns the physical world: body storage, integration, chain constraints,
/// boundary containment and per-step collision events.
///
/// Velocities are in pixels per tick (one tick = 1/TICK_RATE seconds), which
/// is what the predictor's steering vectors are expressed in.
pub struct PhysicsAdapter {
    width: f32,
    height: f32,
    margin: f32,
    bodies: SlotMap<BodyKey, Body>,
    constraints: Vec<Constraint>,
    collisions: Vec<CollisionEvent>,
    next_body_id: u64,
    starting_body_id: u64,
    running: bool,
    rng: StdRng,
    used_reds: Vec<u8>,
}

impl PhysicsAdapter {
    pub fn new(width: f32, height: f32, margin: f32, starting_body_id: u64, seed: u64) -> Self {
        assert!(
            width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0,
            "world dimensions must be positive and finite"
        );
        assert!(
            margin >= 0.0 && margin * 2.0 < width.min(height),
            "boundary margin must leave room to spawn"
        );
        Self {
            width,
            height,
            margin,
            bodies: SlotMap::with_key(),
            constraints: Vec::new(),
            collisions: Vec::new(),
            next_body_id: starting_body_id,
            starting_body_id,
            running: false,
            rng: StdRng::seed_from_u64(seed),
            used_reds: vec![0, 234, 255],
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn run(&mut self) {
        log::debug!("physics: run()");
        self.running = true;
    }

    pub fn stop(&mut self) {
        log::debug!("physics: stop()");
        self.running = false;
    }

    /// Clears all bodies and resets id allocation, so the next population
    /// gets the same ids as the last one.
    pub fn destroy(&mut self) {
        log::debug!("physics: destroy()");
        self.running = false;
        self.bodies.clear();
        self.constraints.clear();
        self.collisions.clear();
        self.next_body_id = self.starting_body_id;
        self.used_reds = vec![0, 234, 255];
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_body_id;
        self.next_body_id += 1;
        id
    }

    /// Create a snake chain: `length` tail segments stacked above the head,
    /// linked by soft constraints. Invalid dimensions are a programming
    /// error, not a runtime condition.
    pub fn create_agent_body(
        &mut self,
        x: f32,
        y: f32,
        length: u32,
        head_radius: f32,
        tail_radius: f32,
    ) -> SnakeBodyHandle {
        assert!(length > 0, "snake chain needs at least one tail segment");
        assert!(
            x.is_finite() && y.is_finite() && head_radius > 0.0 && tail_radius > 0.0,
            "invalid snake body dimensions"
        );

        let color = self.next_color();
        let spacing = tail_radius * TAIL_SPACING;

        let mut segments = Vec::with_capacity(length as usize);
        for i in 0..length {
            let id = self.alloc_id();
            segments.push(self.bodies.insert(Body {
                id,
                kind: BodyKind::SnakeTail,
                position: Vec2::new(x, y - (i + 1) as f32 * spacing),
                velocity: Vec2::ZERO,
                radius: tail_radius,
                friction_air: TAIL_FRICTION_AIR,
            }));
        }
        let head_id = self.alloc_id();
        let head = self.bodies.insert(Body {
            id: head_id,
            kind: BodyKind::SnakeHead,
            position: Vec2::new(x, y),
            velocity: Vec2::ZERO,
            radius: head_radius,
            friction_air: HEAD_FRICTION_AIR,
        });

        // Chain: head anchors the first segment, each segment the next.
        let mut anchor = head;
        for &segment in &segments {
            self.constraints.push(Constraint {
                anchor,
                follower: segment,
                rest: spacing,
            });
            anchor = segment;
        }

        SnakeBodyHandle {
            head,
            head_id,
            segments,
            color,
        }
    }

    pub fn spawn_food(&mut self, x: f32, y: f32, radius: f32) -> FoodBodyHandle {
        assert!(x.is_finite() && y.is_finite() && radius > 0.0, "invalid food body");
        let id = self.alloc_id();
        let key = self.bodies.insert(Body {
            id,
            kind: BodyKind::Food,
            position: Vec2::new(x, y),
            velocity: Vec2::ZERO,
            radius,
            friction_air: FOOD_FRICTION_AIR,
        });
        FoodBodyHandle { key, id }
    }

    /// Uniform position within world bounds minus the boundary margin.
    pub fn random_position(&mut self) -> Vec2 {
        let x = self.margin + self.rng.gen_range(0.0..1.0) * (self.width - self.margin * 2.0);
        let y = self.margin + self.rng.gen_range(0.0..1.0) * (self.height - self.margin * 2.0);
        Vec2::new(x, y)
    }

    pub fn position(&self, key: BodyKey) -> Option<Vec2> {
        self.bodies.get(key).map(|body| body.position)
    }

    pub fn velocity(&self, key: BodyKey) -> Option<Vec2> {
        self.bodies.get(key).map(|body| body.velocity)
    }

    pub fn set_velocity(&mut self, key: BodyKey, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(key) {
            body.velocity = velocity;
        }
    }

    pub fn remove_body(&mut self, key: BodyKey) {
        self.bodies.remove(key);
        self.constraints
            .retain(|c| c.anchor != key && c.follower != key);
    }

    /// Remove a snake's whole chain: head, segments and their constraints.
    pub fn remove_agent(&mut self, handle: &SnakeBodyHandle) {
        self.remove_body(handle.head);
        for &segment in &handle.segments {
            self.remove_body(segment);
        }
    }

    /// Move a snake so its head lands on `destination`, dragging the chain
    /// along rigidly and zeroing velocities.
    pub fn translate_agent(&mut self, handle: &SnakeBodyHandle, destination: Vec2) {
        let Some(head_pos) = self.position(handle.head) else {
            return;
        };
        let delta = destination - head_pos;
        for key in std::iter::once(handle.head).chain(handle.segments.iter().copied()) {
            if let Some(body) = self.bodies.get_mut(key) {
                body.position += delta;
                body.velocity = Vec2::ZERO;
            }
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Advance the substrate by dt: integrate, relax chains, contain within
    /// bounds, then collect collision events for this step.
    pub fn step(&mut self, dt: f32) {
        if !self.running {
            return;
        }

        let ticks = dt * TICK_RATE;
        for body in self.bodies.values_mut() {
            body.position += body.velocity * ticks;
            let damping = (1.0 - body.friction_air).powf(ticks);
            body.velocity *= damping;
        }

        // Position-based chain relaxation, head to tail.
        for constraint in &self.constraints {
            let Some(anchor_pos) = self.bodies.get(constraint.anchor).map(|b| b.position) else {
                continue;
            };
            let Some(follower) = self.bodies.get_mut(constraint.follower) else {
                continue;
            };
            let offset = follower.position - anchor_pos;
            let distance = offset.length();
            if distance > f32::EPSILON {
                let target = anchor_pos + offset / distance * constraint.rest;
                follower.position += (target - follower.position) * CHAIN_STIFFNESS;
            }
        }

        // Boundary containment: clamp and kill the escaping velocity component.
        let (width, height) = (self.width, self.height);
        for body in self.bodies.values_mut() {
            let min_x = body.radius;
            let max_x = width - body.radius;
            let min_y = body.radius;
            let max_y = height - body.radius;
            if body.position.x < min_x || body.position.x > max_x {
                body.position.x = body.position.x.clamp(min_x, max_x);
                body.velocity.x = 0.0;
            }
            if body.position.y < min_y || body.position.y > max_y {
                body.position.y = body.position.y.clamp(min_y, max_y);
                body.velocity.y = 0.0;
            }
        }

        self.detect_collisions();
    }

    /// One event per overlapping pair per step. Only pairs involving a snake
    /// head are reported; tail segments never generate events.
    fn detect_collisions(&mut self) {
        self.collisions.clear();
        let heads: Vec<(BodyKey, &Body)> = self
            .bodies
            .iter()
            .filter(|(_, body)| body.kind == BodyKind::SnakeHead)
            .collect();
        let others: Vec<(BodyKey, &Body)> = self
            .bodies
            .iter()
            .filter(|(_, body)| body.kind != BodyKind::SnakeTail)
            .collect();

        let mut events = Vec::new();
        for &(head_key, head) in &heads {
            for &(other_key, other) in &others {
                if other_key == head_key {
                    continue;
                }
                // Head-head pairs would otherwise appear twice.
                if other.kind == BodyKind::SnakeHead && other.id < head.id {
                    continue;
                }
                let min_dist = head.radius + other.radius;
                if head.position.distance_squared(other.position) < min_dist * min_dist {
                    events.push(CollisionEvent {
                        a: BodyRef {
                            key: head_key,
                            id: head.id,
                            kind: head.kind,
                        },
                        b: BodyRef {
                            key: other_key,
                            id: other.id,
                            kind: other.kind,
                        },
                    });
                }
            }
        }
        self.collisions = events;
    }

    /// Drain the events collected by the last step.
    pub fn take_collision_events(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.collisions)
    }

    /// Rasterize the world into object-type codes. `me` marks that snake's
    /// own bodies distinctly so the predictor can tell self from others.
    pub fn occupancy_matrix(
        &self,
        cols: u32,
        rows: u32,
        me: Option<&SnakeBodyHandle>,
    ) -> Vec<u8> {
        let mut matrix = vec![CODE_NONE; (cols * rows) as usize];
        for (key, body) in &self.bodies {
            let col = ((body.position.x / self.width) * cols as f32)
                .clamp(0.0, cols as f32 - 1.0) as usize;
            let row = ((body.position.y / self.height) * rows as f32)
                .clamp(0.0, rows as f32 - 1.0) as usize;
            let cell = &mut matrix[row * cols as usize + col];
            let code = match body.kind {
                BodyKind::Food => CODE_FOOD,
                BodyKind::SnakeHead | BodyKind::SnakeTail => {
                    if me.is_some_and(|handle| handle.contains(key)) {
                        CODE_ME
                    } else {
                        CODE_SNAKE
                    }
                }
            };
            *cell = (*cell).max(code);
        }
        matrix
    }

    // Random color tag, never reusing a red component so snakes stay
    // distinguishable to the outside observer.
    fn next_color(&mut self) -> [u8; 3] {
        let mut red = 1u8;
        while self.used_reds.contains(&red) {
            red = self.rng.gen_range(0..=u8::MAX);
        }
        self.used_reds.push(red);
        [
            red,
            self.rng.gen_range(0..=u8::MAX),
            self.rng.gen_range(0..=u8::MAX),
        ]
    }
}
