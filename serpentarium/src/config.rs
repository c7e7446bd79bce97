use serde::Deserialize;
use std::path::PathBuf;

/// Simulation tunables, loadable from a TOML file.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub world_width: f32,
    pub world_height: f32,
    /// Spawn positions keep this distance from the walls.
    pub boundary_margin: f32,

    pub snake_count: u32,
    /// Tail segments per snake.
    pub snake_length: u32,
    pub snake_head_size: f32,
    pub snake_tail_size: f32,
    pub initial_energy: f32,
    /// Flat energy cost per tick while alive.
    pub base_energy_cost: f32,
    /// Additional cost per tick, scaled by velocity magnitude.
    pub velocity_energy_cost: f32,

    pub food_value: f32,
    pub food_size: f32,
    pub max_food_age_ms: u64,
    /// Per-tick probability of a food spawn.
    pub food_spawn_probability: f64,

    pub generation_duration_ms: u64,
    /// A DATA message is offered to the predictor every this many ticks.
    pub ai_call_frequency: u64,
    /// Resolution of the occupancy matrix sent with each snake's state.
    pub matrix_width: u32,
    pub matrix_height: u32,

    /// First body id handed out by the physics adapter. Restored on destroy
    /// so snake ids repeat across generations.
    pub starting_body_id: u64,
    pub seed: u64,

    pub socket_path: PathBuf,
    pub connect_retries: u32,
    /// Send START to the predictor as soon as the channel is up.
    pub auto_start: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_width: 1200.0,
            world_height: 800.0,
            boundary_margin: 80.0,
            snake_count: 50,
            snake_length: 10,
            snake_head_size: 6.0,
            snake_tail_size: 4.0,
            initial_energy: 1500.0,
            base_energy_cost: 1.0,
            velocity_energy_cost: 0.5,
            food_value: 500.0,
            food_size: 12.0,
            max_food_age_ms: 30_000,
            food_spawn_probability: 0.01,
            generation_duration_ms: 30_000,
            ai_call_frequency: 10,
            matrix_width: 32,
            matrix_height: 32,
            starting_body_id: 666,
            seed: 42,
            socket_path: PathBuf::from("/tmp/serpentarium/control.sock"),
            connect_retries: 30,
            auto_start: true,
        }
    }
}

impl SimulationConfig {
    pub fn generation_duration_secs(&self) -> f64 {
        self.generation_duration_ms as f64 / 1000.0
    }

    pub fn max_food_age_secs(&self) -> f32 {
        self.max_food_age_ms as f32 / 1000.0
    }
}

/// Configuration for the entire application including CLI parameters.
pub struct AppConfig {
    pub simulation: SimulationConfig,
    /// Send RESUME instead of START on connect (rejoin a running trainer).
    pub resume: bool,
}

impl AppConfig {
    pub fn from_cli_and_config(
        cli: crate::Cli,
        mut simulation: SimulationConfig,
    ) -> anyhow::Result<Self> {
        if let Some(socket) = cli.socket {
            simulation.socket_path = socket;
        }
        if let Some(count) = cli.snakes {
            if count == 0 {
                anyhow::bail!("snake count must be at least 1");
            }
            simulation.snake_count = count;
        }
        if let Some(seed) = cli.seed {
            simulation.seed = seed;
        }

        Ok(Self {
            simulation,
            resume: cli.resume,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tuning() {
        let config = SimulationConfig::default();
        assert_eq!(config.initial_energy, 1500.0);
        assert_eq!(config.food_value, 500.0);
        assert_eq!(config.generation_duration_ms, 30_000);
        assert_eq!(config.ai_call_frequency, 10);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: SimulationConfig = toml::from_str("snake_count = 3\nseed = 7").unwrap();
        assert_eq!(config.snake_count, 3);
        assert_eq!(config.seed, 7);
        assert_eq!(config.max_food_age_ms, 30_000);
    }

    #[test]
    fn duration_helpers_convert_to_seconds() {
        let config = SimulationConfig::default();
        assert_eq!(config.generation_duration_secs(), 30.0);
        assert_eq!(config.max_food_age_secs(), 30.0);
    }
}
