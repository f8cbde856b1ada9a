//! Classic toy environments used by the demos and integration tests

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tdkit_core::{
    Action, ActionSpace, EnvSpec, Environment, EnvironmentConfig, Observation, ObservationSpace,
    RLError, Result, Step, StepInfo,
};

const FROZEN_LAKE_4X4: [&str; 4] = ["SFFF", "FHFH", "FFFH", "HFFG"];
const ACTION_NAMES: [&str; 4] = ["Left", "Down", "Right", "Up"];

fn seeded_rng(config: &EnvironmentConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tile {
    Start,
    Frozen,
    Hole,
    Goal,
}

impl Tile {
    fn parse(c: char) -> Result<Self> {
        match c {
            'S' => Ok(Self::Start),
            'F' => Ok(Self::Frozen),
            'H' => Ok(Self::Hole),
            'G' => Ok(Self::Goal),
            other => Err(RLError::InvalidConfig(format!("unknown FrozenLake tile {other:?}"))),
        }
    }

    fn symbol(self) -> char {
        match self {
            Self::Start => 'S',
            Self::Frozen => 'F',
            Self::Hole => 'H',
            Self::Goal => 'G',
        }
    }
}

/// Deterministic grid world: walk from `S` to `G` without falling into an `H`
///
/// Observations are cell indices `row * ncols + col`; actions are
/// 0 = left, 1 = down, 2 = right, 3 = up. Reaching the goal pays 1, every
/// other step pays 0, and both holes and the goal end the episode.
#[derive(Debug, Clone)]
pub struct FrozenLakeEnv {
    grid: Vec<Vec<Tile>>,
    start: usize,
    position: usize,
    last_action: Option<usize>,
    finished: bool,
}

impl FrozenLakeEnv {
    /// The standard 4x4 non-slippery lake
    pub fn new(_config: EnvironmentConfig) -> Result<Self> {
        Self::with_map(&FROZEN_LAKE_4X4)
    }

    /// Lake from rows of `S`/`F`/`H`/`G` characters
    pub fn with_map(rows: &[&str]) -> Result<Self> {
        let grid = rows
            .iter()
            .map(|row| row.chars().map(Tile::parse).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        let ncols = grid.first().map_or(0, Vec::len);
        if ncols == 0 || grid.iter().any(|row| row.len() != ncols) {
            return Err(RLError::InvalidConfig(
                "FrozenLake map must be a non-empty rectangle".to_string(),
            ));
        }
        let start = grid
            .iter()
            .flatten()
            .position(|&tile| tile == Tile::Start)
            .ok_or_else(|| RLError::InvalidConfig("FrozenLake map has no start tile".to_string()))?;
        Ok(Self {
            grid,
            start,
            position: start,
            last_action: None,
            finished: false,
        })
    }

    fn ncols(&self) -> usize {
        self.grid[0].len()
    }

    fn n_states(&self) -> usize {
        self.grid.len() * self.ncols()
    }

    fn tile(&self, index: usize) -> Tile {
        self.grid[index / self.ncols()][index % self.ncols()]
    }

    fn move_from(&self, index: usize, action: usize) -> usize {
        let (nrows, ncols) = (self.grid.len(), self.ncols());
        let (mut row, mut col) = (index / ncols, index % ncols);
        match action {
            0 => col = col.saturating_sub(1),
            1 => row = (row + 1).min(nrows - 1),
            2 => col = (col + 1).min(ncols - 1),
            _ => row = row.saturating_sub(1),
        }
        row * ncols + col
    }
}

#[async_trait]
impl Environment for FrozenLakeEnv {
    fn spec(&self) -> EnvSpec {
        EnvSpec {
            id: "FrozenLakeNonSlippery-v0".to_string(),
            max_episode_steps: Some(100),
            reward_threshold: Some(0.78),
        }
    }

    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::discrete(self.n_states())
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::discrete(4)
    }

    async fn reset(&mut self) -> Result<(Observation, StepInfo)> {
        self.position = self.start;
        self.last_action = None;
        self.finished = false;
        Ok((Observation::Discrete(self.position), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        if self.finished {
            return Err(RLError::Environment(
                "episode is over; call reset before stepping again".to_string(),
            ));
        }
        let a = action.as_discrete()?;
        if a >= 4 {
            return Err(RLError::InvalidAction(format!("action {a} outside of Discrete(4)")));
        }

        self.position = self.move_from(self.position, a);
        self.last_action = Some(a);
        let tile = self.tile(self.position);
        let done = matches!(tile, Tile::Hole | Tile::Goal);
        let reward = if tile == Tile::Goal { 1.0 } else { 0.0 };
        self.finished = done;

        Ok(Step {
            observation: Observation::Discrete(self.position),
            reward,
            done,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    fn render(&self) -> Result<String> {
        let mut out = String::new();
        if let Some(a) = self.last_action {
            out.push_str(&format!("  ({})\n", ACTION_NAMES[a]));
        }
        let ncols = self.ncols();
        for (r, row) in self.grid.iter().enumerate() {
            for (c, tile) in row.iter().enumerate() {
                if r * ncols + c == self.position {
                    out.push('[');
                    out.push(tile.symbol());
                    out.push(']');
                } else {
                    out.push(' ');
                    out.push(tile.symbol());
                    out.push(' ');
                }
            }
            out.push('\n');
        }
        Ok(out)
    }
}

/// CartPole physics constants
#[derive(Debug, Clone)]
struct CartPoleConfig {
    gravity: f64,
    mass_cart: f64,
    mass_pole: f64,
    length: f64,
    force_mag: f64,
    tau: f64,
    x_threshold: f64,
    theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            x_threshold: 2.4,
            theta_threshold: 12.0 * std::f64::consts::PI / 180.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CartPoleState {
    x: f64,
    x_dot: f64,
    theta: f64,
    theta_dot: f64,
}

/// Balance a pole on a cart by pushing left (0) or right (1)
///
/// Every step pays 1 until the pole falls past 12° or the cart leaves the
/// track. Episode length is capped by the [`TimeLimit`] the registry
/// wraps it in.
///
/// [`TimeLimit`]: crate::wrappers::TimeLimit
#[derive(Debug, Clone)]
pub struct CartPoleEnv {
    state: CartPoleState,
    config: CartPoleConfig,
    rng: StdRng,
    finished: bool,
}

impl CartPoleEnv {
    /// Create a new CartPole environment
    pub fn new(config: EnvironmentConfig) -> Result<Self> {
        Ok(Self {
            state: CartPoleState::default(),
            config: CartPoleConfig::default(),
            rng: seeded_rng(&config),
            finished: true,
        })
    }

    fn observation(&self) -> Observation {
        Observation::vector(&[
            self.state.x,
            self.state.x_dot,
            self.state.theta,
            self.state.theta_dot,
        ])
    }

    fn out_of_bounds(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }
}

#[async_trait]
impl Environment for CartPoleEnv {
    fn spec(&self) -> EnvSpec {
        EnvSpec {
            id: "CartPole-v0".to_string(),
            max_episode_steps: Some(200),
            reward_threshold: Some(195.0),
        }
    }

    fn observation_space(&self) -> ObservationSpace {
        let high = vec![
            self.config.x_threshold * 2.0,
            f64::INFINITY,
            self.config.theta_threshold * 2.0,
            f64::INFINITY,
        ];
        let low = high.iter().map(|&x| -x).collect();
        ObservationSpace::Box { low, high }
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::discrete(2)
    }

    async fn reset(&mut self) -> Result<(Observation, StepInfo)> {
        let mut sample = || self.rng.gen_range(-0.05..0.05);
        self.state = CartPoleState {
            x: sample(),
            x_dot: sample(),
            theta: sample(),
            theta_dot: sample(),
        };
        self.finished = false;
        Ok((self.observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        if self.finished {
            return Err(RLError::Environment(
                "episode is over; call reset before stepping again".to_string(),
            ));
        }
        let force = match action.as_discrete()? {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            a => return Err(RLError::InvalidAction(format!("action {a} outside of Discrete(2)"))),
        };

        let cfg = &self.config;
        let (sin_theta, cos_theta) = self.state.theta.sin_cos();
        let total_mass = cfg.mass_cart + cfg.mass_pole;
        let pole_mass_length = cfg.mass_pole * cfg.length;

        let temp = (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (cfg.gravity * sin_theta - cos_theta * temp)
            / (cfg.length * (4.0 / 3.0 - cfg.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // explicit Euler
        self.state.x += cfg.tau * self.state.x_dot;
        self.state.x_dot += cfg.tau * x_acc;
        self.state.theta += cfg.tau * self.state.theta_dot;
        self.state.theta_dot += cfg.tau * theta_acc;

        let done = self.out_of_bounds();
        self.finished = done;
        if done {
            debug!(x = self.state.x, theta = self.state.theta, "pole fell");
        }

        Ok(Step {
            observation: self.observation(),
            reward: 1.0,
            done,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    fn render(&self) -> Result<String> {
        Ok(format!(
            "x={:+.3} x_dot={:+.3} theta={:+.3} theta_dot={:+.3}",
            self.state.x, self.state.x_dot, self.state.theta, self.state.theta_dot
        ))
    }
}
