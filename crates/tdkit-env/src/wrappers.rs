//! Environment wrappers for episode bookkeeping

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use tdkit_core::{
    Action, ActionSpace, EnvSpec, Environment, Metrics, Observation, ObservationSpace, Result,
    Step, StepInfo,
};

/// Time limit wrapper
///
/// Marks the step on which the limit is reached as `truncated`; `done`
/// stays reserved for real terminal states so that bootstrapping is not
/// cut off at the time limit.
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    fn spec(&self) -> EnvSpec {
        EnvSpec {
            max_episode_steps: Some(self.max_steps),
            ..self.env.spec()
        }
    }

    fn observation_space(&self) -> ObservationSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    async fn reset(&mut self) -> Result<(Observation, StepInfo)> {
        self.steps = 0;
        self.env.reset().await
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        self.steps += 1;
        let mut step = self.env.step(action).await?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
            step.info = step.info.with("TimeLimit.truncated", true);
        }

        Ok(step)
    }

    fn render(&self) -> Result<String> {
        self.env.render()
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }
}

/// Statistics of one finished episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    /// Episode number, starting at 1
    pub ep: usize,
    /// Global step count at the end of the episode
    pub total_steps: usize,
    /// Episode length
    pub steps: usize,
    /// Undiscounted return
    pub episode_return: f64,
    /// Smoothed return over recent episodes
    pub avg_return: f64,
    /// Mean wall time per step, in milliseconds
    pub dt_ms: f64,
    /// Per-episode means of the metrics passed to [`TrainMonitor::record_metrics`]
    pub metrics: Metrics,
    /// When the episode started
    pub started_at: DateTime<Utc>,
}

/// Tracks returns and training metrics across episodes and logs a summary
/// at the end of each one
pub struct TrainMonitor<E> {
    env: E,
    run_id: Uuid,
    run_started_at: DateTime<Utc>,
    smoothing: usize,
    log_every: usize,
    ep: usize,
    t: usize,
    total_steps: usize,
    episode_return: f64,
    avg_return: Option<f64>,
    episode_started_at: DateTime<Utc>,
    metric_sums: BTreeMap<String, (f64, usize)>,
    last_summary: Option<EpisodeSummary>,
}

impl<E: Environment> TrainMonitor<E> {
    /// Wrap `env`, smoothing returns over 10 episodes and logging every episode
    pub fn new(env: E) -> Self {
        let now = Utc::now();
        Self {
            env,
            run_id: Uuid::new_v4(),
            run_started_at: now,
            smoothing: 10,
            log_every: 1,
            ep: 0,
            t: 0,
            total_steps: 0,
            episode_return: 0.0,
            avg_return: None,
            episode_started_at: now,
            metric_sums: BTreeMap::new(),
            last_summary: None,
        }
    }

    /// Number of episodes the running average spans
    #[must_use]
    pub fn with_smoothing(mut self, smoothing: usize) -> Self {
        self.smoothing = smoothing.max(1);
        self
    }

    /// Only log every `n`-th episode
    #[must_use]
    pub fn with_log_every(mut self, n: usize) -> Self {
        self.log_every = n.max(1);
        self
    }

    /// Wrapped environment
    pub fn inner(&self) -> &E {
        &self.env
    }

    /// Unique id of this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the monitor was created
    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.run_started_at
    }

    /// Current episode number (0 before the first reset)
    pub fn ep(&self) -> usize {
        self.ep
    }

    /// Steps taken in the current episode
    pub fn t(&self) -> usize {
        self.t
    }

    /// Steps taken across all episodes
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Return accumulated so far in the current episode
    pub fn episode_return(&self) -> f64 {
        self.episode_return
    }

    /// Smoothed return over recent episodes, 0 before any episode finished
    pub fn avg_return(&self) -> f64 {
        self.avg_return.unwrap_or(0.0)
    }

    /// Summary of the most recently finished episode
    pub fn last_summary(&self) -> Option<&EpisodeSummary> {
        self.last_summary.as_ref()
    }

    /// Whether the smoothed return has reached the environment's reward threshold
    pub fn is_solved(&self) -> bool {
        match (self.env.spec().reward_threshold, self.avg_return) {
            (Some(threshold), Some(avg)) => avg >= threshold,
            _ => false,
        }
    }

    /// Accumulate training metrics; they are averaged over the episode
    pub fn record_metrics(&mut self, metrics: &Metrics) {
        for (name, &value) in metrics {
            let entry = self.metric_sums.entry(name.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    fn finish_episode(&mut self) {
        let k = self.ep.clamp(1, self.smoothing) as f64;
        let avg = match self.avg_return {
            Some(avg) => avg + (self.episode_return - avg) / k,
            None => self.episode_return,
        };
        self.avg_return = Some(avg);

        let elapsed_ms = (Utc::now() - self.episode_started_at)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1000.0);
        let metrics: Metrics = self
            .metric_sums
            .iter()
            .map(|(name, &(sum, count))| (name.clone(), sum / count as f64))
            .collect();

        let summary = EpisodeSummary {
            ep: self.ep,
            total_steps: self.total_steps,
            steps: self.t,
            episode_return: self.episode_return,
            avg_return: avg,
            dt_ms: elapsed_ms / self.t.max(1) as f64,
            metrics,
            started_at: self.episode_started_at,
        };

        if self.ep % self.log_every == 0 {
            info!(
                run_id = %self.run_id,
                ep = summary.ep,
                T = summary.total_steps,
                t = summary.steps,
                G = summary.episode_return,
                avg_G = summary.avg_return,
                dt_ms = summary.dt_ms,
                metrics = ?summary.metrics,
                "episode finished"
            );
        }
        self.last_summary = Some(summary);
    }
}

#[async_trait]
impl<E: Environment> Environment for TrainMonitor<E> {
    fn spec(&self) -> EnvSpec {
        self.env.spec()
    }

    fn observation_space(&self) -> ObservationSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    async fn reset(&mut self) -> Result<(Observation, StepInfo)> {
        if self.t > 0 && self.last_summary.as_ref().map_or(true, |s| s.ep != self.ep) {
            debug!(ep = self.ep, t = self.t, "episode abandoned before it finished");
        }
        self.ep += 1;
        self.t = 0;
        self.episode_return = 0.0;
        self.episode_started_at = Utc::now();
        self.metric_sums.clear();
        self.env.reset().await
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        let step = self.env.step(action).await?;
        self.t += 1;
        self.total_steps += 1;
        self.episode_return += step.reward;
        if step.finished() {
            self.finish_episode();
        }
        Ok(step)
    }

    fn render(&self) -> Result<String> {
        self.env.render()
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }
}
