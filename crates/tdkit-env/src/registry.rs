//! Environment registry for easy environment creation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tdkit_core::{Environment, EnvironmentConfig, RLError, Result};
use tracing::debug;

use crate::classic::{CartPoleEnv, FrozenLakeEnv};
use crate::wrappers::TimeLimit;

type EnvConstructor =
    Box<dyn Fn(EnvironmentConfig) -> Result<Box<dyn Environment>> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: Mutex<EnvRegistry> = Mutex::new(EnvRegistry::with_builtins());
}

fn registry() -> MutexGuard<'static, EnvRegistry> {
    // constructors never leave the map half-updated, so a poisoned lock is still usable
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Global environment registry
pub struct EnvRegistry {
    envs: HashMap<String, EnvConstructor>,
}

impl EnvRegistry {
    fn with_builtins() -> Self {
        let mut registry = Self {
            envs: HashMap::new(),
        };
        registry.register("FrozenLakeNonSlippery-v0", |config| {
            Ok(Box::new(FrozenLakeEnv::new(config)?))
        });
        registry.register("CartPole-v0", |config| Ok(Box::new(CartPoleEnv::new(config)?)));
        registry
    }

    /// Register an environment
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(EnvironmentConfig) -> Result<Box<dyn Environment>> + Send + Sync + 'static,
    {
        self.envs.insert(name.into(), Box::new(constructor));
    }

    /// Create an environment by name, wrapped in a [`TimeLimit`] when it
    /// has an episode limit
    ///
    /// `config.max_steps` overrides the environment's own limit.
    pub fn make(&self, name: &str, config: EnvironmentConfig) -> Result<Box<dyn Environment>> {
        let constructor = self
            .envs
            .get(name)
            .ok_or_else(|| RLError::Environment(format!("Unknown environment: {name}")))?;
        let max_steps = config.max_steps;
        let env = constructor(config)?;
        match max_steps.or(env.spec().max_episode_steps) {
            Some(limit) => {
                debug!(env = name, limit, "wrapping environment in a time limit");
                Ok(Box::new(TimeLimit::new(env, limit)))
            }
            None => Ok(env),
        }
    }

    /// List registered environments
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.envs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Register an environment globally
pub fn register_env<F>(name: impl Into<String>, constructor: F)
where
    F: Fn(EnvironmentConfig) -> Result<Box<dyn Environment>> + Send + Sync + 'static,
{
    registry().register(name, constructor);
}

/// Create an environment by name
pub fn make_env(name: &str, config: EnvironmentConfig) -> Result<Box<dyn Environment>> {
    registry().make(name, config)
}

/// List all registered environments
pub fn list_envs() -> Vec<String> {
    registry().list()
}
