use ndarray::Array1;
use tdkit_core::{Result, Shared, TransitionBatch, V};

use super::{TdCore, TdLearning};

/// TD(n) for state values: next value `v_targ(S_next)`
pub struct SimpleTD {
    core: TdCore<V>,
}

impl SimpleTD {
    /// Updater for `v` with default loss, optimizer and `v` as its own target
    pub fn new(v: Shared<V>) -> Self {
        Self {
            core: TdCore::new(v),
        }
    }
}

impl TdLearning for SimpleTD {
    type Model = V;

    fn name(&self) -> &'static str {
        "SimpleTD"
    }

    fn core(&self) -> &TdCore<V> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<V> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        self.core.target.read().values(&batch.s_next)
    }
}
