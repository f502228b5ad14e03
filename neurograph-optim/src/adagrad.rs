use crate::shadow::{ShadowKey, ShadowStore};
use crate::trainer::{check_epsilon, check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{Model, NeuroGraphError, Tensor};

pub const DEFAULT_EPSILON: f32 = 1e-20;

/// Adagrad: per-element learning rates from the running sum of squared
/// gradients. `v += g²`, `θ −= η·g/√(v+ε) + λ·θ`.
#[derive(Debug)]
pub struct AdagradTrainer {
    base: TrainerBase,
    epsilon: f32,
    sum_squares: ShadowStore,
}

impl AdagradTrainer {
    pub fn new(config: TrainerConfig, epsilon: f32) -> Result<Self, NeuroGraphError> {
        check_epsilon("AdagradTrainer", epsilon)?;
        let base = TrainerBase::new(&config)?;
        debug!("AdagradTrainer: created with eta = {}, epsilon = {}", base.eta, epsilon);
        Ok(AdagradTrainer {
            base,
            epsilon,
            sum_squares: ShadowStore::new("AdagradTrainer", 1),
        })
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.sum_squares
    }
}

impl Trainer for AdagradTrainer {
    fn name(&self) -> &'static str {
        "AdagradTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.sum_squares.allocate(model)
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        let (eta, lambda, eps) = (self.base.eta, self.base.lambda, self.epsilon);
        let slot = self.sum_squares.slot(key)?;
        check_lengths("AdagradTrainer", values, grad, slot)?;
        let sum_squares = slot[0].values_mut();
        for ((x, &g), s) in values.values_mut().iter_mut().zip(grad.values()).zip(sum_squares) {
            let g = factor * g;
            *s += g * g;
            *x -= eta * g / (*s + eps).sqrt() + lambda * *x;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "adagrad_test.rs"]
mod tests;
