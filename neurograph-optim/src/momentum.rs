use crate::shadow::{ShadowKey, ShadowStore};
use crate::trainer::{check_decay, check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{Model, NeuroGraphError, Tensor};

pub const DEFAULT_MOMENTUM: f32 = 0.9;

/// SGD with a velocity term: `v = μ·v − η·g`, `θ += v − λ·θ`.
#[derive(Debug)]
pub struct MomentumTrainer {
    base: TrainerBase,
    momentum: f32,
    velocity: ShadowStore,
}

impl MomentumTrainer {
    pub fn new(config: TrainerConfig, momentum: f32) -> Result<Self, NeuroGraphError> {
        check_decay("MomentumTrainer", "momentum", momentum)?;
        let base = TrainerBase::new(&config)?;
        debug!("MomentumTrainer: created with eta = {}, momentum = {}", base.eta, momentum);
        Ok(MomentumTrainer {
            base,
            momentum,
            velocity: ShadowStore::new("MomentumTrainer", 1),
        })
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.velocity
    }
}

impl Trainer for MomentumTrainer {
    fn name(&self) -> &'static str {
        "MomentumTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.velocity.allocate(model)
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        let step = self.base.eta * factor;
        let (lambda, mu) = (self.base.lambda, self.momentum);
        let slot = self.velocity.slot(key)?;
        check_lengths("MomentumTrainer", values, grad, slot)?;
        let velocity = slot[0].values_mut();
        for ((x, &g), v) in values.values_mut().iter_mut().zip(grad.values()).zip(velocity) {
            *v = mu * *v - step * g;
            *x += *v - lambda * *x;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "momentum_test.rs"]
mod tests;
