//! RMSProp, with and without a momentum term. Both keep a per-element decayed
//! average of squared gradients, `d2 = ρ·d2 + (1−ρ)·g²`.

use crate::shadow::{ShadowKey, ShadowStore};
use crate::trainer::{check_decay, check_epsilon, check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{Model, NeuroGraphError, Tensor};

pub const DEFAULT_EPSILON: f32 = 1e-20;
pub const DEFAULT_RHO: f32 = 0.95;

/// `θ −= η·g/√(d2+ε) + λ·θ`.
#[derive(Debug)]
pub struct RmsPropTrainer {
    base: TrainerBase,
    epsilon: f32,
    rho: f32,
    d2: ShadowStore,
}

impl RmsPropTrainer {
    pub fn new(config: TrainerConfig, epsilon: f32, rho: f32) -> Result<Self, NeuroGraphError> {
        check_epsilon("RmsPropTrainer", epsilon)?;
        check_decay("RmsPropTrainer", "rho", rho)?;
        let base = TrainerBase::new(&config)?;
        debug!(
            "RmsPropTrainer: created with eta = {}, epsilon = {}, rho = {}",
            base.eta, epsilon, rho
        );
        Ok(RmsPropTrainer {
            base,
            epsilon,
            rho,
            d2: ShadowStore::new("RmsPropTrainer", 1),
        })
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.d2
    }
}

impl Trainer for RmsPropTrainer {
    fn name(&self) -> &'static str {
        "RmsPropTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.d2.allocate(model)
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        let (eta, lambda, eps, rho) = (self.base.eta, self.base.lambda, self.epsilon, self.rho);
        let slot = self.d2.slot(key)?;
        check_lengths("RmsPropTrainer", values, grad, slot)?;
        let d2 = slot[0].values_mut();
        for ((x, &g), d) in values.values_mut().iter_mut().zip(grad.values()).zip(d2) {
            let g = factor * g;
            *d = rho * *d + (1.0 - rho) * g * g;
            *x -= eta * g / (*d + eps).sqrt() + lambda * *x;
        }
        Ok(())
    }
}

/// `v = μ·v − η·g/√(d2+ε)`, `θ += v − λ·θ`.
#[derive(Debug)]
pub struct RmsPropMomentumTrainer {
    base: TrainerBase,
    momentum: f32,
    epsilon: f32,
    rho: f32,
    /// Buffer 0 holds `d2`, buffer 1 the velocity.
    state: ShadowStore,
}

impl RmsPropMomentumTrainer {
    pub fn new(
        config: TrainerConfig,
        momentum: f32,
        epsilon: f32,
        rho: f32,
    ) -> Result<Self, NeuroGraphError> {
        check_decay("RmsPropMomentumTrainer", "momentum", momentum)?;
        check_epsilon("RmsPropMomentumTrainer", epsilon)?;
        check_decay("RmsPropMomentumTrainer", "rho", rho)?;
        let base = TrainerBase::new(&config)?;
        debug!(
            "RmsPropMomentumTrainer: created with eta = {}, momentum = {}, epsilon = {}, rho = {}",
            base.eta, momentum, epsilon, rho
        );
        Ok(RmsPropMomentumTrainer {
            base,
            momentum,
            epsilon,
            rho,
            state: ShadowStore::new("RmsPropMomentumTrainer", 2),
        })
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.state
    }
}

impl Trainer for RmsPropMomentumTrainer {
    fn name(&self) -> &'static str {
        "RmsPropMomentumTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.state.allocate(model)
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        let (eta, lambda, mu) = (self.base.eta, self.base.lambda, self.momentum);
        let (eps, rho) = (self.epsilon, self.rho);
        let slot = self.state.slot(key)?;
        check_lengths("RmsPropMomentumTrainer", values, grad, slot)?;
        let [d2, velocity] = slot else {
            return Err(NeuroGraphError::NotSupported(
                "RmsPropMomentumTrainer: expected two shadow buffers".to_string(),
            ));
        };
        let elements = values
            .values_mut()
            .iter_mut()
            .zip(grad.values())
            .zip(d2.values_mut().iter_mut().zip(velocity.values_mut()));
        for ((x, &g), (d, v)) in elements {
            let g = factor * g;
            *d = rho * *d + (1.0 - rho) * g * g;
            *v = mu * *v - eta * g / (*d + eps).sqrt();
            *x += *v - lambda * *x;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rmsprop_test.rs"]
mod tests;
