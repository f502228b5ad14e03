use crate::shadow::{ShadowKey, ShadowStore};
use crate::trainer::{check_decay, check_epsilon, check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{Model, NeuroGraphError, Tensor};

pub const DEFAULT_EPSILON: f32 = 1e-6;
pub const DEFAULT_RHO: f32 = 0.95;

/// Adadelta. The step size comes entirely from the ratio of the decayed
/// squared updates to the decayed squared gradients; the learning rate is
/// not used.
#[derive(Debug)]
pub struct AdadeltaTrainer {
    base: TrainerBase,
    epsilon: f32,
    rho: f32,
    /// Buffer 0 holds `hg` (squared gradients), buffer 1 `hd` (squared updates).
    history: ShadowStore,
}

impl AdadeltaTrainer {
    pub fn new(config: TrainerConfig, epsilon: f32, rho: f32) -> Result<Self, NeuroGraphError> {
        check_epsilon("AdadeltaTrainer", epsilon)?;
        check_decay("AdadeltaTrainer", "rho", rho)?;
        let base = TrainerBase::new(&config)?;
        debug!("AdadeltaTrainer: created with epsilon = {}, rho = {}", epsilon, rho);
        Ok(AdadeltaTrainer {
            base,
            epsilon,
            rho,
            history: ShadowStore::new("AdadeltaTrainer", 2),
        })
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.history
    }
}

impl Trainer for AdadeltaTrainer {
    fn name(&self) -> &'static str {
        "AdadeltaTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.history.allocate(model)
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        let (lambda, eps, rho) = (self.base.lambda, self.epsilon, self.rho);
        let slot = self.history.slot(key)?;
        check_lengths("AdadeltaTrainer", values, grad, slot)?;
        let [hg, hd] = slot else {
            return Err(NeuroGraphError::NotSupported(
                "AdadeltaTrainer: expected two shadow buffers".to_string(),
            ));
        };
        let elements = values
            .values_mut()
            .iter_mut()
            .zip(grad.values())
            .zip(hg.values_mut().iter_mut().zip(hd.values_mut()));
        for ((x, &g), (hg, hd)) in elements {
            let g = factor * g;
            *hg = rho * *hg + (1.0 - rho) * g * g;
            let delta = -g * (*hd + eps).sqrt() / (*hg + eps).sqrt();
            *hd = rho * *hd + (1.0 - rho) * delta * delta;
            *x += delta - lambda * *x;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "adadelta_test.rs"]
mod tests;
