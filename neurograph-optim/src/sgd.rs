use crate::shadow::ShadowKey;
use crate::trainer::{check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{NeuroGraphError, Tensor};

/// Plain stochastic gradient descent: `θ -= η·g + λ·θ`.
#[derive(Debug, Clone)]
pub struct SgdTrainer {
    base: TrainerBase,
}

impl SgdTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self, NeuroGraphError> {
        let base = TrainerBase::new(&config)?;
        debug!("SgdTrainer: created with eta = {}, lambda = {}", base.eta, base.lambda);
        Ok(SgdTrainer { base })
    }
}

impl Trainer for SgdTrainer {
    fn name(&self) -> &'static str {
        "SgdTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn update_tensor(
        &mut self,
        _key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        check_lengths("SgdTrainer", values, grad, &[])?;
        let step = self.base.eta * factor;
        let lambda = self.base.lambda;
        for (v, &g) in values.values_mut().iter_mut().zip(grad.values()) {
            *v -= step * g + lambda * *v;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "sgd_test.rs"]
mod tests;
