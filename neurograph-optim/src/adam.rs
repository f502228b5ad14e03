use crate::shadow::{ShadowKey, ShadowStore};
use crate::trainer::{check_decay, check_epsilon, check_lengths, Trainer, TrainerBase, TrainerConfig};
use log::debug;
use neurograph_core::{Model, NeuroGraphError, Tensor};

pub const DEFAULT_LEARNING_RATE: f32 = 0.001;
pub const DEFAULT_BETA1: f32 = 0.9;
pub const DEFAULT_BETA2: f32 = 0.999;
pub const DEFAULT_EPSILON: f32 = 1e-8;

/// Adam with bias-corrected first and second moment estimates.
///
/// The step counter `t` belongs to the trainer and advances once per
/// [`Trainer::update`], so every parameter and lookup row updated in the same
/// step uses the same bias correction.
#[derive(Debug)]
pub struct AdamTrainer {
    base: TrainerBase,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    /// Buffer 0 holds the first moment `m`, buffer 1 the second moment `v`.
    moments: ShadowStore,
}

impl AdamTrainer {
    pub fn new(
        config: TrainerConfig,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Result<Self, NeuroGraphError> {
        check_decay("AdamTrainer", "beta1", beta1)?;
        check_decay("AdamTrainer", "beta2", beta2)?;
        check_epsilon("AdamTrainer", epsilon)?;
        let base = TrainerBase::new(&config)?;
        debug!(
            "AdamTrainer: created with eta = {}, betas = ({}, {}), epsilon = {}",
            base.eta, beta1, beta2, epsilon
        );
        Ok(AdamTrainer {
            base,
            beta1,
            beta2,
            epsilon,
            t: 0,
            moments: ShadowStore::new("AdamTrainer", 2),
        })
    }

    /// Number of steps taken so far.
    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.moments
    }
}

impl Trainer for AdamTrainer {
    fn name(&self) -> &'static str {
        "AdamTrainer"
    }

    fn base(&self) -> &TrainerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TrainerBase {
        &mut self.base
    }

    fn begin_update(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        self.moments.allocate(model)?;
        self.t += 1;
        Ok(())
    }

    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError> {
        if self.t == 0 {
            return Err(NeuroGraphError::NotSupported(
                "AdamTrainer: update_tensor called outside of an update step".to_string(),
            ));
        }
        let (eta, lambda, eps) = (self.base.eta, self.base.lambda, self.epsilon);
        let (beta1, beta2) = (self.beta1, self.beta2);
        let t = self.t.min(i32::MAX as u64) as i32;
        let s1 = 1.0 - beta1.powi(t);
        let s2 = 1.0 - beta2.powi(t);

        let slot = self.moments.slot(key)?;
        check_lengths("AdamTrainer", values, grad, slot)?;
        let [m, v] = slot else {
            return Err(NeuroGraphError::NotSupported(
                "AdamTrainer: expected two shadow buffers".to_string(),
            ));
        };
        let elements = values
            .values_mut()
            .iter_mut()
            .zip(grad.values())
            .zip(m.values_mut().iter_mut().zip(v.values_mut()));
        for ((x, &g), (m, v)) in elements {
            let g = factor * g;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / s1;
            let v_hat = *v / s2;
            *x += -eta * m_hat / (v_hat.sqrt() + eps) - lambda * *x;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "adam_test.rs"]
mod tests;
