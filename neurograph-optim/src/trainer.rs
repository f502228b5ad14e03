use crate::shadow::ShadowKey;
use log::{debug, info, warn};
use neurograph_core::{write_lock, Model, NeuroGraphError, Tensor};

pub const DEFAULT_CLIP_THRESHOLD: f32 = 5.0;

/// How gradients are bounded before a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClippingType {
    /// Rescale every gradient uniformly when the global L2 norm is too large.
    GlobalNorm,
    /// Clamp each gradient component independently.
    Simple,
}

/// Hyper-parameters shared by every trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub learning_rate: f32,
    /// `eta = learning_rate / (1 + epoch * eta_decay)` after each [`Trainer::update_epoch`].
    pub eta_decay: f32,
    /// L2 weight decay, `λ` in the update rules.
    pub weight_decay: f32,
    pub clipping_enabled: bool,
    /// Per-example bound; scaled by the batch size at every step.
    pub clip_threshold: f32,
    pub clipping_type: ClippingType,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            learning_rate: 0.1,
            eta_decay: 0.0,
            weight_decay: 0.0,
            clipping_enabled: true,
            clip_threshold: DEFAULT_CLIP_THRESHOLD,
            clipping_type: ClippingType::GlobalNorm,
        }
    }
}

impl TrainerConfig {
    /// Default configuration with the given learning rate.
    pub fn with_learning_rate(learning_rate: f32) -> Self {
        TrainerConfig {
            learning_rate,
            ..TrainerConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), NeuroGraphError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(NeuroGraphError::ConfigurationError(format!(
                "Learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.eta_decay.is_finite() && self.eta_decay >= 0.0) {
            return Err(NeuroGraphError::ConfigurationError(format!(
                "Learning rate decay must be non-negative, got {}",
                self.eta_decay
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(NeuroGraphError::ConfigurationError(format!(
                "Weight decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.clipping_enabled && !(self.clip_threshold > 0.0) {
            return Err(NeuroGraphError::ConfigurationError(format!(
                "Clip threshold must be positive, got {}",
                self.clip_threshold
            )));
        }
        Ok(())
    }
}

/// Diagnostic counters reported by [`Trainer::status`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerStatus {
    pub eta: f32,
    pub clips: usize,
    pub updates: usize,
}

/// State common to every trainer: learning-rate schedule, clipping policy and
/// counters.
#[derive(Debug, Clone)]
pub struct TrainerBase {
    pub eta0: f32,
    pub eta: f32,
    pub eta_decay: f32,
    pub epoch: f32,
    pub lambda: f32,
    pub clipping_enabled: bool,
    pub clip_threshold: f32,
    pub clipping_type: ClippingType,
    pub clips: usize,
    pub updates: usize,
}

impl TrainerBase {
    pub fn new(config: &TrainerConfig) -> Result<Self, NeuroGraphError> {
        config.validate()?;
        if !config.clipping_enabled && config.clip_threshold != DEFAULT_CLIP_THRESHOLD {
            warn!(
                "TrainerBase: clip threshold {} is ignored while clipping is disabled",
                config.clip_threshold
            );
        }
        Ok(TrainerBase {
            eta0: config.learning_rate,
            eta: config.learning_rate,
            eta_decay: config.eta_decay,
            epoch: 0.0,
            lambda: config.weight_decay,
            clipping_enabled: config.clipping_enabled,
            clip_threshold: config.clip_threshold,
            clipping_type: config.clipping_type,
            clips: 0,
            updates: 0,
        })
    }

    /// Applies the clipping policy for a step over `samples` examples and
    /// returns the factor every gradient must be multiplied by.
    ///
    /// Global-norm clipping leaves the gradients untouched and returns
    /// `threshold * samples / norm` when the norm exceeds the scaled
    /// threshold. Simple clipping clamps the gradients in place and always
    /// returns 1.
    pub fn clip_gradients(&mut self, model: &Model, samples: f32) -> Result<f32, NeuroGraphError> {
        self.clip_gradients_with_norm(model, samples, None)
    }

    /// Same as [`TrainerBase::clip_gradients`], reusing `gradient_norm` when
    /// the caller already computed [`Model::gradient_l2_norm`] for this step.
    /// Simple clipping ignores it.
    pub fn clip_gradients_with_norm(
        &mut self,
        model: &Model,
        samples: f32,
        gradient_norm: Option<f32>,
    ) -> Result<f32, NeuroGraphError> {
        if !self.clipping_enabled {
            return Ok(1.0);
        }
        let bound = self.clip_threshold * samples;
        match self.clipping_type {
            ClippingType::Simple => {
                if model.simple_gradient_clipping(bound)? {
                    self.clips += 1;
                    debug!("TrainerBase: clamped gradient components to {}", bound);
                }
                Ok(1.0)
            }
            ClippingType::GlobalNorm => {
                let norm = match gradient_norm {
                    Some(norm) => norm,
                    None => model.gradient_l2_norm()?,
                };
                if norm > bound {
                    self.clips += 1;
                    debug!("TrainerBase: gradient norm {} clipped to {}", norm, bound);
                    Ok(bound / norm)
                } else {
                    Ok(1.0)
                }
            }
        }
    }

    /// Advances the epoch counter by `r` and decays the learning rate.
    pub fn update_epoch(&mut self, r: f32) {
        self.epoch += r;
        self.eta = self.eta0 / (1.0 + self.epoch * self.eta_decay);
    }
}

/// Rejects decay-like hyper-parameters (momentum, `rho`, betas) outside `[0, 1)`.
pub(crate) fn check_decay(owner: &str, what: &str, value: f32) -> Result<(), NeuroGraphError> {
    if !(0.0..1.0).contains(&value) {
        return Err(NeuroGraphError::ConfigurationError(format!(
            "{}: {} must be in [0, 1), got {}",
            owner, what, value
        )));
    }
    Ok(())
}

pub(crate) fn check_epsilon(owner: &str, value: f32) -> Result<(), NeuroGraphError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(NeuroGraphError::ConfigurationError(format!(
            "{}: epsilon must be positive, got {}",
            owner, value
        )));
    }
    Ok(())
}

/// Checks that an update rule sees matching values, gradient and shadow
/// lengths.
pub(crate) fn check_lengths(
    operation: &str,
    values: &Tensor,
    grad: &Tensor,
    shadow: &[Tensor],
) -> Result<(), NeuroGraphError> {
    let n = values.len();
    for t in std::iter::once(grad).chain(shadow.iter()) {
        if t.len() != n {
            return Err(NeuroGraphError::ShapeMismatch {
                operation: operation.to_string(),
                expected: values.dim().to_string(),
                actual: t.dim().to_string(),
            });
        }
    }
    Ok(())
}

/// An optimization algorithm driving a [`Model`].
///
/// Implementors supply the per-tensor rule ([`Trainer::update_tensor`]); the
/// provided [`Trainer::update`] handles clipping, iteration over dense
/// parameters and touched lookup rows, gradient clearing and counters.
pub trait Trainer {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn base(&self) -> &TrainerBase;

    fn base_mut(&mut self) -> &mut TrainerBase;

    /// Called once per step before any tensor is updated. Trainers with
    /// shadow state allocate it here.
    fn begin_update(&mut self, _model: &Model) -> Result<(), NeuroGraphError> {
        Ok(())
    }

    /// Applies the update rule to one tensor.
    ///
    /// The per-example gradient is `factor * grad`. `key` identifies the
    /// tensor's shadow slot.
    fn update_tensor(
        &mut self,
        key: ShadowKey,
        values: &mut Tensor,
        grad: &Tensor,
        factor: f32,
    ) -> Result<(), NeuroGraphError>;

    /// Performs one optimization step.
    ///
    /// `batch_size` is the number of examples the accumulated gradients were
    /// summed over; `scale` is an extra multiplier on every gradient. Every
    /// dense parameter and every touched lookup row is updated, then all
    /// gradients are cleared.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` for a non-positive `batch_size`; `NumericInstability`
    /// when a rule produces NaN or infinite values; lock failures from the model.
    fn update(&mut self, model: &Model, batch_size: f32, scale: f32) -> Result<(), NeuroGraphError> {
        self.update_with_norm(model, batch_size, scale, None)
    }

    /// [`Trainer::update`] with an optional gradient norm the caller already
    /// computed, so global-norm clipping skips its own pass over the gradients.
    ///
    /// # Errors
    ///
    /// As [`Trainer::update`], plus `ConfigurationError` for a negative or
    /// non-finite `gradient_norm`.
    fn update_with_norm(
        &mut self,
        model: &Model,
        batch_size: f32,
        scale: f32,
        gradient_norm: Option<f32>,
    ) -> Result<(), NeuroGraphError> {
        if let Some(norm) = gradient_norm {
            if !(norm.is_finite() && norm >= 0.0) {
                return Err(NeuroGraphError::ConfigurationError(format!(
                    "Gradient norm must be finite and non-negative, got {}",
                    norm
                )));
            }
        }
        if !(batch_size.is_finite() && batch_size > 0.0) {
            return Err(NeuroGraphError::ConfigurationError(format!(
                "Batch size must be positive, got {}",
                batch_size
            )));
        }
        let name = self.name();
        let gscale = self
            .base_mut()
            .clip_gradients_with_norm(model, batch_size, gradient_norm)?;
        let factor = scale * gscale / batch_size;
        self.begin_update(model)?;

        for (i, p) in model.parameters_list().iter().enumerate() {
            let mut p = write_lock(p)?;
            let (values, grad) = p.values_and_grad_mut();
            self.update_tensor(ShadowKey::Dense(i), values, grad, factor)?;
            if !values.is_valid() {
                return Err(NeuroGraphError::NumericInstability {
                    operation: name.to_string(),
                    index: i,
                    phase: "update".to_string(),
                });
            }
            p.clear();
        }

        let mut rows = 0;
        for (table, lp) in model.lookup_parameters_list().iter().enumerate() {
            let mut lp = write_lock(lp)?;
            rows += lp.touched_count();
            lp.update_touched_rows(|row, values, grad| {
                self.update_tensor(ShadowKey::Row { table, row }, values, grad, factor)?;
                if values.is_valid() {
                    Ok(())
                } else {
                    Err(NeuroGraphError::NumericInstability {
                        operation: name.to_string(),
                        index: row,
                        phase: "update".to_string(),
                    })
                }
            })?;
            lp.clear();
        }

        self.base_mut().updates += 1;
        debug!(
            "{}: update {} applied to {} dense parameters and {} lookup rows (gscale = {})",
            name,
            self.base().updates,
            model.parameters_list().len(),
            rows,
            gscale
        );
        Ok(())
    }

    /// Advances the epoch counter by `r` and decays the learning rate.
    fn update_epoch(&mut self, r: f32) {
        self.base_mut().update_epoch(r);
        debug!("{}: epoch {}, eta = {}", self.name(), self.base().epoch, self.base().eta);
    }

    /// Logs and returns the counters since the last call, then resets them.
    fn status(&mut self) -> TrainerStatus {
        let name = self.name();
        let base = self.base_mut();
        let status = TrainerStatus {
            eta: base.eta,
            clips: base.clips,
            updates: base.updates,
        };
        info!(
            "{}: [epoch={} eta={} clips={} updates={}]",
            name, base.epoch, base.eta, base.clips, base.updates
        );
        base.clips = 0;
        base.updates = 0;
        status
    }
}

#[cfg(test)]
#[path = "trainer_test.rs"]
mod tests;
