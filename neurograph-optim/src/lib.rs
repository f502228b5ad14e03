//! Trainers for NeuroGraph models.
//!
//! Every trainer implements [`Trainer`]: one call to [`Trainer::update`]
//! consumes the gradients accumulated on a [`neurograph_core::Model`] by
//! backward passes, applies the trainer's rule to every dense parameter and to
//! every touched lookup row, and clears the gradients.

pub mod shadow;
pub mod trainer;

pub mod adadelta;
pub mod adagrad;
pub mod adam;
pub mod momentum;
pub mod rmsprop;
pub mod sgd;

pub use adadelta::AdadeltaTrainer;
pub use adagrad::AdagradTrainer;
pub use adam::AdamTrainer;
pub use momentum::MomentumTrainer;
pub use rmsprop::{RmsPropMomentumTrainer, RmsPropTrainer};
pub use sgd::SgdTrainer;
pub use shadow::{ShadowKey, ShadowState, ShadowStore};
pub use trainer::{ClippingType, Trainer, TrainerBase, TrainerConfig, TrainerStatus};
