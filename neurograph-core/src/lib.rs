// Core of the NeuroGraph engine: tensors, the operator library, the dynamic
// computation graph and the parameter model trained by `neurograph-optim`.
pub mod device;
pub mod dim;
pub mod error;
pub mod numeric;
pub mod tensor;

pub mod memory;
pub mod nodes;

pub mod graph;
pub mod expr;

pub mod model;
pub mod grad_check;

pub use device::StorageDevice;
pub use dim::Dim;
pub use error::NeuroGraphError;
pub use graph::{ComputationGraph, Expression, VariableIndex};
pub use model::{
    load_model, read_lock, save_model, write_lock, LookupParameterHandle, LookupParameters, Model,
    ParameterHandle, ParameterRef, Parameters,
};
pub use tensor::Tensor;
// Re-export traits required by public functions/structs
pub use num_traits;
