use super::Node;
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::model::{read_lock, write_lock, LookupParameterHandle, ParameterHandle};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Leaf holding a caller supplied tensor (`input`, `input_scalar`, `zeroes`).
#[derive(Debug)]
pub struct InputNode {
    label: &'static str,
    value: Tensor,
}

impl InputNode {
    pub fn new(value: Tensor) -> Self {
        InputNode {
            label: "input",
            value,
        }
    }

    pub fn zeroes(dim: &Dim) -> Self {
        InputNode {
            label: "zeroes",
            value: Tensor::zeros(dim),
        }
    }
}

impl Node for InputNode {
    fn name(&self) -> &'static str {
        self.label
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        super::expect_args(self.label, xs, 0)?;
        Ok(self.value.dim().clone())
    }

    fn forward(&mut self, _xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        fx.copy_from(&self.value)
    }

    fn backward(&self, _: &[&Tensor], _: &Tensor, _: &Tensor, _: usize, _: &mut Tensor) -> Result<(), NeuroGraphError> {
        Err(NeuroGraphError::NotSupported(format!("backward on {} node", self.label)))
    }

    /// The new value must keep the shape the node was created with.
    fn set_value(&mut self, value: Tensor) -> Result<(), NeuroGraphError> {
        if value.dim() != self.value.dim() {
            return Err(shape_mismatch("set_value", self.value.dim(), value.dim()));
        }
        self.value = value;
        Ok(())
    }

    fn describe(&self, _args: &[String]) -> String {
        format!("{} {}", self.label, self.value.dim())
    }
}

/// Leaf reading a dense parameter.
#[derive(Debug)]
pub struct ParameterNode {
    params: ParameterHandle,
}

impl ParameterNode {
    pub fn new(params: ParameterHandle) -> Self {
        ParameterNode { params }
    }
}

impl Node for ParameterNode {
    fn name(&self) -> &'static str {
        "parameter"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        super::expect_args("parameter", xs, 0)?;
        Ok(read_lock(&self.params)?.dim().clone())
    }

    fn forward(&mut self, _xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        fx.copy_from(read_lock(&self.params)?.values())
    }

    fn backward(&self, _: &[&Tensor], _: &Tensor, _: &Tensor, _: usize, _: &mut Tensor) -> Result<(), NeuroGraphError> {
        Err(NeuroGraphError::NotSupported("backward on parameter node".to_string()))
    }

    fn has_parameters(&self) -> bool {
        true
    }

    fn accumulate_grad(&self, g: &Tensor) -> Result<(), NeuroGraphError> {
        write_lock(&self.params)?.accumulate_grad(g)
    }

    fn describe(&self, _args: &[String]) -> String {
        let p = read_lock(&self.params);
        match p {
            Ok(p) => format!("parameters({}) {}", p.name(), p.dim()),
            Err(_) => "parameters(?)".to_string(),
        }
    }
}

/// Leaf selecting rows of a lookup table, one row per batch element.
///
/// A constant lookup reads the table but never sends gradients back to it.
#[derive(Debug)]
pub struct LookupNode {
    params: LookupParameterHandle,
    indices: Vec<usize>,
    trainable: bool,
}

impl LookupNode {
    /// Fails with `IndexOutOfBounds` if any index is past the end of the table.
    pub fn new(
        params: LookupParameterHandle,
        indices: Vec<usize>,
        trainable: bool,
    ) -> Result<Self, NeuroGraphError> {
        {
            let lp = read_lock(&params)?;
            if let Some(&bad) = indices.iter().find(|&&i| i >= lp.rows()) {
                return Err(NeuroGraphError::IndexOutOfBounds {
                    index: bad,
                    len: lp.rows(),
                });
            }
        }
        if indices.is_empty() {
            return Err(shape_mismatch("lookup", "at least one index", 0));
        }
        Ok(LookupNode {
            params,
            indices,
            trainable,
        })
    }
}

impl Node for LookupNode {
    fn name(&self) -> &'static str {
        if self.trainable {
            "lookup"
        } else {
            "const_lookup"
        }
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        super::expect_args(self.name(), xs, 0)?;
        Ok(read_lock(&self.params)?.dim().rebatch(self.indices.len()))
    }

    fn forward(&mut self, _xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let lp = read_lock(&self.params)?;
        for (b, &index) in self.indices.iter().enumerate() {
            fx.batch_mut(b).copy_from_slice(lp.row(index)?.values());
        }
        Ok(())
    }

    fn backward(&self, _: &[&Tensor], _: &Tensor, _: &Tensor, _: usize, _: &mut Tensor) -> Result<(), NeuroGraphError> {
        Err(NeuroGraphError::NotSupported("backward on lookup node".to_string()))
    }

    fn has_parameters(&self) -> bool {
        self.trainable
    }

    fn accumulate_grad(&self, g: &Tensor) -> Result<(), NeuroGraphError> {
        if !self.trainable {
            return Ok(());
        }
        let mut lp = write_lock(&self.params)?;
        for (b, &index) in self.indices.iter().enumerate() {
            lp.accumulate_grad(index, g.batch(b))?;
        }
        Ok(())
    }

    fn describe(&self, _args: &[String]) -> String {
        format!("{}({:?})", self.name(), self.indices)
    }
}
