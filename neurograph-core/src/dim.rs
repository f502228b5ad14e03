use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape descriptor: an ordered list of dimension sizes plus a trailing batch count.
///
/// `d[0]` is the number of rows and `d[1]` the number of columns; missing
/// dimensions count as 1, so a vector of length `n` is an `n x 1` matrix.
/// Every batch element has the same shape `d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
    d: Vec<usize>,
    bd: usize,
}

impl Dim {
    /// Creates a shape with a single batch element.
    pub fn new(dims: &[usize]) -> Self {
        Dim::with_batch(dims, 1)
    }

    /// Creates a shape with `bd` batch elements. A batch count of 0 is treated as 1.
    pub fn with_batch(dims: &[usize], bd: usize) -> Self {
        Dim {
            d: dims.to_vec(),
            bd: bd.max(1),
        }
    }

    /// Shape of a single scalar.
    pub fn scalar() -> Self {
        Dim::new(&[1])
    }

    pub fn dims(&self) -> &[usize] {
        &self.d
    }

    pub fn ndims(&self) -> usize {
        self.d.len()
    }

    pub fn rows(&self) -> usize {
        self.d.first().copied().unwrap_or(1)
    }

    pub fn cols(&self) -> usize {
        self.d.get(1).copied().unwrap_or(1)
    }

    /// Number of batch elements.
    pub fn batch_elems(&self) -> usize {
        self.bd
    }

    /// Number of values in one batch element.
    pub fn batch_size(&self) -> usize {
        self.d.iter().product()
    }

    /// Total number of values across all batch elements.
    pub fn size(&self) -> usize {
        self.batch_size() * self.bd
    }

    /// Sum of the dimension sizes, used by Glorot initialization.
    pub fn sum_dims(&self) -> usize {
        self.d.iter().sum()
    }

    /// The same shape with the batch count dropped to 1.
    pub fn single_batch(&self) -> Dim {
        Dim::with_batch(&self.d, 1)
    }

    /// The same per-element shape with a different batch count.
    pub fn rebatch(&self, bd: usize) -> Dim {
        Dim::with_batch(&self.d, bd)
    }

    /// Swaps rows and columns. Higher dimensions are preserved.
    pub fn transpose(&self) -> Dim {
        let d = match self.d.len() {
            0 => vec![1, 1],
            // {n} -> {1, n}
            1 => vec![1, self.d[0]],
            _ => {
                let mut d = self.d.clone();
                d.swap(0, 1);
                d
            }
        };
        Dim::with_batch(&d, self.bd)
    }

    /// True when one batch element holds a single value.
    pub fn is_scalar(&self) -> bool {
        self.batch_size() == 1
    }

    /// True when this shape has at most two dimensions and a single column.
    pub fn is_vector(&self) -> bool {
        self.d.len() <= 2 && self.cols() == 1
    }
}

impl Default for Dim {
    fn default() -> Self {
        Dim::scalar()
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, d) in self.d.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        if self.bd > 1 {
            write!(f, "X{}", self.bd)?;
        }
        write!(f, "}}")
    }
}
