use super::{batches, broadcast_batch, expect_args, Node};
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Stacks arguments vertically. Every argument must have the same number of columns.
#[derive(Debug, Default)]
pub struct Concatenate;

impl Concatenate {
    /// Row offset of argument `i` in the output.
    fn offset(xs: &[&Tensor], i: usize) -> usize {
        xs[..i].iter().map(|x| x.dim().rows()).sum()
    }
}

impl Node for Concatenate {
    fn name(&self) -> &'static str {
        "concatenate"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        let first = xs
            .first()
            .ok_or_else(|| shape_mismatch("concatenate", "at least one argument", 0))?;
        let cols = first.cols();
        let mut rows = 0;
        for d in xs {
            if d.ndims() > 2 || d.cols() != cols {
                return Err(shape_mismatch("concatenate", format!("{{_,{}}}", cols), d));
            }
            rows += d.rows();
        }
        let bd = broadcast_batch("concatenate", xs)?;
        let dims: &[usize] = if cols == 1 { &[rows] } else { &[rows, cols] };
        Ok(Dim::with_batch(dims, bd))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let total = fx.dim().rows();
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            let mut offset = 0;
            for x in xs {
                let r = x.dim().rows();
                for (j, col) in x.batch(b).chunks(r).enumerate() {
                    out[j * total + offset..j * total + offset + r].copy_from_slice(col);
                }
                offset += r;
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let total = fx.dim().rows();
        let offset = Concatenate::offset(xs, i);
        let r = xs[i].dim().rows();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            for (j, col) in d_edxi.batch_mut(b).chunks_mut(r).enumerate() {
                for (k, g) in col.iter_mut().enumerate() {
                    *g += d[j * total + offset + k];
                }
            }
        }
        Ok(())
    }
}

/// Places arguments side by side. Every argument must have the same number of rows.
#[derive(Debug, Default)]
pub struct ConcatenateCols;

impl Node for ConcatenateCols {
    fn name(&self) -> &'static str {
        "concatenate_cols"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        let first = xs
            .first()
            .ok_or_else(|| shape_mismatch("concatenate_cols", "at least one argument", 0))?;
        let rows = first.rows();
        let mut cols = 0;
        for d in xs {
            if d.ndims() > 2 || d.rows() != rows {
                return Err(shape_mismatch("concatenate_cols", format!("{{{},_}}", rows), d));
            }
            cols += d.cols();
        }
        let bd = broadcast_batch("concatenate_cols", xs)?;
        Ok(Dim::with_batch(&[rows, cols], bd))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            let mut offset = 0;
            for x in xs {
                let v = x.batch(b);
                out[offset..offset + v.len()].copy_from_slice(v);
                offset += v.len();
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let offset: usize = xs[..i].iter().map(|x| x.dim().batch_size()).sum();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            for (k, g) in d_edxi.batch_mut(b).iter_mut().enumerate() {
                *g += d[offset + k];
            }
        }
        Ok(())
    }
}

/// Reinterprets the values under a new shape with the same number of elements.
#[derive(Debug)]
pub struct Reshape {
    to: Dim,
}

impl Reshape {
    pub fn new(to: Dim) -> Self {
        Reshape { to }
    }
}

impl Node for Reshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("reshape", xs, 1)?;
        let x = xs[0];
        if self.to.batch_elems() == 1 && self.to.batch_size() == x.batch_size() {
            Ok(self.to.rebatch(x.batch_elems()))
        } else if self.to.size() == x.size() {
            Ok(self.to.clone())
        } else {
            Err(shape_mismatch("reshape", x, &self.to))
        }
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        fx.values_mut().copy_from_slice(xs[0].values());
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for (g, d) in d_edxi.values_mut().iter_mut().zip(d_edf.values()) {
            *g += d;
        }
        Ok(())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("reshape({}, {})", args[0], self.to)
    }
}

/// Matrix transpose of every batch element.
#[derive(Debug, Default)]
pub struct Transpose;

impl Node for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("transpose", xs, 1)?;
        if xs[0].ndims() > 2 {
            return Err(shape_mismatch("transpose", "a matrix", xs[0]));
        }
        Ok(xs[0].transpose())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let (r, c) = (xs[0].dim().rows(), xs[0].dim().cols());
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for j in 0..c {
                for i in 0..r {
                    out[i * c + j] = x[j * r + i];
                }
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let (r, c) = (xs[0].dim().rows(), xs[0].dim().cols());
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            let g = d_edxi.batch_mut(b);
            for j in 0..c {
                for i in 0..r {
                    g[j * r + i] += d[i * c + j];
                }
            }
        }
        Ok(())
    }
}

/// Selects one row of a vector per batch element.
///
/// A single index applies to every batch element; otherwise there is one index
/// per batch element.
#[derive(Debug)]
pub struct Pick {
    indices: Vec<usize>,
}

impl Pick {
    pub fn new(indices: Vec<usize>) -> Self {
        Pick { indices }
    }

    fn index(&self, b: usize) -> usize {
        if self.indices.len() == 1 {
            self.indices[0]
        } else {
            self.indices[b]
        }
    }
}

impl Node for Pick {
    fn name(&self) -> &'static str {
        "pick"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("pick", xs, 1)?;
        let x = xs[0];
        if !x.is_vector() {
            return Err(shape_mismatch("pick", "a vector", x));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= x.rows()) {
            return Err(NeuroGraphError::IndexOutOfBounds {
                index: bad,
                len: x.rows(),
            });
        }
        let n = self.indices.len();
        if n == 0 || (n > 1 && x.batch_elems() != 1 && x.batch_elems() != n) {
            return Err(shape_mismatch("pick", format!("{} indices", x.batch_elems()), n));
        }
        Ok(Dim::with_batch(&[1], x.batch_elems().max(n)))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            fx.batch_mut(b)[0] = xs[0].batch(b)[self.index(b)];
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            d_edxi.batch_mut(b)[self.index(b)] += d_edf.batch(b)[0];
        }
        Ok(())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("pick({}, {:?})", args[0], self.indices)
    }
}

/// Rows `[start, end)` of a vector.
#[derive(Debug)]
pub struct PickRange {
    start: usize,
    end: usize,
}

impl PickRange {
    pub fn new(start: usize, end: usize) -> Self {
        PickRange { start, end }
    }
}

impl Node for PickRange {
    fn name(&self) -> &'static str {
        "pick_range"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("pick_range", xs, 1)?;
        let x = xs[0];
        if !x.is_vector() || self.start >= self.end || self.end > x.rows() {
            return Err(shape_mismatch(
                "pick_range",
                format!("a vector with at least {} rows", self.end),
                x,
            ));
        }
        Ok(Dim::with_batch(&[self.end - self.start], x.batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            fx.batch_mut(b)
                .copy_from_slice(&xs[0].batch(b)[self.start..self.end]);
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let g = &mut d_edxi.batch_mut(b)[self.start..self.end];
            for (g, d) in g.iter_mut().zip(d_edf.batch(b)) {
                *g += d;
            }
        }
        Ok(())
    }
}

/// Columns `[start, end)` of a matrix.
#[derive(Debug)]
pub struct ColumnSlices {
    start: usize,
    end: usize,
}

impl ColumnSlices {
    pub fn new(start: usize, end: usize) -> Self {
        ColumnSlices { start, end }
    }
}

impl Node for ColumnSlices {
    fn name(&self) -> &'static str {
        "column_slices"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("column_slices", xs, 1)?;
        let x = xs[0];
        if x.ndims() > 2 || self.start >= self.end || self.end > x.cols() {
            return Err(shape_mismatch(
                "column_slices",
                format!("a matrix with at least {} columns", self.end),
                x,
            ));
        }
        Ok(Dim::with_batch(&[x.rows(), self.end - self.start], x.batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let r = xs[0].dim().rows();
        for b in 0..batches(fx) {
            fx.batch_mut(b)
                .copy_from_slice(&xs[0].batch(b)[self.start * r..self.end * r]);
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let r = xs[0].dim().rows();
        for b in 0..batches(d_edf) {
            let g = &mut d_edxi.batch_mut(b)[self.start * r..self.end * r];
            for (g, d) in g.iter_mut().zip(d_edf.batch(b)) {
                *g += d;
            }
        }
        Ok(())
    }
}

/// Sums each group of `nrows` consecutive rows into one row.
#[derive(Debug)]
pub struct FoldRows {
    nrows: usize,
}

impl FoldRows {
    pub fn new(nrows: usize) -> Self {
        FoldRows { nrows }
    }
}

impl Node for FoldRows {
    fn name(&self) -> &'static str {
        "fold_rows"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("fold_rows", xs, 1)?;
        let x = xs[0];
        if x.ndims() > 2 || self.nrows == 0 || x.rows() % self.nrows != 0 {
            return Err(shape_mismatch(
                "fold_rows",
                format!("rows divisible by {}", self.nrows),
                x,
            ));
        }
        Ok(Dim::with_batch(&[x.rows() / self.nrows, x.cols()], x.batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let r = xs[0].dim().rows();
        let orows = r / self.nrows;
        fx.zero();
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for (k, v) in x.iter().enumerate() {
                let (row, col) = (k % r, k / r);
                out[col * orows + row / self.nrows] += v;
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let r = xs[0].dim().rows();
        let orows = r / self.nrows;
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            for (k, g) in d_edxi.batch_mut(b).iter_mut().enumerate() {
                let (row, col) = (k % r, k / r);
                *g += d[col * orows + row / self.nrows];
            }
        }
        Ok(())
    }
}
