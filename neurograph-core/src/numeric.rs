//! Small numeric kernels shared by tensors, parameters and gradient checking.

use num_traits::Float;

/// Returns `true` when every element compares equal to itself and is finite.
///
/// `x == x` rejects NaN; the finiteness test rejects the infinities.
#[allow(clippy::eq_op)]
pub fn is_valid<T: Float>(xs: &[T]) -> bool {
    xs.iter().all(|&x| x == x && x.is_finite())
}

/// Sum of squared elements.
pub fn squared_norm<T: Float>(xs: &[T]) -> T {
    xs.iter().fold(T::zero(), |acc, &x| acc + x * x)
}

/// `ys += a * xs`, element-wise.
pub fn axpy<T: Float>(a: T, xs: &[T], ys: &mut [T]) {
    for (y, &x) in ys.iter_mut().zip(xs.iter()) {
        *y = *y + a * x;
    }
}

/// Numerically stable `log(sum(exp(x_i)))`.
pub fn logsumexp<T: Float>(xs: &[T]) -> T {
    let m = xs.iter().fold(T::neg_infinity(), |m, &x| m.max(x));
    if m == T::neg_infinity() {
        return m;
    }
    let z = xs.iter().fold(T::zero(), |acc, &x| acc + (x - m).exp());
    m + z.ln()
}

/// Index of the first maximal element. Ties resolve to the lowest index.
pub fn first_argmax<T: Float>(xs: &[T]) -> usize {
    let mut best = 0;
    for (i, &x) in xs.iter().enumerate().skip(1) {
        if x > xs[best] {
            best = i;
        }
    }
    best
}
