//! Column-major matrix kernels. All of them accumulate into `c`.

/// `c (m x n) += a (m x k) * b (k x n)`
pub(crate) fn gemm_nn(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    for j in 0..n {
        for p in 0..k {
            let bpj = b[j * k + p];
            if bpj == 0.0 {
                continue;
            }
            let a_col = &a[p * m..(p + 1) * m];
            let c_col = &mut c[j * m..(j + 1) * m];
            for (ci, &ai) in c_col.iter_mut().zip(a_col) {
                *ci += ai * bpj;
            }
        }
    }
}

/// `c (k x n) += a^T * b` where `a` is `m x k` and `b` is `m x n`.
pub(crate) fn gemm_tn(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    for j in 0..n {
        let b_col = &b[j * m..(j + 1) * m];
        for p in 0..k {
            let a_col = &a[p * m..(p + 1) * m];
            let dot: f32 = a_col.iter().zip(b_col).map(|(x, y)| x * y).sum();
            c[j * k + p] += dot;
        }
    }
}

/// `c (m x k) += a * b^T` where `a` is `m x n` and `b` is `k x n`.
pub(crate) fn gemm_nt(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    for j in 0..n {
        let a_col = &a[j * m..(j + 1) * m];
        for p in 0..k {
            let bpj = b[j * k + p];
            if bpj == 0.0 {
                continue;
            }
            let c_col = &mut c[p * m..(p + 1) * m];
            for (ci, &ai) in c_col.iter_mut().zip(a_col) {
                *ci += ai * bpj;
            }
        }
    }
}
