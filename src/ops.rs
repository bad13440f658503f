//! Dense vector kernels over weight buffers.
//!
//! Every function combining two buffers requires them to have the same length, a
//! mismatch is a programming error and panics.

use rayon::prelude::*;

/// Adds `src` into `dst` elementwise.
///
/// # Panics
/// If `dst` and `src` have different lengths.
pub fn add(dst: &mut [f32], src: &[f32]) {
    assert_same_len(dst.len(), src.len());
    dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
}

/// Subtracts `src` from `dst` elementwise.
///
/// # Panics
/// If `dst` and `src` have different lengths.
pub fn subtract(dst: &mut [f32], src: &[f32]) {
    assert_same_len(dst.len(), src.len());
    dst.iter_mut().zip(src).for_each(|(d, s)| *d -= s);
}

/// Scales every entry of `dst` by `scalar`.
pub fn multiply(dst: &mut [f32], scalar: f32) {
    dst.iter_mut().for_each(|d| *d *= scalar);
}

/// Divides every entry of `dst` by `scalar`.
pub fn divide(dst: &mut [f32], scalar: f32) {
    multiply(dst, 1. / scalar);
}

pub fn reset_to_zero(dst: &mut [f32]) {
    dst.fill(0.);
}

/// Computes the inner product of `a` and `b`.
///
/// # Panics
/// If `a` and `b` have different lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_same_len(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Overwrites `dst` with the contents of `src`.
///
/// # Panics
/// If `dst` and `src` have different lengths.
pub fn copy(dst: &mut [f32], src: &[f32]) {
    assert_same_len(dst.len(), src.len());
    dst.copy_from_slice(src);
}

/// Writes the elementwise arithmetic mean of `replicas` into `dst`.
///
/// # Arguments
/// * `dst` - The output buffer, its previous contents are discarded.
/// * `replicas` - The buffers to average, there must be at least one.
///
/// # Panics
/// If `replicas` is empty or any replica's length differs from `dst`'s.
pub fn mean_into<R: AsRef<[f32]> + Sync>(dst: &mut [f32], replicas: &[R]) {
    assert!(!replicas.is_empty(), "cannot average zero replicas");
    for replica in replicas {
        assert_same_len(dst.len(), replica.as_ref().len());
    }

    let count = replicas.len() as f32;
    dst.par_iter_mut().enumerate().for_each(|(i, d)| {
        *d = replicas.iter().map(|r| r.as_ref()[i]).sum::<f32>() / count;
    });
}

#[inline]
fn assert_same_len(a: usize, b: usize) {
    assert_eq!(a, b, "vector length mismatch: {a} != {b}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elementwise_ops() {
        let mut w = [1., 2., 3.];

        add(&mut w, &[1., 1., 1.]);
        assert_eq!(w, [2., 3., 4.]);

        subtract(&mut w, &[2., 2., 2.]);
        assert_eq!(w, [0., 1., 2.]);

        multiply(&mut w, 4.);
        assert_eq!(w, [0., 4., 8.]);

        divide(&mut w, 2.);
        assert_eq!(w, [0., 2., 4.]);

        reset_to_zero(&mut w);
        assert_eq!(w, [0.; 3]);
    }

    #[test]
    fn dot_and_copy() {
        assert_eq!(dot(&[1., 2., 3.], &[4., 5., 6.]), 32.);

        let mut dst = [0.; 2];
        copy(&mut dst, &[7., 8.]);
        assert_eq!(dst, [7., 8.]);
    }

    #[test]
    fn mean_of_replicas() {
        let replicas = vec![vec![1., 2.], vec![3., 6.]];
        let mut out = [9.; 2];
        mean_into(&mut out, &replicas);
        assert_eq!(out, [2., 4.]);
    }

    #[test]
    #[should_panic(expected = "vector length mismatch")]
    fn add_mismatch_panics() {
        let mut w = [0.; 2];
        add(&mut w, &[1.; 3]);
    }

    #[test]
    #[should_panic(expected = "vector length mismatch")]
    fn dot_mismatch_panics() {
        dot(&[0.; 4], &[1.; 3]);
    }
}
