//! Arithmetic on values stored in lattice order.
//!
//! Grid weights are enumerated in mixed-radix order with axis 0 varying fastest, so the
//! weights of a lattice with resolution `Npa` form a dense `Npa[0] × … × Npa[d-1]` array.
//! The linear time update needs two operations on such arrays:
//!
//! - [`LatticeInterpolator`]: tensor-product cubic interpolation (Keys kernel, `a = -1/2`)
//!   at fractional lattice indices, zero outside the lattice;
//! - [`convolve`]: linear convolution with a kernel sampled at integer lattice offsets,
//!   computed with multidimensional FFTs.
//!
//! The cubic kernel reproduces quadratics, so resampling a density onto another lattice keeps
//! its second moment.
use rayon::prelude::*;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Strides of a mixed-radix lattice with axis 0 varying fastest.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in 1..shape.len() {
        strides[axis] = strides[axis - 1] * shape[axis - 1];
    }
    strides
}

fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (1.5 * t - 2.5) * t * t + 1.0
    } else if t < 2.0 {
        ((-0.5 * t + 2.5) * t - 4.0) * t + 2.0
    } else {
        0.0
    }
}

/// Cubic interpolation of values stored on a regular lattice.
#[derive(Clone, Debug)]
pub struct LatticeInterpolator<'a> {
    values: &'a [f64],
    shape: &'a [usize],
    strides: Vec<usize>,
}
impl<'a> LatticeInterpolator<'a> {
    pub fn new(values: &'a [f64], shape: &'a [usize]) -> Self {
        debug_assert_eq!(values.len(), shape.iter().product::<usize>());
        LatticeInterpolator {
            values,
            shape,
            strides: strides(shape),
        }
    }
    /// Value at the fractional lattice index `u`.
    ///
    /// Nodes outside the lattice count as zero. The cubic can overshoot below zero next to
    /// steep edges; such values are clipped since the interpolated quantity is a density.
    pub fn value(&self, u: &[f64]) -> f64 {
        let d = self.shape.len();
        let mut base = vec![0isize; d];
        let mut taps = vec![[0.0f64; 4]; d];
        for axis in 0..d {
            let n = self.shape[axis] as f64;
            if !(u[axis] > -1.0 && u[axis] < n) {
                return 0.0;
            }
            let b = u[axis].floor();
            base[axis] = b as isize - 1;
            for (c, w) in taps[axis].iter_mut().enumerate() {
                *w = cubic_weight(u[axis] - (b - 1.0 + c as f64));
            }
        }
        let mut total = 0.0;
        'combos: for combo in 0..4usize.pow(d as u32) {
            let mut rest = combo;
            let mut index = 0usize;
            let mut weight = 1.0;
            for axis in 0..d {
                let c = rest % 4;
                rest /= 4;
                let i = base[axis] + c as isize;
                if i < 0 || i >= self.shape[axis] as isize {
                    continue 'combos;
                }
                index += i as usize * self.strides[axis];
                weight *= taps[axis][c];
            }
            total += weight * self.values[index];
        }
        total.max(0.0)
    }
}

/// Smallest length `>= n` whose only prime factors are 2, 3 and 5.
fn fft_length(n: usize) -> usize {
    (n.max(1)..)
        .find(|&m| {
            let mut m = m;
            for p in [2, 3, 5] {
                while m % p == 0 {
                    m /= p;
                }
            }
            m == 1
        })
        .unwrap_or(n)
}

/// Flat index of lattice point `i` inside a padded array.
fn padded_index(i: usize, shape: &[usize], padded_strides: &[usize]) -> usize {
    let mut rest = i;
    let mut index = 0;
    for (n, stride) in shape.iter().zip(padded_strides) {
        index += (rest % n) * stride;
        rest /= n;
    }
    index
}

/// In-place d-dimensional FFT of an array with the given shape, one axis at a time.
fn transform(
    data: &mut [Complex<f64>],
    shape: &[usize],
    planner: &mut FftPlanner<f64>,
    inverse: bool,
) {
    let strides = strides(shape);
    for (axis, &len) in shape.iter().enumerate() {
        if len < 2 {
            continue;
        }
        let fft = if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        };
        let stride = strides[axis];
        if stride == 1 {
            data.par_chunks_mut(len).for_each(|line| fft.process(line));
            continue;
        }
        // Gather the lines along `axis` into contiguous rows and scatter them back afterwards.
        let line_start = |line: usize| (line % stride) + (line / stride) * stride * len;
        let mut rows = vec![Complex::new(0.0, 0.0); data.len()];
        for (line, row) in rows.chunks_exact_mut(len).enumerate() {
            let start = line_start(line);
            for (j, v) in row.iter_mut().enumerate() {
                *v = data[start + j * stride];
            }
        }
        rows.par_chunks_mut(len).for_each(|row| fft.process(row));
        for (line, row) in rows.chunks_exact(len).enumerate() {
            let start = line_start(line);
            for (j, v) in row.iter().enumerate() {
                data[start + j * stride] = *v;
            }
        }
    }
}

/// Linear convolution of lattice values with a kernel given at integer offsets.
///
/// Computes `out[i] = Σ_k values[i - k] · kernel(k)` over offsets `|k_a| <= kernel_radius[a]`,
/// with values outside the lattice taken as zero. The output has the shape of `values`.
/// Every axis is zero-padded to at least `shape[a] + kernel_radius[a]` points, which keeps
/// the circular FFT convolution from wrapping onto the lattice. `kernel_radius[a]` must be
/// below `shape[a]`.
///
/// Results are clipped at zero to remove FFT round-off around vanishing values.
pub fn convolve<K>(
    values: &[f64],
    shape: &[usize],
    kernel_radius: &[usize],
    kernel: K,
) -> Vec<f64>
where
    K: Fn(&[f64]) -> f64,
{
    let d = shape.len();
    debug_assert_eq!(kernel_radius.len(), d);
    debug_assert!(shape.iter().zip(kernel_radius).all(|(n, r)| r < n));
    let padded: Vec<usize> = shape
        .iter()
        .zip(kernel_radius)
        .map(|(&n, &r)| fft_length(n + r))
        .collect();
    let padded_strides = strides(&padded);
    let total: usize = padded.iter().product();

    let mut signal = vec![Complex::new(0.0, 0.0); total];
    for (i, v) in values.iter().enumerate() {
        signal[padded_index(i, shape, &padded_strides)] = Complex::new(*v, 0.0);
    }
    let widths: Vec<usize> = kernel_radius.iter().map(|r| 2 * r + 1).collect();
    let mut response = vec![Complex::new(0.0, 0.0); total];
    let mut offset = vec![0.0; d];
    for tap in 0..widths.iter().product::<usize>() {
        let mut rest = tap;
        let mut index = 0;
        for axis in 0..d {
            let k = (rest % widths[axis]) as isize - kernel_radius[axis] as isize;
            rest /= widths[axis];
            offset[axis] = k as f64;
            index += k.rem_euclid(padded[axis] as isize) as usize * padded_strides[axis];
        }
        response[index] = Complex::new(kernel(&offset), 0.0);
    }

    let mut planner = FftPlanner::new();
    transform(&mut signal, &padded, &mut planner, false);
    transform(&mut response, &padded, &mut planner, false);
    signal
        .par_iter_mut()
        .zip(response.par_iter())
        .for_each(|(s, r)| *s = *s * *r);
    transform(&mut signal, &padded, &mut planner, true);

    let scale = 1.0 / total as f64;
    (0..values.len())
        .map(|i| (signal[padded_index(i, shape, &padded_strides)].re * scale).max(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Direct evaluation of the sum that `convolve` computes.
    fn direct(
        values: &[f64],
        shape: &[usize],
        radius: &[usize],
        kernel: impl Fn(&[f64]) -> f64,
    ) -> Vec<f64> {
        let st = strides(shape);
        let widths: Vec<usize> = radius.iter().map(|r| 2 * r + 1).collect();
        let mut out = vec![0.0; values.len()];
        for (i, o) in out.iter_mut().enumerate() {
            for tap in 0..widths.iter().product::<usize>() {
                let mut rest = tap;
                let mut source = 0isize;
                let mut offset = Vec::new();
                let mut inside = true;
                for axis in 0..shape.len() {
                    let k = (rest % widths[axis]) as isize - radius[axis] as isize;
                    rest /= widths[axis];
                    let j = ((i / st[axis]) % shape[axis]) as isize - k;
                    inside &= j >= 0 && j < shape[axis] as isize;
                    source += j * st[axis] as isize;
                    offset.push(k as f64);
                }
                if inside {
                    *o += values[source as usize] * kernel(&offset);
                }
            }
        }
        out
    }

    #[test]
    fn strides_follow_axis_zero_fastest() {
        assert_eq!(strides(&[3, 5, 7]), vec![1, 3, 15]);
        assert_eq!(strides(&[4]), vec![1]);
    }

    #[test]
    fn fft_lengths_are_five_smooth() {
        assert_eq!(fft_length(7), 8);
        assert_eq!(fft_length(35), 36);
        assert_eq!(fft_length(46), 48);
        assert_eq!(fft_length(60), 60);
    }

    #[test]
    fn interpolation_hits_nodes_and_vanishes_outside() {
        let values: Vec<f64> = (0..15).map(|i| (i * i) as f64).collect();
        let shape = [5, 3];
        let interp = LatticeInterpolator::new(&values, &shape);
        assert_approx_eq!(interp.value(&[2.0, 1.0]), 49.0, 1e-12);
        assert_approx_eq!(interp.value(&[4.0, 2.0]), 196.0, 1e-12);
        assert_eq!(interp.value(&[-1.5, 1.0]), 0.0);
        assert_eq!(interp.value(&[2.0, 3.0]), 0.0);
        assert_eq!(interp.value(&[f64::NAN, 1.0]), 0.0);
    }

    #[test]
    fn interpolation_reproduces_quadratics_inside() {
        let values: Vec<f64> = (0..9)
            .map(|i| 1.0 + 0.5 * i as f64 + 0.25 * (i * i) as f64)
            .collect();
        let shape = [9];
        let interp = LatticeInterpolator::new(&values, &shape);
        for u in [1.25, 2.5, 3.75, 5.1, 6.9] {
            assert_approx_eq!(interp.value(&[u]), 1.0 + 0.5 * u + 0.25 * u * u, 1e-12);
        }
    }

    #[test]
    fn unit_kernel_is_identity() {
        let values = vec![0.0, 1.0, 4.0, 2.0, 0.5];
        let out = convolve(&values, &[5], &[0], |_| 1.0);
        for (a, b) in out.iter().zip(&values) {
            assert_approx_eq!(*a, *b, 1e-12);
        }
    }

    #[test]
    fn one_dimensional_convolution_matches_direct_sum() {
        let values = vec![0.0, 1.0, 3.0, 0.0, 2.0, 0.0, 0.0];
        let kernel = |k: &[f64]| [0.25, 0.5, 1.0, 0.5, 0.125][(k[0] + 2.0) as usize];
        let out = convolve(&values, &[7], &[2], kernel);
        let expected = direct(&values, &[7], &[2], kernel);
        for (a, b) in out.iter().zip(&expected) {
            assert_approx_eq!(*a, *b, 1e-12);
        }
        // Mass pushed past either end is dropped, not wrapped around.
        assert_approx_eq!(out[0], 1.0 * 0.5 + 3.0 * 0.25, 1e-12);
        assert_approx_eq!(out[6], 2.0 * 0.125, 1e-12);
    }

    #[test]
    fn correlated_kernel_matches_direct_sum_in_three_dimensions() {
        let shape = [5, 7, 3];
        let values: Vec<f64> = (0..105).map(|i| ((i * 37) % 11) as f64).collect();
        let kernel = |k: &[f64]| {
            (-0.5 * (k[0] * k[0] + 0.8 * k[0] * k[1] + k[1] * k[1] + 2.0 * k[2] * k[2])).exp()
        };
        let radius = [2, 3, 1];
        let out = convolve(&values, &shape, &radius, kernel);
        let expected = direct(&values, &shape, &radius, kernel);
        for (a, b) in out.iter().zip(&expected) {
            assert_approx_eq!(*a, *b, 1e-9);
        }
    }
}
