//! Trainable layers operating on dense `ndarray` batches.
//!
//! Every layer follows the same protocol: `forward(&mut self, x, train)`
//! caches whatever the backward pass needs when `train` is true, `backward`
//! consumes that cache and stores parameter gradients, and
//! `apply_gradients` hands each (parameter, gradient) pair to the optimizer
//! under a stable name. Caches and gradients are transient and excluded from
//! serialization; only the learned parameters persist.

use ndarray::{Array1, Array2, Array3, Array4, Axis, Dimension, Ix2, Ix4};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::optimizer::AdamOptimizer;

/// Standard deviation of the zero-mean normal used for weight init.
pub const INIT_STD: f32 = 0.02;

fn init_normal(rng: &mut StdRng) -> impl FnMut() -> f32 + '_ {
    let dist = Normal::new(0.0f32, INIT_STD).expect("valid normal parameters");
    move || dist.sample(rng)
}

/// Fully-connected layer: `y = x · Wᵀ (+ b)`.
#[derive(Serialize, Deserialize)]
pub struct Dense {
    /// `[out_features, in_features]`
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
    #[serde(skip)]
    grad_weight: Option<Array2<f32>>,
    #[serde(skip)]
    grad_bias: Option<Array1<f32>>,
    #[serde(skip)]
    cache: Option<Array2<f32>>,
}

impl Dense {
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut StdRng) -> Self {
        let mut sample = init_normal(rng);
        let weight = Array2::from_shape_fn((out_features, in_features), |_| sample());
        Self {
            weight,
            bias: bias.then(|| Array1::zeros(out_features)),
            grad_weight: None,
            grad_bias: None,
            cache: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_features(&self) -> usize {
        self.weight.dim().0
    }

    pub fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }
        if train {
            self.cache = Some(x.clone());
        }
        y
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Array2<f32> {
        let x = self.cache.take().expect("backward without forward");
        self.grad_weight = Some(grad_out.t().dot(&x));
        if self.bias.is_some() {
            self.grad_bias = Some(grad_out.sum_axis(Axis(0)));
        }
        grad_out.dot(&self.weight)
    }

    pub fn apply_gradients(&mut self, opt: &mut AdamOptimizer, prefix: &str) {
        if let Some(grad) = self.grad_weight.take() {
            opt.update(&format!("{prefix}.weight"), &mut self.weight, &grad);
        }
        if let (Some(bias), Some(grad)) = (self.bias.as_mut(), self.grad_bias.take()) {
            opt.update(&format!("{prefix}.bias"), bias, &grad);
        }
    }
}

/// 2D convolution with square kernel, stride 1, symmetric zero padding and no
/// bias (the following batch-norm supplies the shift).
#[derive(Serialize, Deserialize)]
pub struct Conv2d {
    /// `[out_channels, in_channels, kernel, kernel]`
    pub weight: Array4<f32>,
    pub padding: usize,
    #[serde(skip)]
    grad_weight: Option<Array4<f32>>,
    #[serde(skip)]
    cache: Option<Array4<f32>>,
}

impl Conv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        padding: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut sample = init_normal(rng);
        let weight =
            Array4::from_shape_fn((out_channels, in_channels, kernel, kernel), |_| sample());
        Self {
            weight,
            padding,
            grad_weight: None,
            cache: None,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    fn output_hw(&self, height: usize, width: usize) -> (usize, usize) {
        let kernel = self.weight.dim().2;
        (
            height + 2 * self.padding - kernel + 1,
            width + 2 * self.padding - kernel + 1,
        )
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (batch, _, height, width) = x.dim();
        let (out_c, in_c, kernel, _) = self.weight.dim();
        let (out_h, out_w) = self.output_hw(height, width);
        let pad = self.padding as isize;

        let per_sample: Vec<Array3<f32>> = (0..batch)
            .into_par_iter()
            .map(|bi| {
                let xi = x.index_axis(Axis(0), bi);
                let mut out = Array3::zeros((out_c, out_h, out_w));
                for o in 0..out_c {
                    for yo in 0..out_h {
                        for xo in 0..out_w {
                            let mut acc = 0.0f32;
                            for ci in 0..in_c {
                                for ky in 0..kernel {
                                    let iy = yo as isize + ky as isize - pad;
                                    if iy < 0 || iy >= height as isize {
                                        continue;
                                    }
                                    for kx in 0..kernel {
                                        let ix = xo as isize + kx as isize - pad;
                                        if ix < 0 || ix >= width as isize {
                                            continue;
                                        }
                                        acc += xi[[ci, iy as usize, ix as usize]]
                                            * self.weight[[o, ci, ky, kx]];
                                    }
                                }
                            }
                            out[[o, yo, xo]] = acc;
                        }
                    }
                }
                out
            })
            .collect();

        let mut output = Array4::zeros((batch, out_c, out_h, out_w));
        for (bi, sample) in per_sample.into_iter().enumerate() {
            output.index_axis_mut(Axis(0), bi).assign(&sample);
        }

        if train {
            self.cache = Some(x.clone());
        }
        output
    }

    pub fn backward(&mut self, grad_out: &Array4<f32>) -> Array4<f32> {
        let x = self.cache.take().expect("backward without forward");
        let (batch, in_c, height, width) = x.dim();
        let (out_c, _, kernel, _) = self.weight.dim();
        let (_, _, out_h, out_w) = grad_out.dim();
        let pad = self.padding as isize;

        // Gradient w.r.t. the input, one sample per task.
        let per_sample: Vec<Array3<f32>> = (0..batch)
            .into_par_iter()
            .map(|bi| {
                let gi = grad_out.index_axis(Axis(0), bi);
                let mut grad_in = Array3::zeros((in_c, height, width));
                for o in 0..out_c {
                    for yo in 0..out_h {
                        for xo in 0..out_w {
                            let g = gi[[o, yo, xo]];
                            if g == 0.0 {
                                continue;
                            }
                            for ci in 0..in_c {
                                for ky in 0..kernel {
                                    let iy = yo as isize + ky as isize - pad;
                                    if iy < 0 || iy >= height as isize {
                                        continue;
                                    }
                                    for kx in 0..kernel {
                                        let ix = xo as isize + kx as isize - pad;
                                        if ix < 0 || ix >= width as isize {
                                            continue;
                                        }
                                        grad_in[[ci, iy as usize, ix as usize]] +=
                                            g * self.weight[[o, ci, ky, kx]];
                                    }
                                }
                            }
                        }
                    }
                }
                grad_in
            })
            .collect();

        let mut grad_input = Array4::zeros((batch, in_c, height, width));
        for (bi, sample) in per_sample.into_iter().enumerate() {
            grad_input.index_axis_mut(Axis(0), bi).assign(&sample);
        }

        // Gradient w.r.t. the weights, one output channel per task.
        let per_channel: Vec<Array3<f32>> = (0..out_c)
            .into_par_iter()
            .map(|o| {
                let mut grad_w = Array3::zeros((in_c, kernel, kernel));
                for bi in 0..batch {
                    let xi = x.index_axis(Axis(0), bi);
                    let gi = grad_out.index_axis(Axis(0), bi);
                    for yo in 0..out_h {
                        for xo in 0..out_w {
                            let g = gi[[o, yo, xo]];
                            if g == 0.0 {
                                continue;
                            }
                            for ci in 0..in_c {
                                for ky in 0..kernel {
                                    let iy = yo as isize + ky as isize - pad;
                                    if iy < 0 || iy >= height as isize {
                                        continue;
                                    }
                                    for kx in 0..kernel {
                                        let ix = xo as isize + kx as isize - pad;
                                        if ix < 0 || ix >= width as isize {
                                            continue;
                                        }
                                        grad_w[[ci, ky, kx]] +=
                                            g * xi[[ci, iy as usize, ix as usize]];
                                    }
                                }
                            }
                        }
                    }
                }
                grad_w
            })
            .collect();

        let mut grad_weight = Array4::zeros(self.weight.raw_dim());
        for (o, channel) in per_channel.into_iter().enumerate() {
            grad_weight.index_axis_mut(Axis(0), o).assign(&channel);
        }
        self.grad_weight = Some(grad_weight);

        grad_input
    }

    pub fn apply_gradients(&mut self, opt: &mut AdamOptimizer, prefix: &str) {
        if let Some(grad) = self.grad_weight.take() {
            opt.update(&format!("{prefix}.weight"), &mut self.weight, &grad);
        }
    }
}

/// Max pooling with square window; default configuration is window 3, stride 2.
#[derive(Serialize, Deserialize)]
pub struct MaxPool2d {
    pub size: usize,
    pub stride: usize,
    #[serde(skip)]
    cache: Option<PoolCache>,
}

struct PoolCache {
    input_dim: (usize, usize, usize, usize),
    /// Flat `y * width + x` index of each window's maximum.
    argmax: Array4<usize>,
}

impl MaxPool2d {
    pub fn new(size: usize, stride: usize) -> Self {
        Self {
            size,
            stride,
            cache: None,
        }
    }

    pub fn output_hw(&self, height: usize, width: usize) -> (usize, usize) {
        (
            (height - self.size) / self.stride + 1,
            (width - self.size) / self.stride + 1,
        )
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (batch, channels, height, width) = x.dim();
        let (out_h, out_w) = self.output_hw(height, width);

        let mut output = Array4::zeros((batch, channels, out_h, out_w));
        let mut argmax = Array4::zeros((batch, channels, out_h, out_w));

        for bi in 0..batch {
            for c in 0..channels {
                for yo in 0..out_h {
                    for xo in 0..out_w {
                        let y0 = yo * self.stride;
                        let x0 = xo * self.stride;
                        let mut best = f32::NEG_INFINITY;
                        let mut best_idx = y0 * width + x0;
                        for dy in 0..self.size {
                            for dx in 0..self.size {
                                let value = x[[bi, c, y0 + dy, x0 + dx]];
                                if value > best {
                                    best = value;
                                    best_idx = (y0 + dy) * width + (x0 + dx);
                                }
                            }
                        }
                        output[[bi, c, yo, xo]] = best;
                        argmax[[bi, c, yo, xo]] = best_idx;
                    }
                }
            }
        }

        if train {
            self.cache = Some(PoolCache {
                input_dim: x.dim(),
                argmax,
            });
        }
        output
    }

    pub fn backward(&mut self, grad_out: &Array4<f32>) -> Array4<f32> {
        let cache = self.cache.take().expect("backward without forward");
        let (batch, channels, _, width) = cache.input_dim;
        let (_, _, out_h, out_w) = grad_out.dim();

        let mut grad_in = Array4::zeros(cache.input_dim);
        for bi in 0..batch {
            for c in 0..channels {
                for yo in 0..out_h {
                    for xo in 0..out_w {
                        let flat = cache.argmax[[bi, c, yo, xo]];
                        grad_in[[bi, c, flat / width, flat % width]] +=
                            grad_out[[bi, c, yo, xo]];
                    }
                }
            }
        }
        grad_in
    }
}

/// Batch normalization over `[B, C, H, W]`, statistics per channel.
#[derive(Serialize, Deserialize)]
pub struct BatchNorm2d {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub momentum: f32,
    pub eps: f32,
    #[serde(skip)]
    cache: Option<Bn2dCache>,
}

struct Bn2dCache {
    x_hat: Array4<f32>,
    std: Array1<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            momentum: 0.1,
            eps: 1e-5,
            cache: None,
        }
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (batch, channels, height, width) = x.dim();
        let n = (batch * height * width) as f32;

        let mut output = Array4::zeros(x.raw_dim());
        let mut x_hat = Array4::zeros(x.raw_dim());
        let mut stds = Array1::zeros(channels);

        for c in 0..channels {
            let slice = x.index_axis(Axis(1), c);
            let (mean, var) = if train {
                let mean = slice.sum() / n;
                let var = slice.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
                self.running_mean[c] = (1.0 - self.momentum) * self.running_mean[c]
                    + self.momentum * mean;
                self.running_var[c] =
                    (1.0 - self.momentum) * self.running_var[c] + self.momentum * var;
                (mean, var)
            } else {
                (self.running_mean[c], self.running_var[c])
            };

            let std = (var + self.eps).sqrt();
            stds[c] = std;
            let gamma = self.gamma[c];
            let beta = self.beta[c];

            let mut hat_slice = x_hat.index_axis_mut(Axis(1), c);
            let mut out_slice = output.index_axis_mut(Axis(1), c);
            for bi in 0..batch {
                for y in 0..height {
                    for xi in 0..width {
                        let hat = (slice[[bi, y, xi]] - mean) / std;
                        hat_slice[[bi, y, xi]] = hat;
                        out_slice[[bi, y, xi]] = gamma * hat + beta;
                    }
                }
            }
        }

        if train {
            self.cache = Some(Bn2dCache { x_hat, std: stds });
        }
        output
    }

    pub fn backward(&mut self, grad_out: &Array4<f32>) -> (Array4<f32>, Array1<f32>, Array1<f32>) {
        let cache = self.cache.take().expect("backward without forward");
        let (batch, channels, height, width) = grad_out.dim();
        let n = (batch * height * width) as f32;

        let mut grad_in = Array4::zeros(grad_out.raw_dim());
        let mut grad_gamma = Array1::zeros(channels);
        let mut grad_beta = Array1::zeros(channels);

        for c in 0..channels {
            let g = grad_out.index_axis(Axis(1), c);
            let hat = cache.x_hat.index_axis(Axis(1), c);

            let sum_g = g.sum();
            let sum_g_hat = g
                .iter()
                .zip(hat.iter())
                .map(|(&gv, &hv)| gv * hv)
                .sum::<f32>();

            grad_gamma[c] = sum_g_hat;
            grad_beta[c] = sum_g;

            let scale = self.gamma[c] / cache.std[c];
            let mut gi = grad_in.index_axis_mut(Axis(1), c);
            for bi in 0..batch {
                for y in 0..height {
                    for xi in 0..width {
                        gi[[bi, y, xi]] = scale
                            * (g[[bi, y, xi]] - sum_g / n - hat[[bi, y, xi]] * sum_g_hat / n);
                    }
                }
            }
        }

        (grad_in, grad_gamma, grad_beta)
    }
}

/// Batch normalization over `[B, F]`, statistics per feature.
#[derive(Serialize, Deserialize)]
pub struct BatchNorm1d {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub momentum: f32,
    pub eps: f32,
    #[serde(skip)]
    cache: Option<Bn1dCache>,
}

struct Bn1dCache {
    x_hat: Array2<f32>,
    std: Array1<f32>,
}

impl BatchNorm1d {
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            momentum: 0.1,
            eps: 1e-5,
            cache: None,
        }
    }

    pub fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let (batch, features) = x.dim();
        let n = batch as f32;

        let mut output = Array2::zeros(x.raw_dim());
        let mut x_hat = Array2::zeros(x.raw_dim());
        let mut stds = Array1::zeros(features);

        for f in 0..features {
            let column = x.index_axis(Axis(1), f);
            let (mean, var) = if train {
                let mean = column.sum() / n;
                let var = column.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
                self.running_mean[f] =
                    (1.0 - self.momentum) * self.running_mean[f] + self.momentum * mean;
                self.running_var[f] =
                    (1.0 - self.momentum) * self.running_var[f] + self.momentum * var;
                (mean, var)
            } else {
                (self.running_mean[f], self.running_var[f])
            };

            let std = (var + self.eps).sqrt();
            stds[f] = std;
            for bi in 0..batch {
                let hat = (x[[bi, f]] - mean) / std;
                x_hat[[bi, f]] = hat;
                output[[bi, f]] = self.gamma[f] * hat + self.beta[f];
            }
        }

        if train {
            self.cache = Some(Bn1dCache { x_hat, std: stds });
        }
        output
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> (Array2<f32>, Array1<f32>, Array1<f32>) {
        let cache = self.cache.take().expect("backward without forward");
        let (batch, features) = grad_out.dim();
        let n = batch as f32;

        let mut grad_in = Array2::zeros(grad_out.raw_dim());
        let mut grad_gamma = Array1::zeros(features);
        let mut grad_beta = Array1::zeros(features);

        for f in 0..features {
            let mut sum_g = 0.0f32;
            let mut sum_g_hat = 0.0f32;
            for bi in 0..batch {
                sum_g += grad_out[[bi, f]];
                sum_g_hat += grad_out[[bi, f]] * cache.x_hat[[bi, f]];
            }
            grad_gamma[f] = sum_g_hat;
            grad_beta[f] = sum_g;

            let scale = self.gamma[f] / cache.std[f];
            for bi in 0..batch {
                grad_in[[bi, f]] = scale
                    * (grad_out[[bi, f]] - sum_g / n - cache.x_hat[[bi, f]] * sum_g_hat / n);
            }
        }

        (grad_in, grad_gamma, grad_beta)
    }
}

/// Rectified linear unit, generic over array dimensionality.
pub struct Relu<D: Dimension> {
    mask: Option<ndarray::Array<bool, D>>,
}

impl<D: Dimension> Default for Relu<D> {
    fn default() -> Self {
        Self { mask: None }
    }
}

impl<D: Dimension> Relu<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: &ndarray::Array<f32, D>, train: bool) -> ndarray::Array<f32, D> {
        if train {
            self.mask = Some(x.mapv(|v| v > 0.0));
        }
        x.mapv(|v| v.max(0.0))
    }

    pub fn backward(&mut self, grad_out: &ndarray::Array<f32, D>) -> ndarray::Array<f32, D> {
        let mask = self.mask.take().expect("backward without forward");
        let mut grad = grad_out.clone();
        grad.zip_mut_with(&mask, |g, &keep| {
            if !keep {
                *g = 0.0;
            }
        });
        grad
    }
}

pub type Relu2 = Relu<Ix2>;
pub type Relu4 = Relu<Ix4>;

/// Row-wise L2 normalization: `y = x / ‖x‖₂`.
pub struct L2Norm {
    cache: Option<(Array2<f32>, Array1<f32>)>,
}

impl Default for L2Norm {
    fn default() -> Self {
        Self { cache: None }
    }
}

impl L2Norm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let norms = x
            .axis_iter(Axis(0))
            .map(|row| row.iter().map(|&v| v * v).sum::<f32>().sqrt().max(1e-12))
            .collect::<Array1<f32>>();

        let mut y = x.clone();
        for (mut row, &norm) in y.axis_iter_mut(Axis(0)).zip(norms.iter()) {
            row.mapv_inplace(|v| v / norm);
        }

        if train {
            self.cache = Some((y.clone(), norms));
        }
        y
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Array2<f32> {
        let (y, norms) = self.cache.take().expect("backward without forward");
        let mut grad_in = Array2::zeros(grad_out.raw_dim());

        for ((mut gi, (yi, g)), &norm) in grad_in
            .axis_iter_mut(Axis(0))
            .zip(y.axis_iter(Axis(0)).zip(grad_out.axis_iter(Axis(0))))
            .zip(norms.iter())
        {
            let dot = yi.iter().zip(g.iter()).map(|(&a, &b)| a * b).sum::<f32>();
            for ((gi_v, &y_v), &g_v) in gi.iter_mut().zip(yi.iter()).zip(g.iter()) {
                *gi_v = (g_v - y_v * dot) / norm;
            }
        }
        grad_in
    }
}

impl BatchNorm2d {
    pub fn apply_gradients(
        &mut self,
        opt: &mut AdamOptimizer,
        prefix: &str,
        grad_gamma: &Array1<f32>,
        grad_beta: &Array1<f32>,
    ) {
        opt.update(&format!("{prefix}.gamma"), &mut self.gamma, grad_gamma);
        opt.update(&format!("{prefix}.beta"), &mut self.beta, grad_beta);
    }
}

impl BatchNorm1d {
    pub fn apply_gradients(
        &mut self,
        opt: &mut AdamOptimizer,
        prefix: &str,
        grad_gamma: &Array1<f32>,
        grad_beta: &Array1<f32>,
    ) {
        opt.update(&format!("{prefix}.gamma"), &mut self.gamma, grad_gamma);
        opt.update(&format!("{prefix}.beta"), &mut self.beta, grad_beta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn dense_forward_shape_and_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Dense::new(4, 3, true, &mut rng);
        let x = Array2::from_shape_fn((2, 4), |(i, j)| (i + j) as f32);
        let y = layer.forward(&x, false);
        assert_eq!(y.dim(), (2, 3));
    }

    #[test]
    fn dense_matches_numerical_gradient() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = Dense::new(3, 2, true, &mut rng);
        let x = Array2::from_shape_fn((4, 3), |(i, j)| 0.3 * (i as f32) - 0.2 * (j as f32));

        // Loss = sum(y); its gradient w.r.t. y is all ones.
        let _ = layer.forward(&x, true);
        let grad_out = Array2::ones((4, 2));
        let _ = layer.backward(&grad_out);
        let analytic = layer.grad_weight.clone().unwrap();

        let eps = 1e-3f32;
        let w = layer.weight.clone();
        for idx in [(0, 0), (1, 2), (0, 1)] {
            let mut plus = layer.weight.clone();
            plus[idx] += eps;
            let mut minus = w.clone();
            minus[idx] -= eps;

            layer.weight = plus;
            let loss_plus = layer.forward(&x, false).sum();
            layer.weight = minus;
            let loss_minus = layer.forward(&x, false).sum();
            layer.weight = w.clone();

            let numeric = (loss_plus - loss_minus) / (2.0 * eps);
            assert_abs_diff_eq!(analytic[idx], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn conv_output_shape_with_padding() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut conv = Conv2d::new(3, 8, 3, 1, &mut rng);
        let x = Array4::zeros((2, 3, 16, 16));
        let y = conv.forward(&x, false);
        assert_eq!(y.dim(), (2, 8, 16, 16));
    }

    #[test]
    fn conv_identity_kernel_passes_input_through() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut conv = Conv2d::new(1, 1, 1, 0, &mut rng);
        conv.weight.fill(1.0);
        let x = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, xx)| (y * 3 + xx) as f32);
        let y = conv.forward(&x, false);
        assert_eq!(y, x);
    }

    #[test]
    fn maxpool_selects_window_maximum() {
        let mut pool = MaxPool2d::new(3, 2);
        let x = Array4::from_shape_fn((1, 1, 7, 7), |(_, _, y, xx)| (y * 7 + xx) as f32);
        let y = pool.forward(&x, true);
        assert_eq!(y.dim(), (1, 1, 3, 3));
        // Window max always sits in the bottom-right corner of the window.
        assert_eq!(y[[0, 0, 0, 0]], x[[0, 0, 2, 2]]);
        assert_eq!(y[[0, 0, 2, 2]], x[[0, 0, 6, 6]]);

        let grad = pool.backward(&Array4::ones((1, 1, 3, 3)));
        assert_eq!(grad.sum(), 9.0);
        assert_eq!(grad[[0, 0, 6, 6]], 1.0);
        assert_eq!(grad[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn batchnorm2d_normalizes_batch_statistics() {
        let mut bn = BatchNorm2d::new(2);
        let x = Array4::from_shape_fn((4, 2, 3, 3), |(b, c, y, xx)| {
            (b + c) as f32 * 2.0 + (y * 3 + xx) as f32 * 0.1
        });
        let y = bn.forward(&x, true);

        for c in 0..2 {
            let slice = y.index_axis(Axis(1), c);
            let n = slice.len() as f32;
            let mean = slice.sum() / n;
            let var = slice.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-2);
        }
    }

    #[test]
    fn batchnorm1d_eval_uses_running_statistics() {
        let mut bn = BatchNorm1d::new(2);
        let x = Array2::from_shape_fn((8, 2), |(i, j)| i as f32 + j as f32 * 10.0);
        let _ = bn.forward(&x, true);

        // Eval output must be a pure affine map of the input, no batch coupling.
        let single = Array2::from_shape_fn((1, 2), |(_, j)| j as f32);
        let y1 = bn.forward(&single, false);
        let y2 = bn.forward(&single, false);
        assert_eq!(y1, y2);
    }

    #[test]
    fn relu_masks_gradient() {
        let mut relu = Relu2::new();
        let x = ndarray::arr2(&[[-1.0f32, 2.0], [3.0, -4.0]]);
        let y = relu.forward(&x, true);
        assert_eq!(y, ndarray::arr2(&[[0.0, 2.0], [3.0, 0.0]]));
        let g = relu.backward(&Array2::ones((2, 2)));
        assert_eq!(g, ndarray::arr2(&[[0.0, 1.0], [1.0, 0.0]]));
    }

    #[test]
    fn l2norm_rows_have_unit_norm() {
        let mut l2 = L2Norm::new();
        let x = Array2::from_shape_fn((3, 5), |(i, j)| (i + 1) as f32 * (j as f32 - 2.0));
        let y = l2.forward(&x, false);
        for row in y.axis_iter(Axis(0)) {
            let norm = row.iter().map(|&v| v * v).sum::<f32>().sqrt();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn l2norm_gradient_is_orthogonal_to_output() {
        let mut l2 = L2Norm::new();
        let x = ndarray::arr2(&[[3.0f32, 4.0]]);
        let y = l2.forward(&x, true);
        let grad = l2.backward(&ndarray::arr2(&[[1.0f32, 0.0]]));
        // d‖y‖/dx = 0, so the input gradient has no radial component.
        let radial = grad[[0, 0]] * y[[0, 0]] + grad[[0, 1]] * y[[0, 1]];
        assert_abs_diff_eq!(radial, 0.0, epsilon = 1e-6);
    }
}
