//! Variational autoencoder architectures.

mod conv;
mod dense;
mod inception;
mod layers;

pub use conv::ConvVae;
pub use dense::DenseVae;
pub use inception::{InceptionBlock, InceptionVae};
pub use layers::{ConvBlock, DeconvBlock};

use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

/// Result of a full encode/sample/decode pass.
#[derive(Debug, Clone)]
pub struct VaeOutput<B: Backend> {
    pub reconstruction: Tensor<B, 4>,
    pub mu: Tensor<B, 2>,
    pub log_var: Tensor<B, 2>,
}

/// Encoder/decoder pair with a diagonal Gaussian posterior.
pub trait VariationalModel<B: Backend> {
    /// Posterior parameters `(mu, log_var)`, each `[N, latent_dim]`.
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>);

    /// Images in `[0, 1]` for latents `[N, latent_dim]`.
    fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4>;

    fn latent_dim(&self) -> usize;

    fn forward(&self, images: Tensor<B, 4>) -> VaeOutput<B> {
        let (mu, log_var) = self.encode(images);
        let latent = reparameterize(mu.clone(), log_var.clone());
        VaeOutput {
            reconstruction: self.decode(latent),
            mu,
            log_var,
        }
    }

    /// Decode `count` latents drawn from the standard normal prior.
    fn sample(&self, count: usize, device: &B::Device) -> Tensor<B, 4> {
        let latent = Tensor::random(
            [count, self.latent_dim()],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        self.decode(latent)
    }
}

/// `mu + eps * exp(log_var / 2)` while gradients are tracked, `mu` otherwise.
pub fn reparameterize<B: Backend>(mu: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 2> {
    if !B::ad_enabled() {
        return mu;
    }
    let std = (log_var.clamp(-10.0, 10.0) * 0.5).exp();
    let noise = std.random_like(Distribution::Normal(0.0, 1.0));
    mu + noise * std
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn evaluation_uses_posterior_mean() {
        let device = Default::default();
        let mu = Tensor::<NdArray, 2>::from_floats([[0.5, -1.0]], &device);
        let log_var = Tensor::<NdArray, 2>::from_floats([[3.0, 3.0]], &device);

        let z = reparameterize(mu.clone(), log_var);
        z.into_data().assert_eq(&mu.into_data(), true);
    }

    #[test]
    fn training_samples_around_mean() {
        let device = Default::default();
        let mu = Tensor::<Autodiff<NdArray>, 2>::zeros([1, 4096], &device);
        let log_var = Tensor::<Autodiff<NdArray>, 2>::zeros([1, 4096], &device);

        let z = reparameterize(mu, log_var);
        let values: Vec<f32> = z.into_data().to_vec().unwrap();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.15, "variance {var}");
    }
}
