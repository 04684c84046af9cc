//! Evidence lower bound.
//!
//! All terms are summed over the batch and every pixel or latent unit, so a
//! per-image figure is `total / batch_size`.

use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::ReconstructionKind;
use crate::model::VaeOutput;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct Elbo<B: Backend> {
    pub total: Tensor<B, 1>,
    pub reconstruction: Tensor<B, 1>,
    pub kl: Tensor<B, 1>,
}

/// Negative ELBO: reconstruction error plus `kl_weight` times the KL
/// divergence from the posterior to a standard normal prior.
pub fn elbo<B: Backend>(
    output: &VaeOutput<B>,
    target: Tensor<B, 4>,
    kind: ReconstructionKind,
    kl_weight: f32,
) -> Elbo<B> {
    let reconstruction = reconstruction_loss(output.reconstruction.clone(), target, kind);
    let kl = kl_divergence(output.mu.clone(), output.log_var.clone());
    Elbo {
        total: reconstruction.clone() + kl.clone().mul_scalar(kl_weight),
        reconstruction,
        kl,
    }
}

pub fn reconstruction_loss<B: Backend>(
    reconstruction: Tensor<B, 4>,
    target: Tensor<B, 4>,
    kind: ReconstructionKind,
) -> Tensor<B, 1> {
    match kind {
        ReconstructionKind::Bce => {
            let r = reconstruction.clamp(EPSILON, 1.0 - EPSILON);
            let positive = target.clone() * r.clone().log();
            let negative = target.neg().add_scalar(1.0) * r.neg().add_scalar(1.0).log();
            (positive + negative).sum().neg()
        }
        ReconstructionKind::Mse => MseLoss::new().forward(reconstruction, target, Reduction::Sum),
    }
}

/// `-0.5 * sum(1 + log_var - mu^2 - exp(log_var))`
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 1> {
    (log_var.clone().add_scalar(1.0) - mu.powf_scalar(2.0) - log_var.exp())
        .sum()
        .mul_scalar(-0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray;

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    #[test]
    fn kl_vanishes_at_the_prior() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        let log_var = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        assert!(scalar(kl_divergence(mu, log_var)).abs() < 1e-6);
    }

    #[test]
    fn kl_grows_with_mean_and_variance_shift() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::ones([2, 3], &device);
        let log_var = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        assert!((scalar(kl_divergence(mu, log_var)) - 3.0).abs() < 1e-5);

        let mu = Tensor::<TestBackend, 2>::zeros([1, 1], &device);
        let log_var = Tensor::<TestBackend, 2>::from_floats([[2.0f32.ln()]], &device);
        let expected = -0.5 * (1.0 + 2.0f32.ln() - 2.0);
        assert!((scalar(kl_divergence(mu, log_var)) - expected).abs() < 1e-5);
    }

    #[test]
    fn bce_of_uninformed_reconstruction_is_ln2_per_pixel() {
        let device = Default::default();
        let recon = Tensor::<TestBackend, 4>::full([2, 1, 2, 2], 0.5, &device);
        let target = Tensor::<TestBackend, 4>::ones([2, 1, 2, 2], &device);
        let loss = scalar(reconstruction_loss(recon, target, ReconstructionKind::Bce));
        assert!((loss - 8.0 * 2.0f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn bce_stays_finite_on_saturated_outputs() {
        let device = Default::default();
        let recon = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let target = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let loss = scalar(reconstruction_loss(recon, target, ReconstructionKind::Bce));
        assert!(loss.is_finite());
        assert!(loss > 40.0);
    }

    #[test]
    fn mse_sums_squared_error() {
        let device = Default::default();
        let recon = Tensor::<TestBackend, 4>::full([1, 2, 2, 2], 0.25, &device);
        let target = Tensor::<TestBackend, 4>::full([1, 2, 2, 2], 0.75, &device);
        let loss = scalar(reconstruction_loss(recon, target, ReconstructionKind::Mse));
        assert!((loss - 2.0).abs() < 1e-6);
    }

    #[test]
    fn kl_weight_scales_only_the_kl_term() {
        let device = Default::default();
        let output = VaeOutput {
            reconstruction: Tensor::<TestBackend, 4>::full([1, 1, 1, 2], 0.5, &device),
            mu: Tensor::ones([1, 2], &device),
            log_var: Tensor::zeros([1, 2], &device),
        };
        let target = Tensor::<TestBackend, 4>::full([1, 1, 1, 2], 0.5, &device);

        let plain = elbo(&output, target.clone(), ReconstructionKind::Mse, 1.0);
        let weighted = elbo(&output, target, ReconstructionKind::Mse, 0.5);

        assert!(scalar(plain.reconstruction).abs() < 1e-6);
        assert!((scalar(plain.kl.clone()) - 1.0).abs() < 1e-5);
        assert!((scalar(plain.total) - 1.0).abs() < 1e-5);
        assert!((scalar(weighted.total) - 0.5).abs() < 1e-5);
        assert!((scalar(weighted.kl) - 1.0).abs() < 1e-5);
    }
}
