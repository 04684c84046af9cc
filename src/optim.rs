//! Optimizer selection and an Adadelta implementation for burn.

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::SimpleOptimizer;
use burn::record::Record;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn::LearningRate;

/// Configuration to create the [Adadelta](Adadelta) optimizer.
#[derive(Config, Debug)]
pub struct AdadeltaConfig {
    /// Decay of the running averages.
    #[config(default = 0.9)]
    rho: f32,
    #[config(default = 1e-6)]
    epsilon: f32,
}

/// Adadelta: per-parameter steps scaled by the ratio of running RMS of past
/// updates to running RMS of gradients, then by the learning rate.
#[derive(Clone)]
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
}

#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    pub square_avg: Tensor<B, D>,
    pub acc_delta: Tensor<B, D>,
}

impl AdadeltaConfig {
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(
        &self,
    ) -> OptimizerAdaptor<Adadelta, M, B> {
        OptimizerAdaptor::from(Adadelta {
            rho: self.rho,
            epsilon: self.epsilon,
        })
    }
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (square_avg, acc_delta) = match state {
            Some(state) => (state.square_avg, state.acc_delta),
            None => (grad.zeros_like(), grad.zeros_like()),
        };

        let square_avg = square_avg.mul_scalar(self.rho)
            + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);
        let delta = acc_delta.clone().add_scalar(self.epsilon).sqrt()
            / square_avg.clone().add_scalar(self.epsilon).sqrt()
            * grad;
        let acc_delta = acc_delta.mul_scalar(self.rho)
            + delta.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);

        let tensor = tensor - delta.mul_scalar(lr);
        (
            tensor,
            Some(AdadeltaState {
                square_avg,
                acc_delta,
            }),
        )
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        AdadeltaState {
            square_avg: state.square_avg.to_device(device),
            acc_delta: state.acc_delta.to_device(device),
        }
    }
}
