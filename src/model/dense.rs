use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::VariationalModel;
use crate::config::ModelConfig;
use crate::data::ImageShape;

/// Single hidden layer on each side, images flattened.
#[derive(Module, Debug)]
pub struct DenseVae<B: Backend> {
    hidden: Linear<B>,
    mu: Linear<B>,
    log_var: Linear<B>,
    expand: Linear<B>,
    output: Linear<B>,
    channels: usize,
    size: usize,
    latent_dim: usize,
}

impl<B: Backend> DenseVae<B> {
    pub fn new(config: &ModelConfig, shape: ImageShape, device: &B::Device) -> Self {
        let inputs = shape.numel();
        Self {
            hidden: LinearConfig::new(inputs, config.hidden_dim).init(device),
            mu: LinearConfig::new(config.hidden_dim, config.latent_dim).init(device),
            log_var: LinearConfig::new(config.hidden_dim, config.latent_dim).init(device),
            expand: LinearConfig::new(config.latent_dim, config.hidden_dim).init(device),
            output: LinearConfig::new(config.hidden_dim, inputs).init(device),
            channels: shape.channels,
            size: shape.size,
            latent_dim: config.latent_dim,
        }
    }
}

impl<B: Backend> VariationalModel<B> for DenseVae<B> {
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = activation::relu(self.hidden.forward(images.flatten::<2>(1, 3)));
        (self.mu.forward(x.clone()), self.log_var.forward(x))
    }

    fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let batch_size = latent.dims()[0];
        let y = activation::relu(self.expand.forward(latent));
        activation::sigmoid(self.output.forward(y)).reshape([
            batch_size,
            self.channels,
            self.size,
            self.size,
        ])
    }

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }
}
