use burn::module::Module;
use burn::nn::conv::{ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::layers::{kaiming, ConvBlock, DeconvBlock};
use super::VariationalModel;
use crate::config::ModelConfig;
use crate::data::ImageShape;

/// Three conv stages down to a quarter of the input size, mirrored on decode.
#[derive(Module, Debug)]
pub struct ConvVae<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    mu: Linear<B>,
    log_var: Linear<B>,
    transfer: Linear<B>,
    reverse1: DeconvBlock<B>,
    reverse2: DeconvBlock<B>,
    reverse3: ConvTranspose2d<B>,
    width: usize,
    bottleneck: usize,
    latent_dim: usize,
}

impl<B: Backend> ConvVae<B> {
    pub fn new(config: &ModelConfig, shape: ImageShape, device: &B::Device) -> Self {
        let base = config.base_channels;
        let width = base * 4;
        let bottleneck = shape.size / 4;
        let features = width * bottleneck * bottleneck;

        Self {
            conv1: ConvBlock::new([shape.channels, base], 3, 1, device),
            conv2: ConvBlock::new([base, base * 2], 3, 2, device),
            conv3: ConvBlock::new([base * 2, width], 3, 2, device),
            mu: LinearConfig::new(features, config.latent_dim).init(device),
            log_var: LinearConfig::new(features, config.latent_dim).init(device),
            transfer: LinearConfig::new(config.latent_dim, features).init(device),
            reverse1: DeconvBlock::new([width, base * 2], device),
            reverse2: DeconvBlock::new([base * 2, base], device),
            reverse3: ConvTranspose2dConfig::new([base, shape.channels], [3, 3])
                .with_stride([1, 1])
                .with_padding([1, 1])
                .with_initializer(kaiming())
                .init(device),
            width,
            bottleneck,
            latent_dim: config.latent_dim,
        }
    }
}

impl<B: Backend> VariationalModel<B> for ConvVae<B> {
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = self.conv1.forward(images);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);

        (self.mu.forward(x.clone()), self.log_var.forward(x))
    }

    fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let y = activation::relu(self.transfer.forward(latent));
        let batch_size = y.dims()[0];
        let y = y.reshape([batch_size, self.width, self.bottleneck, self.bottleneck]);

        let y = self.reverse1.forward(y);
        let y = self.reverse2.forward(y);
        activation::sigmoid(self.reverse3.forward(y))
    }

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn reconstructs_input_shape() {
        let device = Default::default();
        let config = ModelConfig::new()
            .with_latent_dim(5)
            .with_base_channels(4);
        let model = ConvVae::<NdArray>::new(&config, ImageShape::new(3, 12), &device);

        let output = model.forward(Tensor::random(
            [2, 3, 12, 12],
            burn::tensor::Distribution::Default,
            &device,
        ));
        assert_eq!(output.reconstruction.dims(), [2, 3, 12, 12]);
        assert_eq!(output.mu.dims(), [2, 5]);

        let samples = model.sample(3, &device);
        assert_eq!(samples.dims(), [3, 3, 12, 12]);
    }
}
