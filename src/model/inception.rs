use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::layers::{kaiming, ConvBlock, DeconvBlock};
use super::VariationalModel;
use crate::config::ModelConfig;
use crate::data::ImageShape;

/// Four parallel branches concatenated on the channel axis: 1x1, 1x1 then
/// 3x3, 1x1 then two 3x3 (a 5x5 receptive field), and 3x3 max pool then 1x1.
/// Spatial size is preserved; `out_channels` must be a multiple of 4.
#[derive(Module, Debug)]
pub struct InceptionBlock<B: Backend> {
    branch1x1: ConvBlock<B>,
    branch3x3_reduce: ConvBlock<B>,
    branch3x3: ConvBlock<B>,
    branch5x5_reduce: ConvBlock<B>,
    branch5x5_a: ConvBlock<B>,
    branch5x5_b: ConvBlock<B>,
    pool: MaxPool2d,
    branch_pool: ConvBlock<B>,
}

impl<B: Backend> InceptionBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let branch = out_channels / 4;
        Self {
            branch1x1: ConvBlock::new([in_channels, branch], 1, 1, device),
            branch3x3_reduce: ConvBlock::new([in_channels, branch], 1, 1, device),
            branch3x3: ConvBlock::new([branch, branch], 3, 1, device),
            branch5x5_reduce: ConvBlock::new([in_channels, branch], 1, 1, device),
            branch5x5_a: ConvBlock::new([branch, branch], 3, 1, device),
            branch5x5_b: ConvBlock::new([branch, branch], 3, 1, device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            branch_pool: ConvBlock::new([in_channels, branch], 1, 1, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(input.clone());

        let b3 = self.branch3x3_reduce.forward(input.clone());
        let b3 = self.branch3x3.forward(b3);

        let b5 = self.branch5x5_reduce.forward(input.clone());
        let b5 = self.branch5x5_a.forward(b5);
        let b5 = self.branch5x5_b.forward(b5);

        let bp = self.branch_pool.forward(self.pool.forward(input));

        Tensor::cat(vec![b1, b3, b5, bp], 1)
    }
}

/// Inception-style encoder/decoder.
///
/// The encoder halves the spatial size four times (stem plus three strided
/// convolutions) with an Inception block after each of the first three
/// reductions; the decoder mirrors it with transposed convolutions. Input
/// sides must therefore be divisible by 16, e.g. 96 -> 6.
#[derive(Module, Debug)]
pub struct InceptionVae<B: Backend> {
    stem: ConvBlock<B>,
    mixed1: InceptionBlock<B>,
    reduce1: ConvBlock<B>,
    mixed2: InceptionBlock<B>,
    reduce2: ConvBlock<B>,
    mixed3: InceptionBlock<B>,
    reduce3: ConvBlock<B>,
    mu: Linear<B>,
    log_var: Linear<B>,
    project: Linear<B>,
    expand1: DeconvBlock<B>,
    mixed4: InceptionBlock<B>,
    expand2: DeconvBlock<B>,
    mixed5: InceptionBlock<B>,
    expand3: DeconvBlock<B>,
    mixed6: InceptionBlock<B>,
    expand4: DeconvBlock<B>,
    head: Conv2d<B>,
    width: usize,
    bottleneck: usize,
    latent_dim: usize,
}

impl<B: Backend> InceptionVae<B> {
    pub fn new(config: &ModelConfig, shape: ImageShape, device: &B::Device) -> Self {
        let base = config.base_channels;
        let width = base * 8;
        let bottleneck = shape.size / 16;
        let features = width * bottleneck * bottleneck;

        Self {
            stem: ConvBlock::new([shape.channels, base], 3, 2, device),
            mixed1: InceptionBlock::new(base, base * 2, device),
            reduce1: ConvBlock::new([base * 2, base * 4], 3, 2, device),
            mixed2: InceptionBlock::new(base * 4, base * 4, device),
            reduce2: ConvBlock::new([base * 4, width], 3, 2, device),
            mixed3: InceptionBlock::new(width, width, device),
            reduce3: ConvBlock::new([width, width], 3, 2, device),
            mu: LinearConfig::new(features, config.latent_dim).init(device),
            log_var: LinearConfig::new(features, config.latent_dim).init(device),
            project: LinearConfig::new(config.latent_dim, features).init(device),
            expand1: DeconvBlock::new([width, width], device),
            mixed4: InceptionBlock::new(width, width, device),
            expand2: DeconvBlock::new([width, base * 4], device),
            mixed5: InceptionBlock::new(base * 4, base * 4, device),
            expand3: DeconvBlock::new([base * 4, base * 2], device),
            mixed6: InceptionBlock::new(base * 2, base * 2, device),
            expand4: DeconvBlock::new([base * 2, base], device),
            head: Conv2dConfig::new([base, shape.channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(kaiming())
                .init(device),
            width,
            bottleneck,
            latent_dim: config.latent_dim,
        }
    }
}

impl<B: Backend> VariationalModel<B> for InceptionVae<B> {
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = self.mixed1.forward(self.stem.forward(images));
        let x = self.mixed2.forward(self.reduce1.forward(x));
        let x = self.mixed3.forward(self.reduce2.forward(x));
        let x: Tensor<B, 2> = self.reduce3.forward(x).flatten(1, 3);

        (self.mu.forward(x.clone()), self.log_var.forward(x))
    }

    fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let y = activation::relu(self.project.forward(latent));
        let batch_size = y.dims()[0];
        let y = y.reshape([batch_size, self.width, self.bottleneck, self.bottleneck]);

        let y = self.mixed4.forward(self.expand1.forward(y));
        let y = self.mixed5.forward(self.expand2.forward(y));
        let y = self.mixed6.forward(self.expand3.forward(y));
        let y = self.expand4.forward(y);
        activation::sigmoid(self.head.forward(y))
    }

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn inception_block_concatenates_branches() {
        let device = Default::default();
        let block = InceptionBlock::<NdArray>::new(6, 12, &device);
        let out = block.forward(Tensor::ones([2, 6, 5, 5], &device));
        assert_eq!(out.dims(), [2, 12, 5, 5]);
    }

    #[test]
    fn round_trips_shape_through_bottleneck() {
        let device = Default::default();
        let config = ModelConfig::new().with_latent_dim(8).with_base_channels(4);
        let model = InceptionVae::<NdArray>::new(&config, ImageShape::new(3, 32), &device);

        let output = model.forward(Tensor::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Default,
            &device,
        ));
        assert_eq!(output.reconstruction.dims(), [2, 3, 32, 32]);
        assert_eq!(output.mu.dims(), [2, 8]);
        assert_eq!(output.log_var.dims(), [2, 8]);
    }

    #[test]
    fn gradients_reach_the_encoder() {
        let device = Default::default();
        let config = ModelConfig::new().with_latent_dim(4).with_base_channels(4);
        let model =
            InceptionVae::<Autodiff<NdArray>>::new(&config, ImageShape::new(1, 16), &device);

        let output = model.forward(Tensor::ones([2, 1, 16, 16], &device));
        let loss = output.reconstruction.sum() + output.mu.sum();
        let grads = loss.backward();
        assert!(model.stem.weight().grad(&grads).is_some());
    }
}
