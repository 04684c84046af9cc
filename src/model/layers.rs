use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub(crate) fn kaiming() -> Initializer {
    Initializer::KaimingUniform {
        gain: 0.1,
        fan_out_only: false,
    }
}

/// Convolution, batch norm, ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_initializer(kaiming())
                .init(device),
            norm: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        activation::relu(self.norm.forward(self.conv.forward(input)))
    }

    pub fn weight(&self) -> Tensor<B, 4> {
        self.conv.weight.val()
    }
}

/// Stride-2 transposed convolution doubling the spatial size, batch norm, ReLU.
#[derive(Module, Debug)]
pub struct DeconvBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> DeconvBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        Self {
            deconv: ConvTranspose2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_initializer(kaiming())
                .init(device),
            norm: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        activation::relu(self.norm.forward(self.deconv.forward(input)))
    }
}
