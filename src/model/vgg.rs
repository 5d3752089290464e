//! VGG19 feature extractor
//!
//! 16 3x3 convolutions (ReLU) in five blocks separated by 2x2 max pools.
//! With `include_top` the network keeps the ImageNet classifier: adaptive
//! 7x7 average pool, two 4096-unit layers and a 1000-way softmax.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::FreezePolicy;

/// Convolutions per block
pub const VGG19_BLOCKS: [usize; 5] = [2, 2, 4, 4, 4];

/// Channel multiplier of each block relative to `base_filters`
const BLOCK_WIDTH: [usize; 5] = [1, 2, 4, 8, 8];

/// Total downsampling factor of the five pools
pub const VGG_STRIDE: usize = 32;

/// Width of the two hidden layers of the ImageNet classifier
const TOP_HIDDEN: usize = 4096;

/// Configuration for the VGG19 base network
#[derive(Config, Debug, PartialEq)]
pub struct Vgg19Config {
    /// Filters of the first block (64 for the standard network)
    #[config(default = "64")]
    pub base_filters: usize,

    /// Keep the ImageNet classifier on top of the features
    #[config(default = "false")]
    pub include_top: bool,

    /// Outputs of the ImageNet classifier
    #[config(default = "1000")]
    pub top_classes: usize,
}

impl Vgg19Config {
    /// Output channels of every conv layer, in order
    pub fn conv_channels(&self) -> Vec<usize> {
        VGG19_BLOCKS
            .iter()
            .zip(BLOCK_WIDTH)
            .flat_map(|(&convs, mult)| std::iter::repeat(self.base_filters * mult).take(convs))
            .collect()
    }

    /// Names of the weighted layers, conv layers first
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = VGG19_BLOCKS
            .iter()
            .enumerate()
            .flat_map(|(block, &convs)| {
                (1..=convs).map(move |i| format!("block{}_conv{}", block + 1, i))
            })
            .collect();
        if self.include_top {
            names.extend(["fc1", "fc2", "predictions"].map(String::from));
        }
        names
    }

    /// Size of the flattened output for an input of `height` x `width`
    pub fn output_features(&self, height: usize, width: usize) -> usize {
        if self.include_top {
            self.top_classes
        } else {
            self.base_filters * BLOCK_WIDTH[4] * (height / VGG_STRIDE) * (width / VGG_STRIDE)
        }
    }

    /// Initialize a new network with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg19<B> {
        let mut in_channels = 3;
        let features = self
            .conv_channels()
            .into_iter()
            .map(|out_channels| {
                let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device);
                in_channels = out_channels;
                conv
            })
            .collect();

        let top = self.include_top.then(|| VggTop {
            pool: AdaptiveAvgPool2dConfig::new([7, 7]).init(),
            fc1: LinearConfig::new(in_channels * 7 * 7, TOP_HIDDEN).init(device),
            fc2: LinearConfig::new(TOP_HIDDEN, TOP_HIDDEN).init(device),
            fc3: LinearConfig::new(TOP_HIDDEN, self.top_classes).init(device),
        });

        Vgg19 {
            features,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
            top,
        }
    }
}

/// ImageNet classifier kept when `include_top` is set
#[derive(Module, Debug)]
pub struct VggTop<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub fc3: Linear<B>,
}

impl<B: Backend> VggTop<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(x);
        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);
        let x = Relu::new().forward(self.fc1.forward(x));
        let x = Relu::new().forward(self.fc2.forward(x));
        softmax(self.fc3.forward(x), 1)
    }
}

/// VGG19 network
#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    pub features: Vec<Conv2d<B>>,
    pub pool: MaxPool2d,
    pub relu: Relu,
    pub top: Option<VggTop<B>>,
}

impl<B: Backend> Vgg19<B> {
    /// Forward pass, flattened to `[batch, features]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        let mut layers = self.features.iter();
        for convs in VGG19_BLOCKS {
            for conv in layers.by_ref().take(convs) {
                x = self.relu.forward(conv.forward(x));
            }
            x = self.pool.forward(x);
        }

        match &self.top {
            Some(top) => top.forward(x),
            None => {
                let [batch, channels, height, width] = x.dims();
                x.reshape([batch, channels * height * width])
            }
        }
    }

    /// Number of weighted layers (conv + top dense)
    pub fn num_layers(&self) -> usize {
        self.features.len() + if self.top.is_some() { 3 } else { 0 }
    }

    /// Stop gradients for the layers the policy freezes.
    pub fn freeze(mut self, policy: FreezePolicy) -> Self {
        let frozen = policy.frozen_count(self.num_layers());
        let convs = self.features.len();

        self.features = self
            .features
            .into_iter()
            .enumerate()
            .map(|(i, conv)| if i < frozen { conv.no_grad() } else { conv })
            .collect();

        if let Some(top) = self.top.take() {
            let VggTop { pool, fc1, fc2, fc3 } = top;
            let freeze_at = |idx: usize, layer: Linear<B>| {
                if convs + idx < frozen {
                    layer.no_grad()
                } else {
                    layer
                }
            };
            self.top = Some(VggTop {
                pool,
                fc1: freeze_at(0, fc1),
                fc2: freeze_at(1, fc2),
                fc3: freeze_at(2, fc3),
            });
        }
        self
    }

    /// Parameter count per weighted layer, in `layer_names` order
    pub fn layer_params(&self) -> Vec<usize> {
        let mut counts: Vec<usize> = self.features.iter().map(|c| c.num_params()).collect();
        if let Some(top) = &self.top {
            counts.extend([top.fc1.num_params(), top.fc2.num_params(), top.fc3.num_params()]);
        }
        counts
    }
}
