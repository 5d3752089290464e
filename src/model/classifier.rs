//! Kidney CT classifier
//!
//! A VGG19 base followed by a fresh dense head:
//!
//! ```text
//! flatten -> [Dense(512) -> BN -> Dropout] -> [Dense(128) -> BN -> Dropout]
//!         -> [Dense(32) -> BN -> Dropout] -> Dense(classes)
//! ```
//!
//! `forward` returns logits; softmax is applied only at prediction time.
//! The three hidden dense kernels carry an L2 penalty that the training
//! objective adds to the cross-entropy.

use burn::{
    config::Config,
    module::Module,
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::vgg::{Vgg19, Vgg19Config};
use super::FreezePolicy;

/// Units of the hidden dense layers
pub const HEAD_UNITS: [usize; 3] = [512, 128, 32];

/// Configuration for the kidney classifier
#[derive(Config, Debug, PartialEq)]
pub struct KidneyClassifierConfig {
    #[config(default = "4")]
    pub num_classes: usize,

    #[config(default = "224")]
    pub image_height: usize,

    #[config(default = "224")]
    pub image_width: usize,

    /// Dropout after every hidden dense block
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Keep the ImageNet top of the base network
    #[config(default = "false")]
    pub include_top: bool,

    /// Width of the first VGG block
    #[config(default = "64")]
    pub base_filters: usize,

    /// L2 factor of the hidden dense kernels
    #[config(default = "0.001")]
    pub l2: f64,
}

impl KidneyClassifierConfig {
    /// Config of the base network this classifier wraps
    pub fn base_config(&self) -> Vgg19Config {
        Vgg19Config::new()
            .with_base_filters(self.base_filters)
            .with_include_top(self.include_top)
    }

    /// Initialize with a randomly initialized base.
    pub fn init<B: Backend>(&self, device: &B::Device) -> KidneyClassifier<B> {
        self.init_with_base(self.base_config().init(device), device)
    }

    /// Attach a fresh head to an existing base network.
    pub fn init_with_base<B: Backend>(
        &self,
        base: Vgg19<B>,
        device: &B::Device,
    ) -> KidneyClassifier<B> {
        let mut in_features = self
            .base_config()
            .output_features(self.image_height, self.image_width);

        let head = HEAD_UNITS
            .iter()
            .map(|&units| {
                let block = DenseBlock::new(in_features, units, self.dropout, device);
                in_features = units;
                block
            })
            .collect();

        KidneyClassifier {
            base,
            head,
            output: LinearConfig::new(in_features, self.num_classes).init(device),
        }
    }
}

/// Dense -> ReLU -> BatchNorm -> Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
    pub bn: BatchNorm<B>,
    pub dropout: Dropout,
    pub relu: Relu,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(in_features: usize, units: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(in_features, units).init(device),
            // running = 0.99 * running + 0.01 * batch
            bn: BatchNormConfig::new(units)
                .with_momentum(0.01)
                .with_epsilon(1e-3)
                .init(device),
            dropout: DropoutConfig::new(dropout).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.linear.forward(x));

        // BatchNorm wants a channel axis plus at least one spatial axis
        let [batch, units] = x.dims();
        let x = self.bn.forward(x.reshape([batch, units, 1]));
        let x = x.reshape([batch, units]);

        self.dropout.forward(x)
    }

    /// Sum of squared kernel weights
    pub fn kernel_sq_norm(&self) -> Tensor<B, 1> {
        self.linear.weight.val().powf_scalar(2.0).sum()
    }
}

/// VGG19 base plus the classification head
#[derive(Module, Debug)]
pub struct KidneyClassifier<B: Backend> {
    pub base: Vgg19<B>,
    pub head: Vec<DenseBlock<B>>,
    pub output: Linear<B>,
}

impl<B: Backend> KidneyClassifier<B> {
    /// Logits of shape `[batch, classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.base.forward(images);
        for block in &self.head {
            x = block.forward(x);
        }
        self.output.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// `l2 * sum(w^2)` over the hidden dense kernels
    pub fn l2_penalty(&self, l2: f64) -> Tensor<B, 1> {
        let mut blocks = self.head.iter();
        let first = match blocks.next() {
            Some(block) => block.kernel_sq_norm(),
            None => return Tensor::zeros([1], &self.output.weight.val().device()),
        };
        blocks
            .fold(first, |acc, block| acc + block.kernel_sq_norm())
            .mul_scalar(l2)
    }

    /// Freeze the base network according to `policy`. The head stays trainable.
    pub fn freeze(mut self, policy: FreezePolicy) -> Self {
        self.base = self.base.freeze(policy);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.output.weight.val().dims()[1]
    }

    /// Layer table with trainable flags under `policy`
    pub fn summary(
        &self,
        config: &KidneyClassifierConfig,
        policy: FreezePolicy,
    ) -> ArchitectureSummary {
        let base_names = config.base_config().layer_names();
        let base_params = self.base.layer_params();
        let frozen = policy.frozen_count(base_names.len());

        let mut layers: Vec<LayerSummary> = base_names
            .into_iter()
            .zip(base_params)
            .enumerate()
            .map(|(i, (name, params))| LayerSummary {
                kind: if name.starts_with("block") { "Conv2d" } else { "Dense" }.to_string(),
                name,
                params,
                trainable: i >= frozen,
            })
            .collect();

        for (i, block) in self.head.iter().enumerate() {
            let units = block.linear.weight.val().dims()[1];
            layers.push(LayerSummary {
                name: format!("dense_{}", i + 1),
                kind: format!("Dense({})", units),
                params: block.linear.num_params(),
                trainable: true,
            });
            layers.push(LayerSummary {
                name: format!("batch_norm_{}", i + 1),
                kind: "BatchNorm".to_string(),
                params: block.bn.num_params(),
                trainable: true,
            });
        }
        layers.push(LayerSummary {
            name: "output".to_string(),
            kind: format!("Dense({})", self.num_classes()),
            params: self.output.num_params(),
            trainable: true,
        });

        let total_params: usize = layers.iter().map(|l| l.params).sum();
        let trainable_params: usize = layers.iter().filter(|l| l.trainable).map(|l| l.params).sum();

        ArchitectureSummary {
            input_shape: [3, config.image_height, config.image_width],
            num_classes: config.num_classes,
            frozen_layers: frozen,
            layers,
            total_params,
            trainable_params,
            non_trainable_params: total_params - trainable_params,
        }
    }
}

/// One row of the architecture summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    pub params: usize,
    pub trainable: bool,
}

/// Deterministic description of a classifier and its freeze state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSummary {
    pub input_shape: [usize; 3],
    pub num_classes: usize,
    pub frozen_layers: usize,
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl ArchitectureSummary {
    /// Render as a fixed-width table
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<16} {:<14} {:>12} {:>10}\n",
            "Layer", "Type", "Params", "Trainable"
        ));
        out.push_str(&format!("{}\n", "-".repeat(55)));
        for layer in &self.layers {
            out.push_str(&format!(
                "{:<16} {:<14} {:>12} {:>10}\n",
                layer.name,
                layer.kind,
                crate::utils::format_number(layer.params),
                if layer.trainable { "yes" } else { "no" }
            ));
        }
        out.push_str(&format!("{}\n", "-".repeat(55)));
        out.push_str(&format!(
            "Total params: {}\nTrainable params: {}\nNon-trainable params: {}",
            crate::utils::format_number(self.total_params),
            crate::utils::format_number(self.trainable_params),
            crate::utils::format_number(self.non_trainable_params)
        ));
        out
    }
}
