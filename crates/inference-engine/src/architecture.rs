//! Network topology the cardamom weights were trained against
//!
//! MobileNetV2 (alpha 1.0, no top) as a frozen backbone, then global average
//! pooling, `Dense(128, relu)`, `Dropout(0.2)` and `Dense(3, softmax)`.
//! Layer names match the Keras model so its tensors line up by name.

/// One MobileNetV2 stage of `repeats` inverted-residual blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub expansion: usize,
    pub channels: usize,
    pub repeats: usize,
    /// Stride of the first block; the rest use 1
    pub stride: usize,
}

impl StageSpec {
    pub const fn new(expansion: usize, channels: usize, repeats: usize, stride: usize) -> Self {
        Self {
            expansion,
            channels,
            repeats,
            stride,
        }
    }
}

/// The seven MobileNetV2 stages (t, c, n, s)
pub const MOBILENET_V2_STAGES: [StageSpec; 7] = [
    StageSpec::new(1, 16, 1, 1),
    StageSpec::new(6, 24, 2, 2),
    StageSpec::new(6, 32, 3, 2),
    StageSpec::new(6, 64, 4, 2),
    StageSpec::new(6, 96, 3, 1),
    StageSpec::new(6, 160, 3, 2),
    StageSpec::new(6, 320, 1, 1),
];

/// Kernel size of the stem and depthwise convolutions
pub const SPATIAL_KERNEL: usize = 3;

const BATCH_NORM_PARAMS: [&str; 4] = ["gamma", "beta", "moving_mean", "moving_variance"];

/// Full network description
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureSpec {
    /// Square input side in pixels
    pub input_size: usize,
    pub input_channels: usize,
    pub stem_channels: usize,
    pub stages: Vec<StageSpec>,
    /// Channels of the final 1x1 convolution
    pub last_channels: usize,
    pub hidden_units: usize,
    /// Training-time dropout; identity at inference
    pub dropout_rate: f32,
    pub num_classes: usize,
}

/// A single inverted-residual block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    /// Keras layer prefix, e.g. `expanded_conv_` or `block_4_`
    pub prefix: String,
    pub in_channels: usize,
    pub expansion: usize,
    pub out_channels: usize,
    pub stride: usize,
}

impl BlockSpec {
    pub fn hidden_channels(&self) -> usize {
        self.in_channels * self.expansion
    }

    pub fn has_expansion(&self) -> bool {
        self.expansion != 1
    }

    pub fn has_residual(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }

    pub fn expand_layer(&self) -> String {
        format!("{}expand", self.prefix)
    }

    pub fn depthwise_layer(&self) -> String {
        format!("{}depthwise", self.prefix)
    }

    pub fn project_layer(&self) -> String {
        format!("{}project", self.prefix)
    }
}

/// Expected name and shape of one Keras weight tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    fn new(name: String, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

pub const STEM_LAYER: &str = "Conv1";
pub const STEM_BN: &str = "bn_Conv1";
pub const LAST_CONV_LAYER: &str = "Conv_1";
pub const LAST_CONV_BN: &str = "Conv_1_bn";
pub const HIDDEN_DENSE: &str = "dense";
pub const OUTPUT_DENSE: &str = "dense_1";

/// Batch-norm layer name paired with a convolution
pub fn batch_norm_layer(conv_layer: &str) -> String {
    format!("{}_BN", conv_layer)
}

/// `layer/param` tensor name
pub fn tensor_name(layer: &str, param: &str) -> String {
    format!("{}/{}", layer, param)
}

impl ArchitectureSpec {
    /// MobileNetV2 backbone with the 128-unit head, 224x224 RGB in, 3 classes out
    pub fn cardamom() -> Self {
        Self {
            input_size: 224,
            input_channels: 3,
            stem_channels: 32,
            stages: MOBILENET_V2_STAGES.to_vec(),
            last_channels: 1280,
            hidden_units: 128,
            dropout_rate: 0.2,
            num_classes: 3,
        }
    }

    /// Input tensor shape `(batch, height, width, channels)`
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_size, self.input_size, self.input_channels]
    }

    /// Inverted-residual blocks in execution order
    pub fn blocks(&self) -> Vec<BlockSpec> {
        let mut blocks = Vec::new();
        let mut in_channels = self.stem_channels;

        for stage in &self.stages {
            for repeat in 0..stage.repeats {
                let id = blocks.len();
                let prefix = if id == 0 {
                    "expanded_conv_".to_string()
                } else {
                    format!("block_{}_", id)
                };
                blocks.push(BlockSpec {
                    prefix,
                    in_channels,
                    expansion: stage.expansion,
                    out_channels: stage.channels,
                    stride: if repeat == 0 { stage.stride } else { 1 },
                });
                in_channels = stage.channels;
            }
        }

        blocks
    }

    /// Channels entering the final 1x1 convolution
    pub fn backbone_out_channels(&self) -> usize {
        self.stages.last().map_or(self.stem_channels, |s| s.channels)
    }

    /// Every tensor the Keras model holds, in network order
    pub fn manifest(&self) -> Vec<TensorSpec> {
        let mut tensors = Vec::new();

        push_conv(
            &mut tensors,
            STEM_LAYER,
            STEM_BN,
            "kernel",
            [SPATIAL_KERNEL, SPATIAL_KERNEL, self.input_channels, self.stem_channels],
        );

        for block in self.blocks() {
            let hidden = block.hidden_channels();
            if block.has_expansion() {
                let layer = block.expand_layer();
                push_conv(
                    &mut tensors,
                    &layer,
                    &batch_norm_layer(&layer),
                    "kernel",
                    [1, 1, block.in_channels, hidden],
                );
            }

            let layer = block.depthwise_layer();
            push_conv(
                &mut tensors,
                &layer,
                &batch_norm_layer(&layer),
                "depthwise_kernel",
                [SPATIAL_KERNEL, SPATIAL_KERNEL, hidden, 1],
            );

            let layer = block.project_layer();
            push_conv(
                &mut tensors,
                &layer,
                &batch_norm_layer(&layer),
                "kernel",
                [1, 1, hidden, block.out_channels],
            );
        }

        push_conv(
            &mut tensors,
            LAST_CONV_LAYER,
            LAST_CONV_BN,
            "kernel",
            [1, 1, self.backbone_out_channels(), self.last_channels],
        );

        push_dense(&mut tensors, HIDDEN_DENSE, self.last_channels, self.hidden_units);
        push_dense(&mut tensors, OUTPUT_DENSE, self.hidden_units, self.num_classes);

        tensors
    }

    /// Scalar parameters across the manifest
    pub fn parameter_count(&self) -> usize {
        self.manifest().iter().map(TensorSpec::element_count).sum()
    }
}

fn push_conv(out: &mut Vec<TensorSpec>, layer: &str, bn: &str, kernel_param: &str, shape: [usize; 4]) {
    // Depthwise kernels are (k, k, c, 1); batch norm follows the channel axis
    let channels = if kernel_param == "depthwise_kernel" { shape[2] } else { shape[3] };
    out.push(TensorSpec::new(tensor_name(layer, kernel_param), shape.to_vec()));
    for param in BATCH_NORM_PARAMS {
        out.push(TensorSpec::new(tensor_name(bn, param), vec![channels]));
    }
}

fn push_dense(out: &mut Vec<TensorSpec>, layer: &str, inputs: usize, units: usize) {
    out.push(TensorSpec::new(tensor_name(layer, "kernel"), vec![inputs, units]));
    out.push(TensorSpec::new(tensor_name(layer, "bias"), vec![units]));
}
