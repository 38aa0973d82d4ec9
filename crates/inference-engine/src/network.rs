//! MobileNetV2 backbone + dense head as burn modules

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation, backend::Backend, Tensor, TensorData},
};
use ndarray::Array4;
use tracing::{debug, info};

use crate::architecture::{
    batch_norm_layer, ArchitectureSpec, BlockSpec, HIDDEN_DENSE, LAST_CONV_BN, LAST_CONV_LAYER, OUTPUT_DENSE,
    SPATIAL_KERNEL, STEM_BN, STEM_LAYER,
};
use crate::engine::Classifier;
use crate::layers::{check_dense, dense, dense_from_keras, ConvBn, ConvBnConfig};
use crate::weights::{KerasWeights, WeightReader};
use crate::InferenceError;

/// Extension the record file is stored under
pub const RECORD_EXTENSION: &str = "mpk";

/// Weights-only record: parameter names follow the module fields, values are f32
pub type LeafRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Expand (1x1) → depthwise (3x3) → project (1x1), with an optional shortcut
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
    residual: bool,
}

struct BlockConfigs {
    expand: Option<ConvBnConfig>,
    depthwise: ConvBnConfig,
    project: ConvBnConfig,
}

impl BlockConfigs {
    fn new(block: &BlockSpec) -> Self {
        let hidden = block.hidden_channels();
        Self {
            expand: block
                .has_expansion()
                .then(|| ConvBnConfig::standard(block.in_channels, hidden, 1, 1)),
            depthwise: ConvBnConfig::depthwise(hidden, SPATIAL_KERNEL, block.stride),
            project: ConvBnConfig::standard(hidden, block.out_channels, 1, 1).linear(),
        }
    }
}

impl<B: Backend> InvertedResidual<B> {
    fn new(block: &BlockSpec, device: &B::Device) -> Self {
        let configs = BlockConfigs::new(block);
        Self {
            expand: configs.expand.map(|config| config.init(device)),
            depthwise: configs.depthwise.init(device),
            project: configs.project.init(device),
            residual: block.has_residual(),
        }
    }

    fn from_keras(reader: &mut WeightReader, block: &BlockSpec, device: &B::Device) -> Result<Self, InferenceError> {
        let configs = BlockConfigs::new(block);
        let mut load = |config: &ConvBnConfig, layer: String| {
            config.init_keras::<B>(reader, &layer, &batch_norm_layer(&layer), device)
        };

        let expand = match &configs.expand {
            Some(config) => Some(load(config, block.expand_layer())?),
            None => None,
        };
        let depthwise = load(&configs.depthwise, block.depthwise_layer())?;
        let project = load(&configs.project, block.project_layer())?;

        Ok(Self {
            expand,
            depthwise,
            project,
            residual: block.has_residual(),
        })
    }

    fn check_shapes(&self, block: &BlockSpec) -> Result<(), InferenceError> {
        let configs = BlockConfigs::new(block);
        match (&self.expand, &configs.expand) {
            (Some(expand), Some(config)) => expand.check_shapes(&block.expand_layer(), config)?,
            (None, None) => {}
            _ => {
                return Err(InferenceError::ModelLoadError(format!(
                    "{} expansion does not match the architecture",
                    block.prefix
                )))
            }
        }
        self.depthwise.check_shapes(&block.depthwise_layer(), &configs.depthwise)?;
        self.project.check_shapes(&block.project_layer(), &configs.project)
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.project.forward(x);

        if self.residual {
            x + input
        } else {
            x
        }
    }
}

fn stem_config(spec: &ArchitectureSpec) -> ConvBnConfig {
    ConvBnConfig::standard(spec.input_channels, spec.stem_channels, SPATIAL_KERNEL, 2)
}

fn last_conv_config(spec: &ArchitectureSpec) -> ConvBnConfig {
    ConvBnConfig::standard(spec.backbone_out_channels(), spec.last_channels, 1, 1)
}

/// The cardamom leaf classifier network.
///
/// Takes NCHW input and returns logits; softmax is applied by
/// [`LeafNet::forward_softmax`].
#[derive(Module, Debug)]
pub struct LeafNet<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    last_conv: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> LeafNet<B> {
    /// Freshly initialised network with the layout of `spec`
    pub fn new(spec: &ArchitectureSpec, device: &B::Device) -> Self {
        Self {
            stem: stem_config(spec).init(device),
            blocks: spec
                .blocks()
                .iter()
                .map(|block| InvertedResidual::new(block, device))
                .collect(),
            last_conv: last_conv_config(spec).init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: dense(spec.last_channels, spec.hidden_units, device),
            dropout: DropoutConfig::new(f64::from(spec.dropout_rate)).init(),
            output: dense(spec.hidden_units, spec.num_classes, device),
        }
    }

    /// Build `spec` and fill it from Keras weights. Every tensor must be used
    /// and every shape must match.
    pub fn from_keras(weights: KerasWeights, spec: &ArchitectureSpec, device: &B::Device) -> Result<Self, InferenceError> {
        debug!(
            "Building network from {} Keras tensors ({} parameters)",
            weights.len(),
            weights.parameter_count()
        );
        let mut reader = weights.into_reader();

        let stem = stem_config(spec).init_keras::<B>(&mut reader, STEM_LAYER, STEM_BN, device)?;
        let blocks = spec
            .blocks()
            .iter()
            .map(|block| InvertedResidual::from_keras(&mut reader, block, device))
            .collect::<Result<Vec<_>, _>>()?;
        let last_conv = last_conv_config(spec).init_keras::<B>(&mut reader, LAST_CONV_LAYER, LAST_CONV_BN, device)?;
        let hidden = dense_from_keras::<B>(&mut reader, HIDDEN_DENSE, spec.last_channels, spec.hidden_units, device)?;
        let output = dense_from_keras::<B>(&mut reader, OUTPUT_DENSE, spec.hidden_units, spec.num_classes, device)?;
        reader.finish()?;

        Ok(Self {
            stem,
            blocks,
            last_conv,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden,
            dropout: DropoutConfig::new(f64::from(spec.dropout_rate)).init(),
            output,
        })
    }

    /// Load a record written by [`LeafNet::save`]. The `.mpk` extension is
    /// implied.
    pub fn load(path: &Path, spec: &ArchitectureSpec, device: &B::Device) -> Result<Self, InferenceError> {
        let record_path = path.with_extension(RECORD_EXTENSION);
        if !record_path.is_file() {
            return Err(InferenceError::WeightsNotFound(record_path.display().to_string()));
        }
        info!("Loading weights from {}", record_path.display());

        let net = Self::new(spec, device)
            .load_file(record_path, &LeafRecorder::new(), device)
            .map_err(|e| InferenceError::Record(format!("{:?}", e)))?;
        net.check_shapes(spec)?;
        Ok(net)
    }

    /// Write the weights as a record; returns the file written
    pub fn save(&self, path: &Path) -> Result<PathBuf, InferenceError> {
        let record_path = path.with_extension(RECORD_EXTENSION);
        self.clone()
            .save_file(record_path.clone(), &LeafRecorder::new())
            .map_err(|e| InferenceError::Record(format!("{:?}", e)))?;
        Ok(record_path)
    }

    fn check_shapes(&self, spec: &ArchitectureSpec) -> Result<(), InferenceError> {
        let blocks = spec.blocks();
        if blocks.len() != self.blocks.len() {
            return Err(InferenceError::ModelLoadError(format!(
                "record holds {} blocks, architecture has {}",
                self.blocks.len(),
                blocks.len()
            )));
        }

        self.stem.check_shapes(STEM_LAYER, &stem_config(spec))?;
        for (block, block_spec) in self.blocks.iter().zip(&blocks) {
            block.check_shapes(block_spec)?;
        }
        self.last_conv.check_shapes(LAST_CONV_LAYER, &last_conv_config(spec))?;
        check_dense(&self.hidden, HIDDEN_DENSE, spec.last_channels, spec.hidden_units)?;
        check_dense(&self.output, OUTPUT_DENSE, spec.hidden_units, spec.num_classes)
    }

    /// Logits for a `[batch, channels, height, width]` input
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(input);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.last_conv.forward(x);

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        let x = x.reshape([batch, channels]);

        let x = activation::relu(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }

    pub fn forward_softmax(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        activation::softmax(self.forward(input), 1)
    }
}

/// [`Classifier`] over a loaded [`LeafNet`], fed NHWC ndarray images.
///
/// Burn parameters are not `Sync`, so the network sits behind a mutex. A
/// request holds the lock only to clone the module (tensor handles are
/// reference counted); the forward pass runs unlocked.
pub struct LeafClassifier<B: Backend> {
    model: Mutex<LeafNet<B>>,
    device: B::Device,
    input_shape: [usize; 4],
    num_classes: usize,
}

impl<B: Backend> LeafClassifier<B> {
    pub fn new(model: LeafNet<B>, spec: &ArchitectureSpec, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            device,
            input_shape: spec.input_shape(),
            num_classes: spec.num_classes,
        }
    }

    /// Rebuild `spec` and load its weights record from `path`
    pub fn load(path: &Path, spec: &ArchitectureSpec, device: B::Device) -> Result<Self, InferenceError> {
        let model = LeafNet::load(path, spec, &device)?;
        Ok(Self::new(model, spec, device))
    }

    fn model(&self) -> Result<LeafNet<B>, InferenceError> {
        self.model
            .lock()
            .map(|model| model.clone())
            .map_err(|_| InferenceError::InferenceFailed("model lock poisoned".to_string()))
    }
}

impl<B: Backend> Classifier for LeafClassifier<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn classify(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        if input.shape() != self.input_shape.as_slice() {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{:?}", self.input_shape),
                actual: format!("{:?}", input.shape()),
            });
        }

        let values: Vec<f32> = input.iter().copied().collect();
        let nhwc = Tensor::<B, 4>::from_data(TensorData::new(values, self.input_shape), &self.device);

        let probabilities = self.model()?.forward_softmax(nhwc.permute([0, 3, 1, 2]));
        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(format!("{:?}", e)))
    }
}
