//! Convolution + batch-norm building blocks over NCHW burn tensors
//!
//! Keras pads strided MobileNetV2 convolutions TensorFlow-style: any odd
//! padding goes on the bottom/right edge. Burn's own `Same` padding is
//! symmetric, so convolutions here run `Valid` on an explicitly padded input.

use burn::{
    module::{Module, Param, RunningState},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::architecture::tensor_name;
use crate::weights::WeightReader;
use crate::InferenceError;

/// Epsilon of the batch-norm layers the weights were trained with
pub const BATCH_NORM_EPSILON: f64 = 1e-3;

/// TensorFlow "same" padding along one axis, as `(before, after)`.
/// Any odd remainder goes after the last element.
pub fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let output = input.div_ceil(stride);
    let total = (output.saturating_sub(1) * stride + kernel).saturating_sub(input);
    (total / 2, total - total / 2)
}

/// Zero-pad the spatial axes of an NCHW tensor for a "same" convolution
pub fn pad_same<B: Backend>(x: Tensor<B, 4>, kernel: usize, stride: usize) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (top, bottom) = same_padding(height, kernel, stride);
    let (left, right) = same_padding(width, kernel, stride);

    let x = pad_axis(x, 2, top, bottom);
    pad_axis(x, 3, left, right)
}

fn pad_axis<B: Backend>(x: Tensor<B, 4>, dim: usize, before: usize, after: usize) -> Tensor<B, 4> {
    if before == 0 && after == 0 {
        return x;
    }

    let dims = x.dims();
    let device = x.device();
    let zeros = |len: usize| {
        let mut shape = dims;
        shape[dim] = len;
        Tensor::<B, 4>::zeros(shape, &device)
    };

    let mut parts = Vec::with_capacity(3);
    if before > 0 {
        parts.push(zeros(before));
    }
    parts.push(x);
    if after > 0 {
        parts.push(zeros(after));
    }
    Tensor::cat(parts, dim)
}

pub fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}

/// Shape and wiring of one convolution + batch-norm pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBnConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    /// One filter per input channel (`groups == in_channels`)
    pub depthwise: bool,
    /// Clamp to `[0, 6]` after batch norm
    pub relu6: bool,
}

impl ConvBnConfig {
    /// Full convolution followed by ReLU6
    pub fn standard(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            depthwise: false,
            relu6: true,
        }
    }

    /// Depthwise convolution with channel multiplier 1, followed by ReLU6
    pub fn depthwise(channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            depthwise: true,
            ..Self::standard(channels, channels, kernel, stride)
        }
    }

    /// Drop the activation (linear bottleneck)
    pub fn linear(self) -> Self {
        Self { relu6: false, ..self }
    }

    fn groups(&self) -> usize {
        if self.depthwise {
            self.in_channels
        } else {
            1
        }
    }

    /// Burn weight layout `[out, in / groups, k, k]`
    pub fn weight_shape(&self) -> [usize; 4] {
        [
            self.out_channels,
            self.in_channels / self.groups(),
            self.kernel,
            self.kernel,
        ]
    }

    /// Keras kernel parameter name and layout
    fn keras_kernel(&self) -> (&'static str, [usize; 4]) {
        if self.depthwise {
            ("depthwise_kernel", [self.kernel, self.kernel, self.in_channels, 1])
        } else {
            ("kernel", [self.kernel, self.kernel, self.in_channels, self.out_channels])
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBn<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_groups(self.groups())
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(self.out_channels)
            .with_epsilon(BATCH_NORM_EPSILON)
            .init(device);

        ConvBn {
            conv,
            bn,
            kernel: self.kernel,
            stride: self.stride,
            relu6: self.relu6,
        }
    }

    /// Build the pair from the Keras tensors of `layer` and its batch norm `bn_layer`
    pub fn init_keras<B: Backend>(
        &self,
        reader: &mut WeightReader,
        layer: &str,
        bn_layer: &str,
        device: &B::Device,
    ) -> Result<ConvBn<B>, InferenceError> {
        let mut block = self.init(device);

        let (param, keras_shape) = self.keras_kernel();
        let kernel = reader.take(&tensor_name(layer, param), &keras_shape)?;
        // (k, k, in, out) -> (out, in, k, k); depthwise (k, k, c, 1) -> (c, 1, k, k)
        let permutation = if self.depthwise { [2, 3, 0, 1] } else { [3, 2, 0, 1] };
        let kernel = Tensor::<B, 4>::from_data(TensorData::new(kernel, keras_shape), device).permute(permutation);
        block.conv.weight = Param::from_tensor(kernel);

        block.bn = batch_norm_from_keras(block.bn, reader, bn_layer, self.out_channels, device)?;
        Ok(block)
    }
}

fn batch_norm_from_keras<B: Backend>(
    mut bn: BatchNorm<B, 2>,
    reader: &mut WeightReader,
    layer: &str,
    channels: usize,
    device: &B::Device,
) -> Result<BatchNorm<B, 2>, InferenceError> {
    let mut take = |param: &str| -> Result<Tensor<B, 1>, InferenceError> {
        let values = reader.take(&tensor_name(layer, param), &[channels])?;
        Ok(Tensor::from_data(TensorData::new(values, [channels]), device))
    };

    bn.gamma = Param::from_tensor(take("gamma")?);
    bn.beta = Param::from_tensor(take("beta")?);
    bn.running_mean = RunningState::new(take("moving_mean")?);
    bn.running_var = RunningState::new(take("moving_variance")?);
    Ok(bn)
}

/// Bias-free convolution, inference-mode batch norm, optional ReLU6
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    kernel: usize,
    stride: usize,
    relu6: bool,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_same(x, self.kernel, self.stride);
        let x = self.bn.forward(self.conv.forward(x));
        if self.relu6 {
            relu6(x)
        } else {
            x
        }
    }

    /// Compare loaded parameter shapes with what `config` builds
    pub fn check_shapes(&self, layer: &str, config: &ConvBnConfig) -> Result<(), InferenceError> {
        check_dims(layer, &config.weight_shape(), &self.conv.weight.dims())?;
        let channels = [config.out_channels];
        check_dims(layer, &channels, &self.bn.gamma.dims())?;
        check_dims(layer, &channels, &self.bn.beta.dims())?;
        check_dims(layer, &channels, &self.bn.running_mean.value().dims())?;
        check_dims(layer, &channels, &self.bn.running_var.value().dims())
    }
}

pub fn dense<B: Backend>(inputs: usize, units: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(inputs, units).init(device)
}

/// Keras `Dense` kernels are `(inputs, units)`, the same layout as burn's `Linear`
pub fn dense_from_keras<B: Backend>(
    reader: &mut WeightReader,
    layer: &str,
    inputs: usize,
    units: usize,
    device: &B::Device,
) -> Result<Linear<B>, InferenceError> {
    let mut linear = dense(inputs, units, device);

    let kernel = reader.take(&tensor_name(layer, "kernel"), &[inputs, units])?;
    let bias = reader.take(&tensor_name(layer, "bias"), &[units])?;
    linear.weight = Param::from_tensor(Tensor::from_data(TensorData::new(kernel, [inputs, units]), device));
    linear.bias = Some(Param::from_tensor(Tensor::from_data(TensorData::new(bias, [units]), device)));
    Ok(linear)
}

pub fn check_dense<B: Backend>(
    linear: &Linear<B>,
    layer: &str,
    inputs: usize,
    units: usize,
) -> Result<(), InferenceError> {
    check_dims(layer, &[inputs, units], &linear.weight.dims())?;
    match &linear.bias {
        Some(bias) => check_dims(layer, &[units], &bias.dims()),
        None => Err(InferenceError::MissingWeight(tensor_name(layer, "bias"))),
    }
}

fn check_dims(layer: &str, expected: &[usize], actual: &[usize]) -> Result<(), InferenceError> {
    if expected == actual {
        return Ok(());
    }
    Err(InferenceError::WeightShapeMismatch {
        name: layer.to_string(),
        expected: format!("{:?}", expected),
        actual: format!("{:?}", actual),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{KerasWeights, NamedTensor};
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type TestBackend = NdArray;

    /// Identity batch norm: var + eps == 1
    fn identity_bn(layer: &str, channels: usize) -> Vec<NamedTensor> {
        vec![
            NamedTensor::new(format!("{}/gamma", layer), vec![channels], vec![1.0; channels]),
            NamedTensor::new(format!("{}/beta", layer), vec![channels], vec![0.0; channels]),
            NamedTensor::new(format!("{}/moving_mean", layer), vec![channels], vec![0.0; channels]),
            NamedTensor::new(
                format!("{}/moving_variance", layer),
                vec![channels],
                vec![1.0 - BATCH_NORM_EPSILON as f32; channels],
            ),
        ]
    }

    fn reader(mut tensors: Vec<NamedTensor>, bn_layer: &str, channels: usize) -> WeightReader {
        tensors.extend(identity_bn(bn_layer, channels));
        KerasWeights::new(tensors).unwrap().into_reader()
    }

    fn values(x: Tensor<TestBackend, 4>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_same_padding_matches_tensorflow() {
        assert_eq!(same_padding(224, 3, 2), (0, 1));
        assert_eq!(same_padding(7, 3, 2), (1, 1));
        assert_eq!(same_padding(7, 3, 1), (1, 1));
        assert_eq!(same_padding(14, 1, 1), (0, 0));
        assert_eq!(same_padding(4, 3, 2), (0, 1));
    }

    #[test]
    fn test_relu6() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.5, 6.5], &device);
        assert_eq!(relu6(x).into_data().to_vec::<f32>().unwrap(), vec![0.0, 0.5, 6.0]);
    }

    #[test]
    fn test_depthwise_stride2_pads_bottom_right() {
        let device = Default::default();
        let config = ConvBnConfig::depthwise(2, 3, 2).linear();
        // Channel 0 sums its window, channel 1 doubles the sum
        let mut kernel = Vec::with_capacity(18);
        for _ in 0..9 {
            kernel.extend([1.0, 2.0]);
        }
        let mut reader = reader(
            vec![NamedTensor::new("dw/depthwise_kernel", vec![3, 3, 2, 1], kernel)],
            "dw_BN",
            2,
        );
        let block: ConvBn<TestBackend> = config.init_keras(&mut reader, "dw", "dw_BN", &device).unwrap();
        reader.finish().unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 2, 4, 4], &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [1, 2, 2, 2]);

        // Windows start at rows/cols 0 and 2; only the far edge is padded.
        // Symmetric padding would give 4 in the top-left corner.
        assert_close(&values(output), &[9.0, 6.0, 6.0, 4.0, 18.0, 12.0, 12.0, 8.0]);
    }

    #[test]
    fn test_pointwise_kernel_layout() {
        let device = Default::default();
        let config = ConvBnConfig::standard(2, 3, 1, 1).linear();
        // Keras (1, 1, in, out), row-major over (in, out)
        let kernel = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut reader = reader(vec![NamedTensor::new("pw/kernel", vec![1, 1, 2, 3], kernel)], "pw_BN", 3);
        let block: ConvBn<TestBackend> = config.init_keras(&mut reader, "pw", "pw_BN", &device).unwrap();
        block.check_shapes("pw", &config).unwrap();

        let input = Tensor::<TestBackend, 4>::from_data(TensorData::new(vec![1.0, 10.0], [1, 2, 1, 1]), &device);
        // out_j = k[0][j] * 1 + k[1][j] * 10
        assert_close(&values(block.forward(input)), &[41.0, 52.0, 63.0]);
    }

    #[test]
    fn test_batch_norm_uses_running_statistics() {
        let device = Default::default();
        let config = ConvBnConfig::standard(1, 1, 1, 1);
        let mut reader = KerasWeights::new(vec![
            NamedTensor::new("c/kernel", vec![1, 1, 1, 1], vec![1.0]),
            NamedTensor::new("c_BN/gamma", vec![1], vec![2.0]),
            NamedTensor::new("c_BN/beta", vec![1], vec![0.5]),
            NamedTensor::new("c_BN/moving_mean", vec![1], vec![1.0]),
            NamedTensor::new("c_BN/moving_variance", vec![1], vec![4.0 - BATCH_NORM_EPSILON as f32]),
        ])
        .unwrap()
        .into_reader();
        let block: ConvBn<TestBackend> = config.init_keras(&mut reader, "c", "c_BN", &device).unwrap();

        let input = Tensor::<TestBackend, 4>::from_data(TensorData::new(vec![5.0, -9.0], [2, 1, 1, 1]), &device);
        // (5 - 1) / 2 * 2 + 0.5 = 4.5; (-9 - 1) / 2 * 2 + 0.5 < 0 -> relu6 -> 0
        assert_close(&values(block.forward(input)), &[4.5, 0.0]);
    }

    #[test]
    fn test_wrong_kernel_shape_is_rejected() {
        let device = Default::default();
        let config = ConvBnConfig::standard(3, 8, 3, 2);
        let mut reader = reader(
            vec![NamedTensor::new("Conv1/kernel", vec![3, 3, 8, 3], vec![0.0; 216])],
            "bn_Conv1",
            8,
        );
        let result: Result<ConvBn<TestBackend>, _> = config.init_keras(&mut reader, "Conv1", "bn_Conv1", &device);
        assert!(matches!(result, Err(InferenceError::WeightShapeMismatch { .. })));
    }

    #[test]
    fn test_check_shapes_catches_width_change() {
        let device = Default::default();
        let block: ConvBn<TestBackend> = ConvBnConfig::standard(3, 8, 3, 2).init(&device);
        assert!(block.check_shapes("Conv1", &ConvBnConfig::standard(3, 8, 3, 2)).is_ok());
        assert!(block.check_shapes("Conv1", &ConvBnConfig::standard(3, 16, 3, 2)).is_err());
    }

    #[test]
    fn test_dense_layout() {
        let device = Default::default();
        let mut reader = KerasWeights::new(vec![
            NamedTensor::new("dense/kernel", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]),
            NamedTensor::new("dense/bias", vec![2], vec![0.5, -0.5]),
        ])
        .unwrap()
        .into_reader();
        let linear: Linear<TestBackend> = dense_from_keras(&mut reader, "dense", 2, 2, &device).unwrap();
        check_dense(&linear, "dense", 2, 2).unwrap();

        let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0, 1.0], [1, 2]), &device);
        let y = linear.forward(x).into_data().to_vec::<f32>().unwrap();
        assert_close(&y, &[4.5, 5.5]);
    }

    proptest! {
        #[test]
        fn prop_same_padding_gives_ceil_output(input in 1usize..300, kernel in 1usize..8, stride in 1usize..4) {
            let (before, after) = same_padding(input, kernel, stride);
            prop_assert!(after == before || after == before + 1);

            let padded = input + before + after;
            if padded >= kernel {
                prop_assert_eq!((padded - kernel) / stride + 1, input.div_ceil(stride));
            }
        }
    }
}
