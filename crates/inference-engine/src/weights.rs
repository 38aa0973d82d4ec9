//! Keras-side weights: the named tensors of a trained model, before they are
//! laid out as burn modules
//!
//! Names follow the Keras layer naming the model was trained with
//! (`Conv1/kernel`, `block_3_project_BN/moving_mean`, `dense_1/bias`, ...).

use std::collections::{HashMap, HashSet};

use crate::InferenceError;

/// A single named weight tensor, row-major in Keras layout
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }

    /// Number of values the shape calls for
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Validated set of Keras weight tensors
#[derive(Debug, Clone, PartialEq)]
pub struct KerasWeights {
    tensors: Vec<NamedTensor>,
}

impl KerasWeights {
    /// Reject duplicate names and tensors whose values do not fill their shape
    pub fn new(tensors: Vec<NamedTensor>) -> Result<Self, InferenceError> {
        let mut seen = HashSet::new();
        for tensor in &tensors {
            if !seen.insert(tensor.name.as_str()) {
                return Err(InferenceError::ModelLoadError(format!(
                    "duplicate tensor {}",
                    tensor.name
                )));
            }
            if tensor.values.len() != tensor.element_count() {
                return Err(InferenceError::ModelLoadError(format!(
                    "tensor {} has {} values for shape {:?}",
                    tensor.name,
                    tensor.values.len(),
                    tensor.shape
                )));
            }
        }
        Ok(Self { tensors })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.tensors.iter().map(|t| t.values.len()).sum()
    }

    /// Move every `from/*` tensor to `to/*`. Returns how many were renamed.
    ///
    /// Keras numbers dense layers per session, so a retrained head may be
    /// saved as `dense_4`/`dense_5` instead of `dense`/`dense_1`.
    pub fn rename_layer(&mut self, from: &str, to: &str) -> Result<usize, InferenceError> {
        if from == to {
            return Ok(0);
        }
        let prefix = format!("{}/", from);
        let target = format!("{}/", to);
        let has_source = self.tensors.iter().any(|t| t.name.starts_with(&prefix));
        if has_source && self.tensors.iter().any(|t| t.name.starts_with(&target)) {
            return Err(InferenceError::ModelLoadError(format!(
                "cannot rename {} to {}: layer already present",
                from, to
            )));
        }

        let mut renamed = 0;
        for tensor in &mut self.tensors {
            if let Some(param) = tensor.name.strip_prefix(&prefix) {
                tensor.name = format!("{}{}", target, param);
                renamed += 1;
            }
        }
        Ok(renamed)
    }

    /// Hand the tensors over to a name-keyed reader
    pub fn into_reader(self) -> WeightReader {
        WeightReader {
            tensors: self
                .tensors
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }
}

/// Canonical `layer/param` name for a weight stored under an HDF5 path
///
/// Keeps the last two path components and drops the `:0` variable suffix,
/// so `/model_weights/mobilenetv2_1.00_224/Conv1/kernel:0` becomes
/// `Conv1/kernel`. Keras 3 stores depthwise kernels as plain `kernel`; those
/// are mapped back to `depthwise_kernel`.
pub fn keras_tensor_name(path: &str) -> String {
    let mut parts = path.rsplit('/').filter(|part| !part.is_empty());
    let param = parts.next().unwrap_or_default();
    let param = param.strip_suffix(":0").unwrap_or(param);

    let Some(layer) = parts.next() else {
        return param.to_string();
    };

    let param = if param == "kernel" && layer.ends_with("_depthwise") {
        "depthwise_kernel"
    } else {
        param
    };
    format!("{}/{}", layer, param)
}

/// Hands out tensors by name, checking each shape against the architecture.
/// Every tensor must be consumed before [`WeightReader::finish`].
pub struct WeightReader {
    tensors: HashMap<String, NamedTensor>,
}

impl WeightReader {
    /// Remove a tensor, requiring the exact shape
    pub fn take(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>, InferenceError> {
        let tensor = self
            .tensors
            .remove(name)
            .ok_or_else(|| InferenceError::MissingWeight(name.to_string()))?;

        if tensor.shape != shape {
            return Err(InferenceError::WeightShapeMismatch {
                name: name.to_string(),
                expected: format!("{:?}", shape),
                actual: format!("{:?}", tensor.shape),
            });
        }

        Ok(tensor.values)
    }

    /// Tensors not yet taken
    pub fn remaining(&self) -> usize {
        self.tensors.len()
    }

    /// Fail if the weights carried tensors nothing asked for
    pub fn finish(self) -> Result<(), InferenceError> {
        if self.tensors.is_empty() {
            return Ok(());
        }
        let mut names: Vec<String> = self.tensors.into_keys().collect();
        names.sort();
        Err(InferenceError::UnexpectedWeights(names.join(", ")))
    }
}
