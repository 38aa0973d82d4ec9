//! Reads the weights of a Keras `.h5` model file
//!
//! Handles both full-model files (weights under `model_weights`) and
//! weights-only files (layers at the root). Optimizer state is ignored.

use std::path::Path;

use hdf5::{File, Group};
use tracing::{debug, info};

use crate::weights::{keras_tensor_name, KerasWeights, NamedTensor};
use crate::InferenceError;

const MODEL_WEIGHTS_GROUP: &str = "model_weights";
const SKIPPED_GROUPS: [&str; 2] = ["optimizer_weights", "top_level_model_weights"];

/// Collect every float dataset of the model as a Keras-named tensor
pub fn read_keras_h5(path: &Path) -> Result<KerasWeights, InferenceError> {
    if !path.is_file() {
        return Err(InferenceError::WeightsNotFound(path.display().to_string()));
    }
    info!("Reading Keras weights from {}", path.display());

    let file = File::open(path).map_err(h5_error)?;
    let root = if file.link_exists(MODEL_WEIGHTS_GROUP) {
        file.group(MODEL_WEIGHTS_GROUP).map_err(h5_error)?
    } else {
        file.group("/").map_err(h5_error)?
    };

    let mut tensors = Vec::new();
    collect(&root, &mut tensors)?;
    debug!("Found {} weight datasets", tensors.len());

    KerasWeights::new(tensors)
}

fn collect(group: &Group, out: &mut Vec<NamedTensor>) -> Result<(), InferenceError> {
    for dataset in group.datasets().map_err(h5_error)? {
        let path = dataset.name();
        let values = dataset.read_raw::<f32>().map_err(h5_error)?;
        out.push(NamedTensor::new(keras_tensor_name(&path), dataset.shape(), values));
    }

    for child in group.groups().map_err(h5_error)? {
        let name = child.name();
        if SKIPPED_GROUPS.iter().any(|skipped| name.ends_with(skipped)) {
            continue;
        }
        collect(&child, out)?;
    }
    Ok(())
}

fn h5_error(err: hdf5::Error) -> InferenceError {
    InferenceError::ModelLoadError(format!("HDF5: {}", err))
}
