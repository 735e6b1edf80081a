//! Checkpointing and Serialization.
//!
//! Parameters are saved as a `safetensors` file: one F32 tensor per parameter
//! name, plus string metadata. The file is written next to its destination and
//! renamed into place, so a reader never observes a half-written checkpoint.

use crate::error::{Error, Result};
use crate::models::Parameter;
use crate::tensor::Tensor;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Tensors and metadata read back from a checkpoint file.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub tensors: HashMap<String, Tensor<f32, 2>>,
    pub metadata: HashMap<String, String>,
}

fn checkpoint_err(context: &str, err: impl std::fmt::Debug) -> Error {
    Error::Checkpoint(format!("{context}: {err:?}"))
}

/// Writes `params` to `path` with the given metadata.
///
/// Names must be unique. Returns the path that was written.
pub fn save_parameters<P: AsRef<Path>>(
    path: P,
    params: &[&Parameter],
    metadata: HashMap<String, String>,
) -> Result<PathBuf> {
    let path = path.as_ref();

    // Little-endian bytes must outlive the views that borrow them.
    let bytes: Vec<Vec<u8>> = params
        .iter()
        .map(|p| p.value.data().iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();

    let mut seen = HashSet::new();
    let mut views = Vec::with_capacity(params.len());
    for (p, data) in params.iter().zip(&bytes) {
        if !seen.insert(p.name.as_str()) {
            return Err(Error::Checkpoint(format!("duplicate parameter name {:?}", p.name)));
        }
        let view = TensorView::new(Dtype::F32, p.value.shape().to_vec(), data)
            .map_err(|e| checkpoint_err("invalid tensor view", e))?;
        views.push((p.name.clone(), view));
    }

    let named = views.iter().map(|(name, view)| (name.as_str(), view));
    let blob = safetensors::serialize(named, &Some(metadata))
        .map_err(|e| checkpoint_err("failed to serialize checkpoint", e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, &blob)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    info!(path = %path.display(), tensors = params.len(), bytes = blob.len(), "checkpoint written");
    Ok(path.to_path_buf())
}

/// Reads every tensor of a checkpoint written by [`save_parameters`].
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let file_content = fs::read(path)?;

    let (_, header) = SafeTensors::read_metadata(&file_content)
        .map_err(|e| checkpoint_err("failed to read header", e))?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let safetensors = SafeTensors::deserialize(&file_content)
        .map_err(|e| checkpoint_err("failed to deserialize safetensors", e))?;

    let mut tensors = HashMap::new();
    for (name, view) in safetensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(Error::Checkpoint(format!(
                "tensor {name:?} has dtype {:?}, expected F32",
                view.dtype()
            )));
        }
        let shape: [usize; 2] = view.shape().try_into().map_err(|_| {
            Error::Checkpoint(format!("tensor {name:?} has shape {:?}, expected rank 2", view.shape()))
        })?;
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        tensors.insert(name, Tensor::new(data, shape)?);
    }

    Ok(Checkpoint { tensors, metadata })
}

/// Overwrites each parameter's value with the same-named tensor from `checkpoint`.
pub fn restore_parameters(params: &mut [&mut Parameter], checkpoint: &Checkpoint) -> Result<()> {
    for p in params.iter_mut() {
        let saved = checkpoint
            .tensors
            .get(&p.name)
            .ok_or_else(|| Error::Checkpoint(format!("checkpoint has no tensor {:?}", p.name)))?;
        p.value.expect_same_shape(saved)?;
        p.value = saved.clone();
    }
    Ok(())
}
