use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

use crate::error::{ModelError, Result};

/// Outcome of copying a checkpoint into a [`nn::VarStore`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Store variables the file did not provide.
    pub missing: Vec<String>,
    /// File tensors with no matching variable.
    pub unexpected: Vec<String>,
}

fn to_kind(dtype: Dtype) -> Result<Kind> {
    match dtype {
        Dtype::F32 => Ok(Kind::Float),
        Dtype::F16 => Ok(Kind::Half),
        Dtype::BF16 => Ok(Kind::BFloat16),
        Dtype::F64 => Ok(Kind::Double),
        other => Err(ModelError::UnsupportedDtype(format!("{other:?}"))),
    }
}

fn view_to_tensor(view: &TensorView<'_>, device: Device) -> Result<Tensor> {
    let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
    let kind = to_kind(view.dtype())?;
    Ok(Tensor::from_data_size(view.data(), &shape, kind).to_device(device))
}

/// Copies every tensor of the file into `vs`.
///
/// `rename` maps a file key to the variable name it should fill. Shape
/// mismatches are errors; missing and unexpected names are reported.
pub fn load_safetensors<P, F>(vs: &mut nn::VarStore, path: P, rename: F) -> Result<LoadReport>
where
    P: AsRef<Path>,
    F: Fn(&str) -> String,
{
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut report = LoadReport::default();

    for (key, view) in tensors.tensors() {
        let name = rename(&key);
        let Some(var) = variables.get_mut(&name) else {
            report.unexpected.push(key);
            continue;
        };

        let tensor = view_to_tensor(&view, device)?;
        if tensor.size() != var.size() {
            return Err(ModelError::ShapeMismatch {
                name,
                expected: var.size(),
                found: tensor.size(),
            });
        }

        tch::no_grad(|| {
            var.copy_(&tensor.to_kind(var.kind()));
        });
        log::trace!("Loaded tensor: {}", name);
        report.loaded.push(name);
    }

    report.missing = variables
        .into_keys()
        .filter(|name| !report.loaded.contains(name))
        .collect();
    report.missing.sort();
    Ok(report)
}

/// Reads all tensors of a file onto `device`, keyed by name.
pub fn read_safetensors<P: AsRef<Path>>(path: P, device: Device) -> Result<HashMap<String, Tensor>> {
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| Ok((name, view_to_tensor(&view, device)?)))
        .collect()
}

/// Writes tensors as little-endian f32 with `{"format": "pt"}` metadata.
pub fn save_safetensors<P: AsRef<Path>>(tensors: &[(String, Tensor)], path: P) -> Result<()> {
    let mut buffers = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let tensor = tensor.to_device(Device::Cpu).to_kind(Kind::Float).contiguous();
        let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
        let values = Vec::<f32>::try_from(&tensor.flatten(0, -1))?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name.as_str(), shape, bytes));
    }

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| Ok((*name, TensorView::new(Dtype::F32, shape.clone(), bytes)?)))
        .collect::<Result<Vec<_>>>()?;

    let metadata = Some(HashMap::from([("format".to_string(), "pt".to_string())]));
    safetensors::serialize_to_file(views.iter().map(|(name, view)| (*name, view)), &metadata, path.as_ref())?;
    Ok(())
}
