use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use tch::{nn, Device, Kind, Tensor};

use crate::error::{NwpError, Result};

fn kind_of(dtype: Dtype) -> Result<Kind> {
    match dtype {
        Dtype::F32 => Ok(Kind::Float),
        Dtype::F16 => Ok(Kind::Half),
        Dtype::BF16 => Ok(Kind::BFloat16),
        other => Err(NwpError::UnsupportedDtype(format!("{other:?}"))),
    }
}

/// Copies every checkpoint tensor into the variable of the same name.
/// All shapes are checked before anything is written, so a checkpoint from a
/// different model config leaves the store untouched. Returns the names copied.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let checkpoint = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let mut matched = Vec::new();
    for (name, view) in checkpoint.tensors() {
        let Some(var) = variables.get(&name) else {
            log::warn!("Tensor {} found in checkpoint but not in model", name);
            continue;
        };
        let found: Vec<i64> = view.shape().iter().map(|&d| d as i64).collect();
        let expected = var.size();
        if found != expected {
            return Err(NwpError::ShapeMismatch { name, expected, found });
        }
        let kind = kind_of(view.dtype())?;
        matched.push((name, found, kind, view));
    }

    let device = vs.device();
    let mut loaded = Vec::with_capacity(matched.len());
    for (name, shape, kind, view) in matched {
        let source = Tensor::from_data_size(view.data(), &shape, kind).to_device(device);
        if let Some(var) = variables.get_mut(&name) {
            tch::no_grad(|| var.f_copy_(&source))?;
            loaded.push(name);
        }
    }
    Ok(loaded)
}

/// Writes all variables as little-endian f32 with optional string metadata.
pub fn save_safetensors<P: AsRef<Path>>(
    vs: &nn::VarStore,
    path: P,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let mut buffers: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
    for (name, var) in vs.variables() {
        let shape: Vec<usize> = var.size().iter().map(|&x| x as usize).collect();
        let flat = var
            .detach()
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous()
            .flatten(0, -1);
        let values = Vec::<f32>::try_from(&flat)?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name, shape, bytes));
    }
    buffers.sort_by(|a, b| a.0.cmp(&b.0));

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        views.push((name.as_str(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }

    safetensors::serialize_to_file(views, &metadata, path.as_ref())?;
    Ok(())
}
