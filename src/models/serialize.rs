//! Weight checkpointing.
//!
//! A checkpoint holds the model configuration plus parameters as flat
//! `f32` arrays in model parameter order, alongside their shapes for
//! validation on load. The format is plain JSON, readable with any
//! serde consumer.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::autograd::Tensor;
use crate::error::{LatenteError, Result};
use super::config::VaeConfig;

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    config: VaeConfig,
    shapes: Vec<Vec<usize>>,
    params: Vec<Vec<f32>>,
}

/// Architecture-defining fields must agree for the weights to fit.
/// Training-only settings (seed, learning rate, batch size, β,
/// temperature) are free to differ between save and load.
fn same_architecture(a: &VaeConfig, b: &VaeConfig) -> bool {
    a.conv_encoder == b.conv_encoder
        && a.conv_decoder == b.conv_decoder
        && a.hidden_encoder == b.hidden_encoder
        && a.hidden_decoder == b.hidden_decoder
        && a.num_classes == b.num_classes
}

/// Write the config and parameters to `path` in model order.
pub(crate) fn save_params(path: &Path, config: &VaeConfig, params: &[&Tensor]) -> Result<()> {
    let checkpoint = Checkpoint {
        config: config.clone(),
        shapes: params.iter().map(|p| p.shape().to_vec()).collect(),
        params: params.iter().map(|p| p.data().to_vec()).collect(),
    };
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), &checkpoint)?;
    Ok(())
}

/// Read a checkpoint from `path` and copy it into `params`, which must
/// match the checkpoint in count and per-parameter shape, under a
/// config with the same architecture. Tensor ids are preserved so
/// existing optimizer state stays valid.
pub(crate) fn load_params(path: &Path, config: &VaeConfig, params: Vec<&mut Tensor>) -> Result<()> {
    let file = File::open(path)?;
    let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;

    if !same_architecture(&checkpoint.config, config) {
        return Err(LatenteError::Serialization(format!(
            "checkpoint architecture {:?} does not match model {:?}",
            checkpoint.config, config
        )));
    }

    if checkpoint.params.len() != params.len() {
        return Err(LatenteError::Serialization(format!(
            "checkpoint holds {} parameters, model has {}",
            checkpoint.params.len(),
            params.len()
        )));
    }

    for ((param, shape), data) in params
        .into_iter()
        .zip(&checkpoint.shapes)
        .zip(&checkpoint.params)
    {
        if param.shape() != shape.as_slice() {
            return Err(LatenteError::Serialization(format!(
                "parameter shape mismatch: checkpoint {:?}, model {:?}",
                shape,
                param.shape()
            )));
        }
        param.data_mut().copy_from_slice(data);
    }
    Ok(())
}
