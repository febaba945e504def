pub mod preset;
pub mod repo;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{prelude::*, Dimension};
use ort::{
  session::{builder::GraphOptimizationLevel, Session},
  value::Tensor,
};

use crate::processor::Batch;
pub use repo::ModelFiles;

/// Separated audio for a whole batch, both arrays `(batch, channels, frames)`.
pub struct Separation {
  target: Array3<f32>,
  residual: Array3<f32>,
  lengths: Vec<usize>,
}

impl Separation {
  pub fn new(target: Array3<f32>, residual: Array3<f32>, lengths: Vec<usize>) -> Self {
    Self {
      target,
      residual,
      lengths,
    }
  }

  fn trimmed<'a>(&self, stems: &'a Array3<f32>, index: usize) -> ArrayView2<'a, f32> {
    let stem = stems.index_axis(Axis(0), index);
    let length = self
      .lengths
      .get(index)
      .copied()
      .unwrap_or(stem.ncols())
      .min(stem.ncols());
    stem.slice_move(s![.., ..length])
  }

  /// Target audio of one batch item with the padding cut off.
  pub fn target(&self, index: usize) -> ArrayView2<f32> {
    self.trimmed(&self.target, index)
  }

  /// Residual audio of one batch item with the padding cut off.
  pub fn residual(&self, index: usize) -> ArrayView2<f32> {
    self.trimmed(&self.residual, index)
  }
}

pub trait Separator {
  fn separate(&mut self, batch: &Batch) -> Result<Separation>;
}

pub struct SamAudio {
  name: String,
  model: Session,
}

fn flatten<T: Copy, D: Dimension>(array: &Array<T, D>) -> (Vec<usize>, Vec<T>) {
  (array.shape().to_vec(), array.iter().copied().collect())
}

impl SamAudio {
  /// The session runs on the execution providers committed by
  /// [`crate::config::setup_backends`].
  pub fn from_files(name: &str, files: &ModelFiles) -> Result<Self> {
    tracing::info!(name, "Building model...");

    let model = Session::builder()
      .context("Failed to get ort session builder")?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .context("Failed to optimize ort session")?
      .commit_from_file(&files.model)
      .context("Failed to load onnx model")?;

    Ok(Self {
      name: name.to_owned(),
      model,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl Separator for SamAudio {
  fn separate(&mut self, batch: &Batch) -> Result<Separation> {
    tracing::info!("Start separating...");

    let inputs = ort::inputs![
      "audio" => Tensor::from_array(flatten(&batch.audio))?,
      "input_ids" => Tensor::from_array(flatten(&batch.input_ids))?,
      "attention_mask" => Tensor::from_array(flatten(&batch.attention_mask))?,
      "anchor_ids" => Tensor::from_array(flatten(&batch.anchor_ids))?,
      "anchor_spans" => Tensor::from_array(flatten(&batch.anchor_spans))?,
    ];

    let outputs = self.model.run(inputs).context("Failed to inference")?;

    let extract = |name: &str| -> Result<Option<Array3<f32>>> {
      let Some(value) = outputs.get(name) else {
        return Ok(None);
      };

      let (shape, data) = value.try_extract_tensor::<f32>()?;
      let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
      let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?
        .into_dimensionality::<Ix3>()
        .with_context(|| format!("Model output `{name}` is not (batch, channels, frames)"))?;

      Ok(Some(array))
    };

    let target = extract("target")?.ok_or_else(|| anyhow!("Model has no `target` output"))?;
    let residual = extract("residual")?;

    assemble(target, residual, batch)
  }
}

/// Checks the raw model outputs against the batch they were computed from.
fn assemble(
  target: Array3<f32>,
  residual: Option<Array3<f32>>,
  batch: &Batch,
) -> Result<Separation> {
  if target.dim().0 != batch.len() {
    bail!(
      "Model returned {} items for a batch of {}",
      target.dim().0,
      batch.len()
    );
  }

  // exports without a residual head leave the remainder to the caller
  let residual = match residual {
    Some(residual) => residual,
    None => {
      if target.dim() != batch.audio.dim() {
        bail!("Can not derive the residual: target and mixture shapes differ");
      }
      &batch.audio - &target
    }
  };

  if residual.dim() != target.dim() {
    bail!(
      "Model residual has shape {:?} but target has {:?}",
      residual.dim(),
      target.dim()
    );
  }

  Ok(Separation::new(target, residual, batch.audio_lengths.clone()))
}
