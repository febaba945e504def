use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use ndarray::ArrayView2;
use sam_core::Separation;

/// Writes `(channels, frames)` samples as 32-bit float WAV.
pub fn write_audio(path: impl AsRef<Path>, audio: ArrayView2<f32>, sample_rate: u32) -> Result<()> {
  let path = path.as_ref();
  let spec = WavSpec {
    channels: audio.nrows().try_into()?,
    sample_rate,
    bits_per_sample: 32,
    sample_format: SampleFormat::Float,
  };

  let mut writer = WavWriter::create(path, spec)
    .with_context(|| format!("Failed to create {}", path.display()))?;

  for frame in audio.columns() {
    for &sample in frame {
      writer.write_sample(sample)?;
    }
  }

  writer.finalize()?;
  Ok(())
}

pub struct OutputPaths {
  pub target: PathBuf,
  pub residual: PathBuf,
}

/// Saves both stems of the first batch item at the same sample rate.
pub fn save_separation(separation: &Separation, sample_rate: u32, outputs: &OutputPaths) -> Result<()> {
  write_audio(&outputs.target, separation.target(0), sample_rate)
    .context("Failed to write the target")?;
  tracing::info!(path = ?outputs.target, "Saved separated sound");

  write_audio(&outputs.residual, separation.residual(0), sample_rate)
    .context("Failed to write the residual")?;
  tracing::info!(path = ?outputs.residual, "Saved residual sound");

  Ok(())
}
