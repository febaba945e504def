mod cli;
mod setup;
mod util;

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sam_core::{preset::MODEL_PRESETS, processor::Processor, repo, SamAudio, Separator};

use cli::Cli;
use setup::{select_device, setup_runtime, setup_tracing};
use util::{save_separation, OutputPaths};

fn main() -> ExitCode {
  let args = Cli::parse();

  if args.list_models {
    println!("All known models:");
    for p in MODEL_PRESETS.iter() {
      let location = if p.exists() { "local" } else { "hub" };
      println!("{} ({}, {location})", p.id, p.note);
    }
    return ExitCode::SUCCESS;
  }

  setup_tracing();

  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      tracing::error!("{err:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Cli) -> Result<()> {
  if !args.input.is_file() {
    bail!("Input path {} is not a regular file", args.input.display());
  }

  let device = select_device(args);
  tracing::info!(%device, "Device selected");

  setup_runtime(device, &args.runtime()).context("Init ort execution providers failed")?;

  let files = repo::resolve(&args.model)?;
  let mut model = SamAudio::from_files(&args.model, &files)?;
  let processor = Processor::from_files(&files.processor_config, &files.tokenizer)?;
  tracing::info!(model = model.name(), "Model loaded");

  separate(&processor, &mut model, args)?;

  tracing::info!("Done");
  Ok(())
}

fn separate(processor: &Processor, separator: &mut impl Separator, args: &Cli) -> Result<()> {
  tracing::info!(input = ?args.input, description = %args.description, "Processing...");

  let anchors = args.span().anchors();

  let batch = processor.build(
    &[&args.input],
    &[args.description.as_str()],
    anchors.as_deref(),
  )?;

  let separation = separator.separate(&batch)?;

  let outputs = OutputPaths {
    target: args.target.clone(),
    residual: args.residual.clone(),
  };

  save_separation(&separation, processor.sample_rate(), &outputs)
}

#[cfg(test)]
mod tests {
  use std::{fs, path::Path};

  use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
  use sam_core::{processor::Batch, Separation};

  use super::*;

  const TOKENIZER: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": { "type": "Whitespace" },
    "post_processor": null,
    "decoder": null,
    "model": {
      "type": "WordLevel",
      "vocab": { "[UNK]": 0, "A": 1, "man": 2, "speaking": 3 },
      "unk_token": "[UNK]"
    }
  }"#;

  /// Splits the mixture in half and remembers the anchors it was given.
  #[derive(Default)]
  struct HalfSplitter {
    anchor_ids: Vec<i64>,
  }

  impl Separator for HalfSplitter {
    fn separate(&mut self, batch: &Batch) -> Result<Separation> {
      self.anchor_ids = batch.anchor_ids.iter().copied().collect();

      let target = batch.audio.mapv(|x| x * 0.5);
      let residual = &batch.audio - &target;
      Ok(Separation::new(target, residual, batch.audio_lengths.clone()))
    }
  }

  fn fixture(dir: &Path) -> Processor {
    let config = dir.join("processor_config.json");
    let tokenizer = dir.join("tokenizer.json");
    fs::write(&config, r#"{ "audio_sampling_rate": 16000 }"#).unwrap();
    fs::write(&tokenizer, TOKENIZER).unwrap();

    let spec = WavSpec {
      channels: 1,
      sample_rate: 16000,
      bits_per_sample: 16,
      sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(dir.join("office.wav"), spec).unwrap();
    for i in 0..8000 {
      writer
        .write_sample(((i as f32 * 0.03).sin() * 6000.0) as i16)
        .unwrap();
    }
    writer.finalize().unwrap();

    Processor::from_files(config, tokenizer).unwrap()
  }

  fn args(dir: &Path, extra: &[&str]) -> Cli {
    let input = dir.join("office.wav");
    let target = dir.join("target.wav");
    let residual = dir.join("residual.wav");

    let mut argv = vec![
      "sam".to_owned(),
      "--input".to_owned(),
      input.display().to_string(),
      "--target".to_owned(),
      target.display().to_string(),
      "--residual".to_owned(),
      residual.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));

    Cli::try_parse_from(argv).unwrap()
  }

  #[test]
  fn text_only_writes_both_stems() {
    let dir = tempfile::tempdir().unwrap();
    let processor = fixture(dir.path());
    let args = args(dir.path(), &[]);
    let mut separator = HalfSplitter::default();

    separate(&processor, &mut separator, &args).unwrap();

    assert_eq!(separator.anchor_ids, vec![0]);

    for path in [&args.target, &args.residual] {
      let reader = WavReader::open(path).unwrap();
      assert_eq!(reader.spec().sample_rate, processor.sample_rate());
      assert_eq!(reader.duration(), 8000);
    }
  }

  #[test]
  fn span_prompt_reaches_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let processor = fixture(dir.path());
    let mut separator = HalfSplitter::default();

    let extract = args(dir.path(), &["--start", "0.1", "--end", "0.3"]);
    separate(&processor, &mut separator, &extract).unwrap();
    assert_eq!(separator.anchor_ids, vec![1]);

    let exclude = args(dir.path(), &["--start", "0.1", "--end", "0.3", "--exclude"]);
    separate(&processor, &mut separator, &exclude).unwrap();
    assert_eq!(separator.anchor_ids, vec![2]);
  }

  #[test]
  fn lone_bound_behaves_like_text_only() {
    let dir = tempfile::tempdir().unwrap();
    let processor = fixture(dir.path());
    let mut separator = HalfSplitter::default();

    separate(&processor, &mut separator, &args(dir.path(), &["--start", "1.0"])).unwrap();
    assert_eq!(separator.anchor_ids, vec![0]);
  }

  #[test]
  fn missing_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let processor = fixture(dir.path());
    let mut args = args(dir.path(), &[]);
    args.input = dir.path().join("missing.mp4");

    let result = separate(&processor, &mut HalfSplitter::default(), &args);
    assert!(result.is_err());
    assert!(!args.target.exists());
  }
}
