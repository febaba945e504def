use std::{collections::HashMap, fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{s, Array2, Array3};
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::{
  anchor::Anchor,
  audio::{self, Audio},
};

/// Anchor token used to pad items that carry no span instruction.
pub const NULL_ANCHOR: &str = "<null>";

fn default_sampling_rate() -> u32 {
  48000
}

fn default_channels() -> usize {
  1
}

fn default_anchor_vocab() -> HashMap<String, i64> {
  HashMap::from([
    (NULL_ANCHOR.to_owned(), 0),
    ("+".to_owned(), 1),
    ("-".to_owned(), 2),
  ])
}

/// Contents of `processor_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
  #[serde(default = "default_sampling_rate")]
  pub audio_sampling_rate: u32,
  #[serde(default = "default_channels")]
  pub audio_channels: usize,
  #[serde(default)]
  pub max_text_length: Option<usize>,
  #[serde(default)]
  pub pad_token_id: i64,
  #[serde(default = "default_anchor_vocab")]
  pub anchor_vocab: HashMap<String, i64>,
}

impl Default for ProcessorConfig {
  fn default() -> Self {
    Self {
      audio_sampling_rate: default_sampling_rate(),
      audio_channels: default_channels(),
      max_text_length: None,
      pad_token_id: 0,
      anchor_vocab: default_anchor_vocab(),
    }
  }
}

/// Model-ready inputs for a batch of media files.
#[derive(Debug, Clone)]
pub struct Batch {
  /// `(batch, channels, frames)`, zero padded to the longest item.
  pub audio: Array3<f32>,
  /// Valid frame count of each item.
  pub audio_lengths: Vec<usize>,
  pub input_ids: Array2<i64>,
  pub attention_mask: Array2<i64>,
  pub anchor_ids: Array2<i64>,
  /// `(batch, anchors, 2)` start and end in seconds.
  pub anchor_spans: Array3<f32>,
}

impl Batch {
  pub fn len(&self) -> usize {
    self.audio_lengths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.audio_lengths.is_empty()
  }
}

pub struct Processor {
  config: ProcessorConfig,
  tokenizer: Tokenizer,
}

impl Processor {
  pub fn new(config: ProcessorConfig, tokenizer: Tokenizer) -> Self {
    Self { config, tokenizer }
  }

  pub fn from_files(config_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
    let config_path = config_path.as_ref();
    let raw = fs::read_to_string(config_path)
      .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let config: ProcessorConfig =
      serde_json::from_str(&raw).context("Failed to parse processor config")?;

    let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
      .map_err(|err| anyhow!(err))
      .context("Failed to load tokenizer")?;

    Ok(Self::new(config, tokenizer))
  }

  pub fn config(&self) -> &ProcessorConfig {
    &self.config
  }

  /// Rate of both the audio fed to the model and the audio it returns.
  pub fn sample_rate(&self) -> u32 {
    self.config.audio_sampling_rate
  }

  pub fn build<P: AsRef<Path>>(
    &self,
    audios: &[P],
    descriptions: &[&str],
    anchors: Option<&[Vec<Anchor>]>,
  ) -> Result<Batch> {
    let audios = audios
      .iter()
      .map(audio::read_audio)
      .collect::<Result<Vec<_>>>()?;

    self.build_from_audio(audios, descriptions, anchors)
  }

  pub fn build_from_audio(
    &self,
    audios: Vec<Audio>,
    descriptions: &[&str],
    anchors: Option<&[Vec<Anchor>]>,
  ) -> Result<Batch> {
    if audios.len() != descriptions.len() {
      bail!(
        "Got {} audio inputs but {} descriptions",
        audios.len(),
        descriptions.len()
      );
    }

    if audios.is_empty() {
      bail!("Nothing to process");
    }

    let (audio, audio_lengths) = self.encode_audio(audios)?;
    let (input_ids, attention_mask) = self.encode_text(descriptions)?;
    let (anchor_ids, anchor_spans) = self.encode_anchors(audio_lengths.len(), anchors)?;

    Ok(Batch {
      audio,
      audio_lengths,
      input_ids,
      attention_mask,
      anchor_ids,
      anchor_spans,
    })
  }

  fn encode_audio(&self, audios: Vec<Audio>) -> Result<(Array3<f32>, Vec<usize>)> {
    let channels = self.config.audio_channels;

    let planes = audios
      .into_iter()
      .map(|a| {
        let a = audio::resample(a, self.sample_rate())?;
        audio::remix(a.samples, channels)
      })
      .collect::<Result<Vec<_>>>()?;

    let lengths: Vec<usize> = planes.iter().map(|p| p.ncols()).collect();
    let longest = lengths.iter().copied().max().unwrap_or(0);

    let mut batch = Array3::zeros((planes.len(), channels, longest));
    for (i, plane) in planes.iter().enumerate() {
      batch
        .slice_mut(s![i, .., ..plane.ncols()])
        .assign(plane);
    }

    Ok((batch, lengths))
  }

  fn encode_text(&self, descriptions: &[&str]) -> Result<(Array2<i64>, Array2<i64>)> {
    let mut encoded = Vec::with_capacity(descriptions.len());

    for &desc in descriptions {
      let encoding = self
        .tokenizer
        .encode(desc, true)
        .map_err(|err| anyhow!(err))
        .with_context(|| format!("Failed to tokenize {desc:?}"))?;

      let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&v| v.into()).collect();
      let mut mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&v| v.into())
        .collect();

      if let Some(max) = self.config.max_text_length {
        ids.truncate(max);
        mask.truncate(max);
      }

      encoded.push((ids, mask));
    }

    let longest = encoded.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0);

    let mut input_ids = Array2::from_elem((encoded.len(), longest), self.config.pad_token_id);
    let mut attention_mask = Array2::zeros((encoded.len(), longest));

    for (i, (ids, mask)) in encoded.iter().enumerate() {
      for (j, (&id, &m)) in ids.iter().zip(mask).enumerate() {
        input_ids[[i, j]] = id;
        attention_mask[[i, j]] = m;
      }
    }

    Ok((input_ids, attention_mask))
  }

  fn anchor_id(&self, token: &str) -> Result<i64> {
    self
      .config
      .anchor_vocab
      .get(token)
      .copied()
      .ok_or_else(|| anyhow!("Anchor token {token:?} is not in the processor vocabulary"))
  }

  fn encode_anchors(
    &self,
    batch_size: usize,
    anchors: Option<&[Vec<Anchor>]>,
  ) -> Result<(Array2<i64>, Array3<f32>)> {
    let null_id = self.anchor_id(NULL_ANCHOR)?;

    let Some(anchors) = anchors else {
      return Ok((
        Array2::from_elem((batch_size, 1), null_id),
        Array3::zeros((batch_size, 1, 2)),
      ));
    };

    if anchors.len() != batch_size {
      bail!(
        "Got {} anchor groups for a batch of {batch_size}",
        anchors.len()
      );
    }

    let width = anchors.iter().map(Vec::len).max().unwrap_or(0).max(1);

    let mut ids = Array2::from_elem((batch_size, width), null_id);
    let mut spans = Array3::zeros((batch_size, width, 2));

    for (i, group) in anchors.iter().enumerate() {
      for (j, anchor) in group.iter().enumerate() {
        ids[[i, j]] = self.anchor_id(anchor.token.as_str())?;
        spans[[i, j, 0]] = anchor.start as f32;
        spans[[i, j, 1]] = anchor.end as f32;
      }
    }

    Ok((ids, spans))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::anchor::SpanPrompt;

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
      "vocab": { "[UNK]": 0, "A": 1, "man": 2, "speaking": 3, "dog": 4 },
      "unk_token": "[UNK]"
    }
  }"#;

  fn processor(config: &str) -> (tempfile::TempDir, Processor) {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("processor_config.json");
    let tokenizer_path = dir.path().join("tokenizer.json");
    fs::write(&config_path, config).unwrap();
    fs::write(&tokenizer_path, TOKENIZER).unwrap();

    let processor = Processor::from_files(&config_path, &tokenizer_path).unwrap();
    (dir, processor)
  }

  fn clip(channels: usize, frames: usize, sample_rate: u32) -> Audio {
    Audio {
      samples: Array2::from_elem((channels, frames), 0.5),
      sample_rate,
    }
  }

  #[test]
  fn config_defaults_fill_missing_fields() {
    let (_dir, processor) = processor("{}");

    assert_eq!(processor.sample_rate(), 48000);
    assert_eq!(processor.config().audio_channels, 1);
    assert_eq!(processor.config().anchor_vocab[NULL_ANCHOR], 0);
  }

  #[test]
  fn text_only_request_uses_null_anchor() {
    let (_dir, processor) = processor(r#"{ "audio_sampling_rate": 16000 }"#);

    let batch = processor
      .build_from_audio(vec![clip(2, 1600, 16000)], &["A man speaking"], None)
      .unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.audio.dim(), (1, 1, 1600));
    assert_eq!(batch.audio_lengths, vec![1600]);
    assert_eq!(batch.input_ids.row(0).to_vec(), vec![1, 2, 3]);
    assert_eq!(batch.attention_mask.row(0).to_vec(), vec![1, 1, 1]);
    assert_eq!(batch.anchor_ids.dim(), (1, 1));
    assert_eq!(batch.anchor_ids[[0, 0]], 0);
    assert_eq!(batch.anchor_spans[[0, 0, 1]], 0.0);
  }

  #[test]
  fn span_anchors_map_to_vocab_ids() {
    let (_dir, processor) = processor(r#"{ "audio_sampling_rate": 16000 }"#);

    for (exclude, id) in [(false, 1), (true, 2)] {
      let anchors = SpanPrompt::new(Some(1.0), Some(3.0), exclude).anchors();

      let batch = processor
        .build_from_audio(
          vec![clip(1, 16000 * 4, 16000)],
          &["A man speaking"],
          anchors.as_deref(),
        )
        .unwrap();

      assert_eq!(batch.anchor_ids[[0, 0]], id);
      assert_abs_diff_eq!(batch.anchor_spans[[0, 0, 0]], 1.0);
      assert_abs_diff_eq!(batch.anchor_spans[[0, 0, 1]], 3.0);
    }
  }

  #[test]
  fn items_are_padded_to_the_longest() {
    let (_dir, processor) = processor(r#"{ "audio_sampling_rate": 16000, "pad_token_id": 9 }"#);

    let batch = processor
      .build_from_audio(
        vec![clip(1, 100, 16000), clip(1, 300, 16000)],
        &["dog", "A man speaking"],
        None,
      )
      .unwrap();

    assert_eq!(batch.audio.dim(), (2, 1, 300));
    assert_eq!(batch.audio_lengths, vec![100, 300]);
    assert_eq!(batch.audio[[0, 0, 150]], 0.0);
    assert_eq!(batch.input_ids.row(0).to_vec(), vec![4, 9, 9]);
    assert_eq!(batch.attention_mask.row(0).to_vec(), vec![1, 0, 0]);
  }

  #[test]
  fn description_count_must_match() {
    let (_dir, processor) = processor("{}");

    let err = processor.build_from_audio(vec![clip(1, 10, 48000)], &[], None);
    assert!(err.is_err());
  }

  #[test]
  fn anchor_groups_must_match_batch() {
    let (_dir, processor) = processor("{}");
    let anchors = SpanPrompt::new(Some(1.0), Some(3.0), false).anchors().unwrap();

    let err = processor.build_from_audio(
      vec![clip(1, 10, 48000), clip(1, 10, 48000)],
      &["dog", "dog"],
      Some(anchors.as_slice()),
    );
    assert!(err.is_err());
  }

  #[test]
  fn text_is_truncated() {
    let (_dir, processor) = processor(r#"{ "max_text_length": 2 }"#);

    let batch = processor
      .build_from_audio(vec![clip(1, 10, 48000)], &["A man speaking"], None)
      .unwrap();

    assert_eq!(batch.input_ids.row(0).to_vec(), vec![1, 2]);
  }
}
