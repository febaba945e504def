use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use sam_core::{
  anchor::SpanPrompt,
  config::{ArenaStrategy, RuntimeConfig},
  preset::DEFAULT_MODEL,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Arena {
  /// Grow by exactly what the session asks for
  Exact,
  /// Round every growth up to the next power of two
  PowerOfTwo,
}

impl From<Arena> for ArenaStrategy {
  fn from(value: Arena) -> Self {
    match value {
      Arena::Exact => ArenaStrategy::SameAsRequested,
      Arena::PowerOfTwo => ArenaStrategy::NextPowerOfTwo,
    }
  }
}

#[derive(Parser)]
#[command(version)]
#[command(about = "Separate a described sound from a media file", long_about = None)]
pub struct Cli {
  #[arg(short, long, help = "Start of the prompted span (seconds)")]
  #[arg(value_name = "SECONDS", allow_negative_numbers = true)]
  pub start: Option<f64>,

  #[arg(short, long, help = "End of the prompted span (seconds)")]
  #[arg(value_name = "SECONDS", allow_negative_numbers = true)]
  pub end: Option<f64>,

  #[arg(short = 'x', long, help = "Exclude the span instead of extracting it")]
  pub exclude: bool,

  #[arg(short, long, help = "Input media file path")]
  #[arg(value_name = "INPUT", default_value = "examples/assets/office.mp4")]
  pub input: PathBuf,

  #[arg(short, long, help = "Description of the sound to separate")]
  #[arg(value_name = "TEXT", default_value = "A man speaking")]
  pub description: String,

  #[arg(short, long, help = "Pretrained model identifier")]
  #[arg(value_name = "MODEL", default_value = DEFAULT_MODEL)]
  pub model: String,

  #[arg(short, long, help = "Where to save the separated sound")]
  #[arg(value_name = "PATH", default_value = "target.wav")]
  pub target: PathBuf,

  #[arg(short, long, help = "Where to save everything else")]
  #[arg(value_name = "PATH", default_value = "residual.wav")]
  pub residual: PathBuf,

  #[arg(long, help = "Run on CPU even if an accelerator is available")]
  pub cpu: bool,

  #[arg(long, help = "How the accelerator memory arena grows")]
  #[arg(value_name = "STRATEGY", value_enum, default_value_t = Arena::Exact)]
  pub arena: Arena,

  #[arg(short, long, help = "List known models and exit")]
  pub list_models: bool,
}

impl Cli {
  pub fn span(&self) -> SpanPrompt {
    SpanPrompt::new(self.start, self.end, self.exclude)
  }

  pub fn runtime(&self) -> RuntimeConfig {
    RuntimeConfig {
      arena_strategy: self.arena.into(),
    }
  }
}
