use super::repo;

pub struct ModelPreset {
  pub id: &'static str,
  pub note: &'static str,
}

impl ModelPreset {
  const fn new(id: &'static str, note: &'static str) -> Self {
    Self { id, note }
  }

  /// Whether the model files are already on disk and can be used offline.
  pub fn exists(&self) -> bool {
    repo::local_files(self.id).is_some()
  }
}

/// Lower memory footprint than `large` while keeping most of its quality.
pub const DEFAULT_MODEL: &str = "facebook/sam-audio-base";

pub const MODEL_PRESETS: [ModelPreset; 3] = [
  ModelPreset::new("facebook/sam-audio-small", "smallest, fastest"),
  ModelPreset::new(DEFAULT_MODEL, "default"),
  ModelPreset::new("facebook/sam-audio-large", "best quality, most memory"),
];
