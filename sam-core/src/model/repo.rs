use std::{
  env,
  path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;

pub const MODEL_FILE: &str = "model.onnx";
pub const MODEL_DATA_FILE: &str = "model.onnx.data";
pub const PROCESSOR_CONFIG_FILE: &str = "processor_config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local paths of everything needed to run one pretrained model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
  pub model: PathBuf,
  pub processor_config: PathBuf,
  pub tokenizer: PathBuf,
}

impl ModelFiles {
  fn in_dir(dir: &Path) -> Self {
    Self {
      model: dir.join(MODEL_FILE),
      processor_config: dir.join(PROCESSOR_CONFIG_FILE),
      tokenizer: dir.join(TOKENIZER_FILE),
    }
  }

  fn is_complete(&self) -> bool {
    self.model.is_file() && self.processor_config.is_file() && self.tokenizer.is_file()
  }
}

/// `$SAM_MODELS`, or `models/` next to the executable.
fn models_root() -> Option<PathBuf> {
  env::var_os("SAM_MODELS").map(PathBuf::from).or_else(|| {
    env::current_exe()
      .ok()?
      .parent()
      .map(|dir| dir.join("models"))
  })
}

fn local_files_in(root: &Path, id: &str) -> Option<ModelFiles> {
  let files = ModelFiles::in_dir(&root.join(id));
  files.is_complete().then_some(files)
}

pub fn local_files(id: &str) -> Option<ModelFiles> {
  local_files_in(&models_root()?, id)
}

/// Finds the model locally or downloads it from the Hugging Face Hub. There is
/// no retry; any failure is returned as is.
pub fn resolve(id: &str) -> Result<ModelFiles> {
  if let Some(files) = local_files(id) {
    tracing::info!(model = id, path = ?files.model, "Using local model");
    return Ok(files);
  }

  download(id)
}

fn download(id: &str) -> Result<ModelFiles> {
  tracing::info!(model = id, "Fetching model from Hugging Face Hub...");

  let api = Api::new().context("Failed to create Hugging Face Hub client")?;
  let repo = api.model(id.to_owned());

  let info = repo
    .info()
    .with_context(|| format!("Failed to list the files of {id}"))?;

  let fetch = |file: &str| {
    repo
      .get(file)
      .with_context(|| format!("Failed to fetch `{file}` of {id}"))
  };

  let files = ModelFiles {
    model: fetch(MODEL_FILE)?,
    processor_config: fetch(PROCESSOR_CONFIG_FILE)?,
    tokenizer: fetch(TOKENIZER_FILE)?,
  };

  // only exported models above 2GB keep their weights outside the graph
  if has_external_data(info.siblings.iter().map(|s| s.rfilename.as_str())) {
    fetch(MODEL_DATA_FILE)?;
  }

  Ok(files)
}

fn has_external_data<'a>(mut files: impl Iterator<Item = &'a str>) -> bool {
  files.any(|file| file == MODEL_DATA_FILE)
}
