pub mod anchor;
pub mod audio;
pub mod config;
pub mod device;
mod model;
pub mod processor;

pub use model::{preset, repo, ModelFiles, SamAudio, Separation, Separator};
