use anyhow::Result;
use sam_core::{
  config::{Backend, RuntimeConfig},
  device::{self, Device},
};
use smallvec::SmallVec;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::cli::Cli;

pub fn setup_tracing() {
  let subscriber = FmtSubscriber::builder()
    .with_max_level(Level::INFO)
    .with_target(false)
    .finish();

  tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");
}

pub fn select_device(args: &Cli) -> Device {
  if args.cpu {
    return Device::Cpu;
  }

  let device = Device::detect();

  if device.is_accelerated() {
    for name in device::gpu_names() {
      tracing::info!(gpu = %name, "CUDA device found");
    }
  } else {
    tracing::warn!("No accelerator is available, use CPU for inference...");
  }

  device
}

/// Commits the ort environment. Must run before any session is created.
pub fn setup_runtime(device: Device, runtime: &RuntimeConfig) -> Result<()> {
  let mut backends: SmallVec<[_; 2]> = SmallVec::new();

  if device.is_accelerated() {
    backends.push(Backend::CUDA);
  }

  backends.push(Backend::CPU);

  sam_core::config::setup_backends(backends, runtime)
}
