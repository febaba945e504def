use std::{fmt, fs};

use ort::ep::{ExecutionProvider, CUDA};

const NVIDIA_GPUS: &str = "/proc/driver/nvidia/gpus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cuda,
  Cpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cuda => write!(f, "cuda"),
      Device::Cpu => write!(f, "cpu"),
    }
  }
}

impl Device {
  pub fn select(accelerator_available: bool) -> Self {
    if accelerator_available {
      Self::Cuda
    } else {
      Self::Cpu
    }
  }

  /// Probes ONNX Runtime for a usable CUDA provider. A failed probe counts as
  /// unavailable.
  pub fn detect() -> Self {
    let available = match CUDA::default().is_available() {
      Ok(available) => available,
      Err(err) => {
        tracing::warn!(%err, "Failed to probe CUDA execution provider");
        false
      }
    };

    Self::select(available)
  }

  pub fn is_accelerated(&self) -> bool {
    matches!(self, Self::Cuda)
  }
}

/// Names of the NVIDIA GPUs the driver reports. ONNX Runtime exposes no device
/// query, so this reads the driver's procfs entries and is empty elsewhere.
pub fn gpu_names() -> Vec<String> {
  let Ok(entries) = fs::read_dir(NVIDIA_GPUS) else {
    return Vec::new();
  };

  entries
    .filter_map(|entry| fs::read_to_string(entry.ok()?.path().join("information")).ok())
    .filter_map(|info| gpu_model(&info).map(str::to_owned))
    .collect()
}

fn gpu_model(information: &str) -> Option<&str> {
  information.lines().find_map(|line| {
    let (key, value) = line.split_once(':')?;
    (key.trim() == "Model").then(|| value.trim())
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn selection_prefers_accelerator() {
    assert_eq!(Device::select(true), Device::Cuda);
    assert_eq!(Device::select(false), Device::Cpu);
  }

  #[test]
  fn selection_is_idempotent() {
    for available in [true, false] {
      assert_eq!(Device::select(available), Device::select(available));
    }
  }

  #[test]
  fn gpu_model_is_read_from_driver_information() {
    let info = "Model: \t\t NVIDIA GeForce RTX 4090\n\
                IRQ:   \t\t 189\n\
                Bus Type: \t PCIe\n";
    assert_eq!(gpu_model(info), Some("NVIDIA GeForce RTX 4090"));
    assert_eq!(gpu_model("IRQ: 189\n"), None);
  }

  #[test]
  fn only_cuda_is_accelerated() {
    assert!(Device::Cuda.is_accelerated());
    assert!(!Device::Cpu.is_accelerated());
  }
}
