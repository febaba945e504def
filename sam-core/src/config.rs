use anyhow::{bail, Result};
use ort::ep::{ArenaExtendStrategy, ExecutionProviderDispatch, CPU, CUDA};

pub enum Backend {
  CUDA,
  CPU,
}

impl Backend {
  fn to_ep(&self, runtime: &RuntimeConfig) -> ExecutionProviderDispatch {
    match self {
      Self::CUDA => CUDA::default()
        .with_arena_extend_strategy(runtime.arena_strategy.into())
        .build(),
      Self::CPU => CPU::default().build(),
    }
  }
}

/// How the accelerator memory arena grows when a session needs more memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArenaStrategy {
  /// Grow by exactly the requested amount, keeping fragmentation low on
  /// memory-constrained devices.
  #[default]
  SameAsRequested,
  NextPowerOfTwo,
}

impl From<ArenaStrategy> for ArenaExtendStrategy {
  fn from(value: ArenaStrategy) -> Self {
    match value {
      ArenaStrategy::SameAsRequested => ArenaExtendStrategy::SameAsRequested,
      ArenaStrategy::NextPowerOfTwo => ArenaExtendStrategy::NextPowerOfTwo,
    }
  }
}

/// Process-wide runtime settings, committed once before any model is loaded.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
  pub arena_strategy: ArenaStrategy,
}

pub fn setup_backends(backends: impl AsRef<[Backend]>, runtime: &RuntimeConfig) -> Result<()> {
  tracing::debug!(arena = ?runtime.arena_strategy, "Committing ort environment");

  let backends: Vec<_> = backends
    .as_ref()
    .iter()
    .map(|b| b.to_ep(runtime))
    .collect();
  let committed = ort::init().with_execution_providers(backends).commit();
  ensure_committed(committed)
}

/// `commit` reports `false` when an environment already exists, in which case
/// neither the providers nor the arena strategy take effect.
fn ensure_committed(committed: bool) -> Result<()> {
  if !committed {
    bail!("ort environment was already initialized, runtime config not applied");
  }
  Ok(())
}
