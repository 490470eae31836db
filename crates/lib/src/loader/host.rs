//! Boundary to the host runtime's module system.

use std::sync::Arc;

use thiserror::Error;

use crate::manifest::ThreadingModel;

/// Fallback invoked by the host when its normal lookup of a module name fails.
pub type ResolutionHook<M> = Arc<dyn Fn(&str) -> Option<M> + Send + Sync>;

#[derive(Debug, Error)]
pub enum HostError {
  #[error("host failed to load module '{id}': {message}")]
  Load { id: String, message: String },

  #[error("failed to configure worker thread for {threading:?}: {message}")]
  Thread { threading: ThreadingModel, message: String },

  #[error("entry routine failed: {0}")]
  Entry(String),
}

/// The main module's entry routine.
pub struct EntryPoint {
  /// Whether the routine takes the process's command-line arguments.
  pub accepts_args: bool,
  /// Returns the exit code, or `None` for routines without an integral result.
  pub routine: Box<dyn FnOnce(Vec<String>) -> Result<Option<i32>, HostError> + Send>,
}

impl std::fmt::Debug for EntryPoint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntryPoint")
      .field("accepts_args", &self.accepts_args)
      .finish_non_exhaustive()
  }
}

/// Capabilities the loader needs from the host runtime.
pub trait HostRuntime: Send + Sync + 'static {
  /// Handle to a loaded module.
  type Module: Clone + Send + Sync + 'static;

  fn load_from_bytes(&self, id: &str, bytes: Vec<u8>) -> Result<Self::Module, HostError>;

  /// Attach the loader's fallback to the host's failed-lookup path.
  fn register_resolution_fallback(&self, hook: ResolutionHook<Self::Module>);

  fn entry_point(&self, module: &Self::Module) -> Option<EntryPoint>;

  /// Called on the entry worker thread before the routine runs.
  fn enter_thread(&self, threading: ThreadingModel) -> Result<(), HostError> {
    let _ = threading;
    Ok(())
  }
}
