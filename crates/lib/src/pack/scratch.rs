//! Scratch workspace for a single build.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::consts::{PACKED_EXTENSION, SCRATCH_DIR};

/// A uniquely named directory under `<config dir>/Temp`, removed on drop.
///
/// Removal is best-effort: a failure is logged, never escalated.
#[derive(Debug)]
pub struct Scratch {
  dir: Option<TempDir>,
  path: PathBuf,
  parent: PathBuf,
  owns_parent: bool,
}

impl Scratch {
  pub fn create(config_dir: &Path) -> io::Result<Self> {
    let parent = config_dir.join(SCRATCH_DIR);
    let owns_parent = !parent.is_dir();
    fs::create_dir_all(&parent)?;
    let dir = tempfile::Builder::new().prefix("packbox-").tempdir_in(&parent)?;
    debug!(path = %dir.path().display(), "created scratch workspace");

    Ok(Self {
      path: dir.path().to_path_buf(),
      dir: Some(dir),
      parent,
      owns_parent,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// A fresh `<uuid>.packed` path inside the workspace.
  pub fn packed_path(&self) -> PathBuf {
    self.path.join(format!("{}.{}", Uuid::new_v4(), PACKED_EXTENSION))
  }

  /// A fresh path for an auxiliary blob.
  pub fn blob_path(&self, extension: &str) -> PathBuf {
    self.path.join(format!("{}.{}", Uuid::new_v4(), extension))
  }
}

impl Drop for Scratch {
  fn drop(&mut self) {
    let Some(dir) = self.dir.take() else {
      return;
    };

    match dir.close() {
      Ok(()) => debug!(path = %self.path.display(), "removed scratch workspace"),
      Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove scratch workspace"),
    }
    if !self.owns_parent {
      return;
    }
    // Fails while another build still has a workspace in the parent.
    match fs::remove_dir(&self.parent) {
      Ok(()) => debug!(path = %self.parent.display(), "removed scratch parent"),
      Err(e) => debug!(path = %self.parent.display(), error = %e, "left scratch parent in place"),
    }
  }
}
