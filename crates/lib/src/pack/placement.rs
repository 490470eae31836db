//! Placement policy: resource names and the overlay layout.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::manifest::{ArtifactRef, BuildManifest, PlacementKind};

#[derive(Debug, Error)]
pub enum PlacementError {
  #[error("{kind} '{id}' has no packed file")]
  MissingPacked { kind: &'static str, id: String },

  #[error("failed to read packed file {path} of '{id}': {source}")]
  Unreadable {
    id: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("packed file of '{id}' is too large ({length} bytes)")]
  TooLarge { id: String, length: u64 },
}

/// Fill in resource names and overlay coordinates.
///
/// Overlays are laid out contiguously from offset 0 in
/// [`BuildManifest::all_included`] order, which is also the order their bytes
/// are appended to the executable. Returns the overlay artifacts in that order.
pub fn compute_placement(
  manifest: &mut BuildManifest,
  packed: &HashMap<ArtifactRef, PathBuf>,
) -> Result<Vec<ArtifactRef>, PlacementError> {
  let mut overlays = Vec::new();
  let mut offset: i64 = 0;

  for r in manifest.all_included() {
    let kind = manifest.config(r).placement.kind();
    if kind == PlacementKind::File {
      continue;
    }

    let id = manifest.config(r).id.clone();
    let path = packed.get(&r).ok_or_else(|| PlacementError::MissingPacked {
      kind: r.kind_name(),
      id: id.clone(),
    })?;
    let placement = &mut manifest.config_mut(r).placement;

    match kind {
      PlacementKind::Resource => {
        if placement.resource_name().is_none() {
          let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PlacementError::MissingPacked {
              kind: r.kind_name(),
              id: id.clone(),
            })?;
          debug!(id = %id, name = %name, "assigned resource name");
          placement.set_resource_name(name);
        }
      }
      PlacementKind::Overlay => {
        let length = fs::metadata(path)
          .map_err(|source| PlacementError::Unreadable {
            id: id.clone(),
            path: path.clone(),
            source,
          })?
          .len();
        let length = i64::try_from(length).map_err(|_| PlacementError::TooLarge { id: id.clone(), length })?;

        placement.set_overlay(offset, length);
        debug!(id = %id, offset, length, "placed overlay");
        offset += length;
        overlays.push(r);
      }
      PlacementKind::File => {}
    }
  }

  Ok(overlays)
}
