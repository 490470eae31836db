//! Packaging pipeline.
//!
//! [`Packager::build`] runs the build as a linear sequence of stages; any
//! failure aborts the build and the scratch workspace is removed on every
//! exit path:
//!
//! 1. load and validate the manifest
//! 2. allocate the scratch workspace
//! 3. compress every included artifact
//! 4. apply the placement policy
//! 5. derive module aliases, grab main-module resources
//! 6. serialize the mutated manifest
//! 7. link the loader with its inline blobs
//! 8. copy packed files to their copy-through destinations
//! 9. append overlays and the stamp
//! 10. publish the executable to the output path
//! 11. clean up

mod introspect;
mod link;
mod placement;
mod scratch;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use introspect::*;
pub use link::*;
pub use placement::*;
pub use scratch::Scratch;

use crate::codec::{Codec, CodecError, DeflateCodec};
use crate::consts::MANIFEST_RESOURCE_NAME;
use crate::image::{self, ImageError};
use crate::manifest::{ArtifactRef, BuildManifest, CompressionLevel, ManifestError, PlacementKind};
use crate::placeholder::{BuildVariables, VarError, substitute};
use crate::util::hash::{ContentHash, HashError, hash_file};

#[derive(Debug, Error)]
pub enum PackError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Vars(#[from] VarError),

  #[error("failed to create scratch workspace under {path}: {source}")]
  Scratch {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read source of {kind} '{id}' at {path}: {source}")]
  ReadSource {
    kind: &'static str,
    id: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to compress '{id}': {source}")]
  Compress {
    id: String,
    #[source]
    source: CodecError,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Placement(#[from] PlacementError),

  #[error("failed to inspect module '{id}': {source}")]
  Introspect {
    id: String,
    #[source]
    source: IntrospectError,
  },

  #[error("resource name '{0}' is used more than once")]
  ResourceConflict(String),

  #[error(transparent)]
  Link(#[from] LinkError),

  #[error("link step failed")]
  LinkFailed { log: Vec<String> },

  #[error("failed to copy packed '{id}' to {path}: {source}")]
  CopyThrough {
    id: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to append overlays: {0}")]
  Overlay(#[from] ImageError),

  #[error("failed to publish {path}: {source}")]
  Publish {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Hash(#[from] HashError),
}

/// One compressed artifact in the scratch workspace.
#[derive(Debug, Clone)]
struct PackedArtifact {
  artifact: ArtifactRef,
  packed: PathBuf,
  original_len: u64,
  packed_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArtifactReport {
  pub id: String,
  pub kind: &'static str,
  pub placement: PlacementKind,
  pub original_len: u64,
  pub packed_len: u64,
}

/// Summary of a successful build.
#[derive(Debug, Clone)]
pub struct PackReport {
  pub output: PathBuf,
  /// Length of the link output, as recorded in the stamp.
  pub original_len: u64,
  pub overlay_len: u64,
  pub artifacts: Vec<PackedArtifactReport>,
  pub link_log: Vec<String>,
  /// Options the linker accepted but could not apply.
  pub link_warnings: Vec<String>,
  pub sha256: ContentHash,
}

/// Runs the packaging pipeline with injected collaborators.
pub struct Packager {
  codec: Arc<dyn Codec>,
  introspector: Box<dyn ModuleIntrospector>,
  linker: Box<dyn Linker>,
}

impl Packager {
  pub fn new(linker: impl Linker + 'static) -> Self {
    Self {
      codec: Arc::new(DeflateCodec),
      introspector: Box::new(SidecarIntrospector),
      linker: Box::new(linker),
    }
  }

  pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
    self.codec = codec;
    self
  }

  pub fn with_introspector(mut self, introspector: impl ModuleIntrospector + 'static) -> Self {
    self.introspector = Box::new(introspector);
    self
  }

  /// Build the executable described by a manifest file.
  pub fn build(&self, manifest_path: &Path) -> Result<PackReport, PackError> {
    info!(manifest = %manifest_path.display(), "loading manifest");
    let manifest = BuildManifest::load(manifest_path)?;
    let vars = BuildVariables::for_manifest(manifest_path)?;
    self.build_manifest(manifest, vars)
  }

  /// Build from an already validated manifest.
  pub fn build_manifest(&self, mut manifest: BuildManifest, vars: BuildVariables) -> Result<PackReport, PackError> {
    let output_path = substitute(&manifest.output.path, &vars);
    let vars = match output_path.parent() {
      Some(dir) => vars.with_exe_dir(dir.to_path_buf()),
      None => vars,
    };

    let scratch = Scratch::create(vars.config_dir()).map_err(|source| PackError::Scratch {
      path: vars.config_dir().to_path_buf(),
      source,
    })?;

    let packed = self.pack_all(&manifest, &vars, &scratch)?;
    let packed_map: HashMap<ArtifactRef, PathBuf> = packed.iter().map(|p| (p.artifact, p.packed.clone())).collect();

    let overlays = compute_placement(&mut manifest, &packed_map)?;
    info!(overlays = overlays.len(), "computed placement");

    let grabbed = self.reflect_modules(&mut manifest, &vars, &scratch)?;

    let manifest_path = scratch.path().join(MANIFEST_RESOURCE_NAME);
    let json = manifest.to_json()?;
    fs::write(&manifest_path, json).map_err(|source| PackError::Write {
      path: manifest_path.clone(),
      source,
    })?;

    let blobs = assemble_blobs(&manifest, &packed_map, manifest_path, grabbed)?;
    let file_name = output_path
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_else(|| manifest.output_name().into());
    let linked = scratch.path().join(file_name);
    let request = LinkRequest {
      output: linked.clone(),
      blobs,
      app_type: manifest.output.app_type,
      arch: manifest.output.arch,
      icon: manifest.output.icon.as_deref().map(|icon| substitute(icon, &vars)),
      build_options: manifest.output.build_options.clone(),
      min_runtime: manifest.output.min_runtime,
    };

    info!(blobs = request.blobs.len(), "linking");
    let outcome = self.linker.link(&request)?;
    for line in &outcome.log {
      if outcome.success {
        debug!(target: "packbox::link", "{line}");
      } else {
        warn!(target: "packbox::link", "{line}");
      }
    }
    if !outcome.success {
      return Err(PackError::LinkFailed { log: outcome.log });
    }
    for warning in &outcome.warnings {
      warn!(target: "packbox::link", "{warning}");
    }

    self.copy_through(&manifest, &vars, &packed_map)?;

    let overlay_files: Vec<PathBuf> = overlays.iter().map(|r| packed_map[r].clone()).collect();
    let original_len = image::append_overlays(&linked, &overlay_files)?;

    if let Some(parent) = output_path.parent() {
      fs::create_dir_all(parent).map_err(|source| PackError::Publish {
        path: output_path.clone(),
        source,
      })?;
    }
    fs::copy(&linked, &output_path).map_err(|source| PackError::Publish {
      path: output_path.clone(),
      source,
    })?;
    info!(output = %output_path.display(), "published executable");

    let sha256 = hash_file(&output_path)?;
    let overlay_len = overlays.iter().map(|r| manifest.config(*r).placement.overlay().1 as u64).sum();
    let artifacts = packed
      .iter()
      .map(|p| {
        let config = manifest.config(p.artifact);
        PackedArtifactReport {
          id: config.id.clone(),
          kind: p.artifact.kind_name(),
          placement: config.placement.kind(),
          original_len: p.original_len,
          packed_len: p.packed_len,
        }
      })
      .collect();

    Ok(PackReport {
      output: output_path,
      original_len,
      overlay_len,
      artifacts,
      link_log: outcome.log,
      link_warnings: outcome.warnings,
      sha256,
    })
  }

  /// Compress every included artifact into the workspace.
  ///
  /// Artifacts are independent, so compression runs in parallel; results come
  /// back in `all_included` order.
  fn pack_all(
    &self,
    manifest: &BuildManifest,
    vars: &BuildVariables,
    scratch: &Scratch,
  ) -> Result<Vec<PackedArtifact>, PackError> {
    let jobs = manifest
      .all_included()
      .into_iter()
      .map(|r| -> Result<PackJob, PackError> {
        let config = manifest.config(r);
        let level = manifest.profile_for(r)?.level;
        Ok(PackJob {
          artifact: r,
          id: config.id.clone(),
          source: substitute(&config.source_path, vars),
          packed: scratch.packed_path(),
          level,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let codec = &*self.codec;
    jobs.par_iter().map(|job| job.run(codec)).collect()
  }

  /// Derive aliases for every included module and grab main-module resources.
  fn reflect_modules(
    &self,
    manifest: &mut BuildManifest,
    vars: &BuildVariables,
    scratch: &Scratch,
  ) -> Result<Vec<InlineBlob>, PackError> {
    let main = manifest.output.main_module;
    let output_stem = manifest.output_name();
    let mut grabbed: Vec<InlineBlob> = Vec::new();

    for r in manifest.all_included() {
      let ArtifactRef::Module(idx) = r else {
        continue;
      };

      let module = &mut manifest.modules[idx];
      let source = substitute(&module.config.source_path, vars);
      let metadata = self
        .introspector
        .inspect(&source)
        .map_err(|source| PackError::Introspect {
          id: module.config.id.clone(),
          source,
        })?;

      let added = derive_aliases(module, &metadata.qualified_name);
      debug!(id = %module.config.id, name = %metadata.qualified_name, added, "derived aliases");

      if idx != main || !manifest.output.grab_resources {
        continue;
      }
      for resource in metadata.resources {
        let name = rename_resource(&resource.name, &metadata.simple_name, &output_stem);
        if grabbed.iter().any(|b| b.name == name) {
          return Err(PackError::ResourceConflict(name));
        }

        let path = scratch.blob_path("resource");
        fs::write(&path, &resource.bytes).map_err(|source| PackError::Write {
          path: path.clone(),
          source,
        })?;
        debug!(name = %name, bytes = resource.bytes.len(), "grabbed resource");
        grabbed.push(InlineBlob { name, path });
      }
    }

    Ok(grabbed)
  }

  fn copy_through(
    &self,
    manifest: &BuildManifest,
    vars: &BuildVariables,
    packed: &HashMap<ArtifactRef, PathBuf>,
  ) -> Result<(), PackError> {
    for r in manifest.all_included() {
      let config = manifest.config(r);
      let Some(dest) = config.copy_compressed_to.as_deref() else {
        continue;
      };

      let dest = substitute(dest, vars);
      let copy_err = |source| PackError::CopyThrough {
        id: config.id.clone(),
        path: dest.clone(),
        source,
      };
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(copy_err)?;
      }
      fs::copy(&packed[&r], &dest).map_err(copy_err)?;
      info!(id = %config.id, dest = %dest.display(), "copied packed artifact");
    }
    Ok(())
  }
}

struct PackJob {
  artifact: ArtifactRef,
  id: String,
  source: PathBuf,
  packed: PathBuf,
  level: CompressionLevel,
}

impl PackJob {
  fn run(&self, codec: &dyn Codec) -> Result<PackedArtifact, PackError> {
    let data = fs::read(&self.source).map_err(|source| PackError::ReadSource {
      kind: self.artifact.kind_name(),
      id: self.id.clone(),
      path: self.source.clone(),
      source,
    })?;
    let compressed = codec.compress(self.level, &data).map_err(|source| PackError::Compress {
      id: self.id.clone(),
      source,
    })?;
    fs::write(&self.packed, &compressed).map_err(|source| PackError::Write {
      path: self.packed.clone(),
      source,
    })?;

    debug!(
      id = %self.id,
      level = %self.level,
      original = data.len(),
      packed = compressed.len(),
      "packed artifact"
    );
    Ok(PackedArtifact {
      artifact: self.artifact,
      packed: self.packed.clone(),
      original_len: data.len() as u64,
      packed_len: compressed.len() as u64,
    })
  }
}

/// Inline blobs: resource-placed artifacts, the manifest, grabbed resources.
fn assemble_blobs(
  manifest: &BuildManifest,
  packed: &HashMap<ArtifactRef, PathBuf>,
  manifest_path: PathBuf,
  grabbed: Vec<InlineBlob>,
) -> Result<Vec<InlineBlob>, PackError> {
  let mut blobs: Vec<InlineBlob> = Vec::new();

  for r in manifest.all_included() {
    let placement = &manifest.config(r).placement;
    if placement.kind() != PlacementKind::Resource {
      continue;
    }
    if let Some(name) = placement.resource_name() {
      blobs.push(InlineBlob {
        name: name.to_string(),
        path: packed[&r].clone(),
      });
    }
  }

  blobs.push(InlineBlob {
    name: MANIFEST_RESOURCE_NAME.to_string(),
    path: manifest_path,
  });
  blobs.extend(grabbed);

  for (i, blob) in blobs.iter().enumerate() {
    if blobs[..i].iter().any(|b| b.name == blob.name) {
      return Err(PackError::ResourceConflict(blob.name.clone()));
    }
  }
  Ok(blobs)
}
