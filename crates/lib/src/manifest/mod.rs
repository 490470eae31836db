//! Build manifest model.
//!
//! A [`BuildManifest`] is constructed once from a [`ManifestDocument`], which
//! applies per-section defaults and validates every reference. After that it
//! is only mutated by the packaging pipeline (placement coordinates, resource
//! names, derived aliases) before being serialized into the distributable,
//! where the loader reconstructs it read-only.

mod document;
mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use document::*;
pub use types::*;

use crate::placeholder::normalize_separators;

/// Errors raised while constructing or serializing a manifest.
///
/// All of them are configuration errors: fatal, never retried.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("{kind} id '{id}' already exists")]
  DuplicateId { kind: &'static str, id: String },

  #[error("{kind} '{id}' references unknown compression profile '{profile}'")]
  UnknownCompression {
    kind: &'static str,
    id: String,
    profile: String,
  },

  #[error("{kind} '{id}' is missing required field '{field}'")]
  MissingField {
    kind: &'static str,
    id: String,
    field: &'static str,
  },

  #[error("main module '{0}' is not a declared module")]
  UnknownMainModule(String),

  #[error("output includes unknown {kind} '{id}'")]
  UnknownInclude { kind: &'static str, id: String },

  #[error("{kind} '{id}' is included more than once")]
  DuplicateInclude { kind: &'static str, id: String },

  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// The validated, fully populated manifest object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManifest {
  pub compression: Vec<CompressionProfile>,
  pub modules: Vec<ModuleArtifact>,
  pub files: Vec<FileArtifact>,
  pub output: OutputDescriptor,
  pub module_defaults: ModuleDefaults,
  pub file_defaults: FileDefaults,
}

/// Entry fields common to modules and files, before defaults are applied.
struct EntryFields {
  id: String,
  path: String,
  compression: Option<String>,
  placement: Option<Placement>,
  copy_compressed_to: Option<String>,
}

impl BuildManifest {
  /// Read and validate a manifest file.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, ManifestError> {
    let document: ManifestDocument = serde_json::from_str(content).map_err(ManifestError::Parse)?;
    Self::from_document(document)
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
    let document: ManifestDocument = serde_json::from_slice(bytes).map_err(ManifestError::Parse)?;
    Self::from_document(document)
  }

  /// Serialize the manifest with every field explicit.
  pub fn to_json(&self) -> Result<String, ManifestError> {
    serde_json::to_string_pretty(&self.to_document()).map_err(ManifestError::Serialize)
  }

  /// Apply defaults and validate a declarative document.
  pub fn from_document(document: ManifestDocument) -> Result<Self, ManifestError> {
    let mut compression: Vec<CompressionProfile> = Vec::new();
    for profile in document.compression {
      if profile.id.is_empty() {
        return Err(ManifestError::MissingField {
          kind: "compression profile",
          id: String::new(),
          field: "id",
        });
      }
      if compression.iter().any(|p| p.id == profile.id) {
        return Err(ManifestError::DuplicateId {
          kind: "compression profile",
          id: profile.id,
        });
      }
      compression.push(profile);
    }

    let module_section = document.modules;
    let module_defaults = ModuleDefaults {
      compression: module_section.defaults.compression,
      placement: module_section.defaults.placement.unwrap_or(PlacementKind::Resource),
      lazy: module_section.defaults.lazy.unwrap_or(true),
      partial_aliases: module_section.defaults.partial_aliases.unwrap_or(true),
    };

    let mut modules: Vec<ModuleArtifact> = Vec::new();
    for entry in module_section.entries {
      if modules.iter().any(|m| m.config.id == entry.id) {
        return Err(ManifestError::DuplicateId {
          kind: "module",
          id: entry.id,
        });
      }

      let fields = EntryFields {
        id: entry.id,
        path: entry.path,
        compression: entry.compression,
        placement: entry.placement,
        copy_compressed_to: entry.copy_compressed_to,
      };
      let config = artifact_config(
        "module",
        fields,
        (module_defaults.compression.as_deref(), module_defaults.placement),
        &compression,
      )?;

      let mut module = ModuleArtifact {
        config,
        lazy: entry.lazy.unwrap_or(module_defaults.lazy),
        aliases: Vec::new(),
        generate_partial_aliases: entry.partial_aliases.unwrap_or(module_defaults.partial_aliases),
      };
      for alias in &entry.aliases {
        module.add_alias(alias);
      }
      modules.push(module);
    }

    let file_section = document.files;
    let file_defaults = FileDefaults {
      compression: file_section.defaults.compression,
      placement: file_section.defaults.placement.unwrap_or(PlacementKind::Overlay),
      overwrite: file_section.defaults.overwrite.unwrap_or_default(),
    };

    let mut files: Vec<FileArtifact> = Vec::new();
    for entry in file_section.entries {
      if files.iter().any(|f| f.config.id == entry.id) {
        return Err(ManifestError::DuplicateId { kind: "file", id: entry.id });
      }

      let extract_to = entry.extract_to.unwrap_or_else(|| default_extract_target(&entry.path, &entry.id));
      let fields = EntryFields {
        id: entry.id,
        path: entry.path,
        compression: entry.compression,
        placement: entry.placement,
        copy_compressed_to: entry.copy_compressed_to,
      };
      let config = artifact_config(
        "file",
        fields,
        (file_defaults.compression.as_deref(), file_defaults.placement),
        &compression,
      )?;

      files.push(FileArtifact {
        config,
        extract_to,
        overwrite: entry.overwrite.unwrap_or(file_defaults.overwrite),
      });
    }

    let output = output_descriptor(document.output, &modules, &files)?;

    Ok(Self {
      compression,
      modules,
      files,
      output,
      module_defaults,
      file_defaults,
    })
  }

  /// Convert back to the declarative form, writing every field explicitly.
  pub fn to_document(&self) -> ManifestDocument {
    let modules = ModuleSection {
      defaults: ModuleDefaultsDoc {
        compression: self.module_defaults.compression.clone(),
        placement: Some(self.module_defaults.placement),
        lazy: Some(self.module_defaults.lazy),
        partial_aliases: Some(self.module_defaults.partial_aliases),
      },
      entries: self
        .modules
        .iter()
        .map(|m| ModuleEntry {
          id: m.config.id.clone(),
          path: m.config.source_path.clone(),
          compression: Some(m.config.compression.clone()),
          placement: Some(m.config.placement.clone()),
          copy_compressed_to: m.config.copy_compressed_to.clone(),
          lazy: Some(m.lazy),
          partial_aliases: Some(m.generate_partial_aliases),
          aliases: m.aliases.clone(),
        })
        .collect(),
    };

    let files = FileSection {
      defaults: FileDefaultsDoc {
        compression: self.file_defaults.compression.clone(),
        placement: Some(self.file_defaults.placement),
        overwrite: Some(self.file_defaults.overwrite),
      },
      entries: self
        .files
        .iter()
        .map(|f| FileEntry {
          id: f.config.id.clone(),
          path: f.config.source_path.clone(),
          compression: Some(f.config.compression.clone()),
          placement: Some(f.config.placement.clone()),
          copy_compressed_to: f.config.copy_compressed_to.clone(),
          extract_to: Some(f.extract_to.clone()),
          overwrite: Some(f.overwrite),
        })
        .collect(),
    };

    let mut include = IncludeSection::default();
    for r in &self.output.included {
      let id = self.config(*r).id.clone();
      match r {
        ArtifactRef::Module(_) => include.modules.push(id),
        ArtifactRef::File(_) if self.output.app_config.as_ref() == Some(&id) => {}
        ArtifactRef::File(_) => include.files.push(id),
      }
    }

    let out = &self.output;
    ManifestDocument {
      compression: self.compression.clone(),
      modules,
      files,
      output: OutputSection {
        path: out.path.clone(),
        name: out.name.clone(),
        app_type: out.app_type,
        arch: out.arch,
        icon: out.icon.clone(),
        main_module: self.main_module().config.id.clone(),
        threading: out.threading,
        grab_resources: out.grab_resources,
        build_options: out.build_options.clone(),
        min_runtime: out.min_runtime,
        app_config: out.app_config.clone().map(|file| AppConfigRef {
          file,
          shadow_copy: out.shadow_copy,
        }),
        include,
      },
    }
  }

  /// All included artifacts: `output.included` followed by the main module.
  ///
  /// Overlay offsets and the append order of overlay bytes both follow this
  /// order.
  pub fn all_included(&self) -> Vec<ArtifactRef> {
    let mut refs = self.output.included.clone();
    refs.push(ArtifactRef::Module(self.output.main_module));
    refs
  }

  pub fn object(&self, r: ArtifactRef) -> IncludedObject<'_> {
    match r {
      ArtifactRef::Module(idx) => IncludedObject::Module(&self.modules[idx]),
      ArtifactRef::File(idx) => IncludedObject::File(&self.files[idx]),
    }
  }

  pub fn config(&self, r: ArtifactRef) -> &ArtifactConfig {
    self.object(r).config()
  }

  pub fn config_mut(&mut self, r: ArtifactRef) -> &mut ArtifactConfig {
    match r {
      ArtifactRef::Module(idx) => &mut self.modules[idx].config,
      ArtifactRef::File(idx) => &mut self.files[idx].config,
    }
  }

  pub fn main_module(&self) -> &ModuleArtifact {
    &self.modules[self.output.main_module]
  }

  pub fn module_index(&self, id: &str) -> Option<usize> {
    self.modules.iter().position(|m| m.config.id == id)
  }

  pub fn module(&self, id: &str) -> Option<&ModuleArtifact> {
    self.module_index(id).map(|idx| &self.modules[idx])
  }

  pub fn file(&self, id: &str) -> Option<&FileArtifact> {
    self.files.iter().find(|f| f.config.id == id)
  }

  pub fn profile(&self, id: &str) -> Option<&CompressionProfile> {
    self.compression.iter().find(|p| p.id == id)
  }

  /// Compression profile of an artifact.
  pub fn profile_for(&self, r: ArtifactRef) -> Result<&CompressionProfile, ManifestError> {
    let config = self.config(r);
    self
      .profile(&config.compression)
      .ok_or_else(|| ManifestError::UnknownCompression {
        kind: r.kind_name(),
        id: config.id.clone(),
        profile: config.compression.clone(),
      })
  }

  /// Name of the produced executable: the explicit name, or the output file stem.
  pub fn output_name(&self) -> String {
    if let Some(name) = self.output.name.as_deref().filter(|n| !n.is_empty()) {
      return name.to_string();
    }
    let normalized = normalize_separators(&self.output.path);
    Path::new(&normalized)
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.main_module().config.id.clone())
  }
}

fn artifact_config(
  kind: &'static str,
  fields: EntryFields,
  defaults: (Option<&str>, PlacementKind),
  profiles: &[CompressionProfile],
) -> Result<ArtifactConfig, ManifestError> {
  let (default_compression, default_placement) = defaults;
  let missing = |id: &str, field: &'static str| ManifestError::MissingField {
    kind,
    id: id.to_string(),
    field,
  };

  if fields.id.is_empty() {
    return Err(missing("", "id"));
  }
  if fields.path.is_empty() {
    return Err(missing(&fields.id, "path"));
  }

  let compression = fields
    .compression
    .or_else(|| default_compression.map(str::to_string))
    .ok_or_else(|| missing(&fields.id, "compression"))?;
  if !profiles.iter().any(|p| p.id == compression) {
    return Err(ManifestError::UnknownCompression {
      kind,
      id: fields.id,
      profile: compression,
    });
  }

  let placement = match fields.placement {
    Some(Placement::File { path }) if path.is_empty() => return Err(missing(&fields.id, "placement.path")),
    Some(placement) => placement,
    None => Placement::from_kind(default_placement).ok_or_else(|| missing(&fields.id, "placement.path"))?,
  };

  Ok(ArtifactConfig {
    id: fields.id,
    placement,
    source_path: fields.path,
    compression,
    copy_compressed_to: fields.copy_compressed_to.filter(|p| !p.is_empty()),
  })
}

/// Files without an explicit target are extracted next to the executable.
fn default_extract_target(source_path: &str, id: &str) -> String {
  let normalized = normalize_separators(source_path);
  let file_name = Path::new(&normalized)
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| id.to_string());
  format!("%exedir%/{file_name}")
}

fn output_descriptor(
  section: OutputSection,
  modules: &[ModuleArtifact],
  files: &[FileArtifact],
) -> Result<OutputDescriptor, ManifestError> {
  if section.path.is_empty() {
    return Err(ManifestError::MissingField {
      kind: "output",
      id: String::new(),
      field: "path",
    });
  }

  let main_module = modules
    .iter()
    .position(|m| m.config.id == section.main_module)
    .ok_or_else(|| ManifestError::UnknownMainModule(section.main_module.clone()))?;

  let mut included = Vec::new();
  let mut include = |r: ArtifactRef, id: &str| -> Result<(), ManifestError> {
    if r == ArtifactRef::Module(main_module) || included.contains(&r) {
      return Err(ManifestError::DuplicateInclude {
        kind: r.kind_name(),
        id: id.to_string(),
      });
    }
    included.push(r);
    Ok(())
  };

  for id in &section.include.modules {
    let idx = modules
      .iter()
      .position(|m| &m.config.id == id)
      .ok_or_else(|| ManifestError::UnknownInclude {
        kind: "module",
        id: id.clone(),
      })?;
    include(ArtifactRef::Module(idx), id)?;
  }

  let app_config = section.app_config.as_ref().map(|a| a.file.clone());
  let file_ids = section
    .include
    .files
    .iter()
    .filter(|id| app_config.as_ref() != Some(*id))
    .chain(app_config.iter());
  for id in file_ids {
    let idx = files
      .iter()
      .position(|f| &f.config.id == id)
      .ok_or_else(|| ManifestError::UnknownInclude {
        kind: "file",
        id: id.clone(),
      })?;
    include(ArtifactRef::File(idx), id)?;
  }

  Ok(OutputDescriptor {
    app_type: section.app_type,
    arch: section.arch,
    path: section.path,
    name: section.name,
    icon: section.icon.filter(|p| !p.is_empty()),
    main_module,
    threading: section.threading,
    grab_resources: section.grab_resources,
    build_options: section.build_options.filter(|o| !o.is_empty()),
    min_runtime: section.min_runtime,
    shadow_copy: section.app_config.as_ref().map(|a| a.shadow_copy).unwrap_or(false),
    app_config,
    included,
  })
}
