//! Module metadata discovery and alias derivation.
//!
//! The pipeline never executes a module. It asks a [`ModuleIntrospector`] for
//! the module's canonical qualified name and its embedded resources, then
//! derives aliases from the name.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::consts::PARTIAL_NAME_DELIMITER;
use crate::manifest::ModuleArtifact;

/// A resource bundled inside a module's compiled form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedResource {
  pub name: String,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
  /// Canonical qualified name, e.g. `Core, Version=1.0.0.0, Culture=neutral`.
  pub qualified_name: String,
  /// Leading segment of the qualified name.
  pub simple_name: String,
  pub resources: Vec<EmbeddedResource>,
}

impl ModuleMetadata {
  pub fn new(qualified_name: impl Into<String>) -> Self {
    let qualified_name = qualified_name.into();
    Self {
      simple_name: simple_name(&qualified_name).to_string(),
      qualified_name,
      resources: Vec::new(),
    }
  }
}

#[derive(Debug, Error)]
pub enum IntrospectError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse module metadata {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("module {0} has an empty qualified name")]
  EmptyName(PathBuf),
}

/// Build-time capability that reads a module's metadata without running it.
pub trait ModuleIntrospector: Send + Sync {
  fn inspect(&self, module: &Path) -> Result<ModuleMetadata, IntrospectError>;
}

/// Reads metadata from a `<module>.module.json` file next to the module.
///
/// ```json
/// { "name": "Core, Version=1.0.0.0", "resources": { "Core.strings": "res/strings.bin" } }
/// ```
///
/// Resource paths are relative to the sidecar. Without a sidecar the module's
/// file stem is its qualified name and it carries no resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarIntrospector;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Sidecar {
  name: String,
  #[serde(default)]
  resources: BTreeMap<String, String>,
}

impl SidecarIntrospector {
  pub fn sidecar_path(module: &Path) -> PathBuf {
    let mut path = OsString::from(module.as_os_str());
    path.push(".module.json");
    PathBuf::from(path)
  }
}

impl ModuleIntrospector for SidecarIntrospector {
  fn inspect(&self, module: &Path) -> Result<ModuleMetadata, IntrospectError> {
    fs::metadata(module).map_err(|source| IntrospectError::Read {
      path: module.to_path_buf(),
      source,
    })?;

    let sidecar_path = Self::sidecar_path(module);
    if !sidecar_path.is_file() {
      let stem = module
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IntrospectError::EmptyName(module.to_path_buf()))?;
      return Ok(ModuleMetadata::new(stem));
    }

    let content = fs::read_to_string(&sidecar_path).map_err(|source| IntrospectError::Read {
      path: sidecar_path.clone(),
      source,
    })?;
    let sidecar: Sidecar = serde_json::from_str(&content).map_err(|source| IntrospectError::Parse {
      path: sidecar_path.clone(),
      source,
    })?;
    if sidecar.name.trim().is_empty() {
      return Err(IntrospectError::EmptyName(module.to_path_buf()));
    }

    let base = sidecar_path.parent().unwrap_or(Path::new("."));
    let mut metadata = ModuleMetadata::new(sidecar.name);
    for (name, rel) in sidecar.resources {
      let path = base.join(rel);
      let bytes = fs::read(&path).map_err(|source| IntrospectError::Read { path, source })?;
      metadata.resources.push(EmbeddedResource { name, bytes });
    }
    Ok(metadata)
  }
}

/// Leading segment of a qualified name, without surrounding whitespace.
pub fn simple_name(qualified_name: &str) -> &str {
  qualified_name
    .split(PARTIAL_NAME_DELIMITER)
    .next()
    .unwrap_or(qualified_name)
    .trim()
}

/// Add the qualified name and, if enabled, its partial prefixes as aliases.
///
/// Prefixes are built left to right from the non-empty segments
/// (`s0`, `s0,s1`, ...) and exclude the full name. Returns the number of
/// aliases added.
pub fn derive_aliases(module: &mut ModuleArtifact, qualified_name: &str) -> usize {
  let mut added = usize::from(module.add_alias(qualified_name));

  if module.generate_partial_aliases {
    let segments: Vec<&str> = qualified_name
      .split(PARTIAL_NAME_DELIMITER)
      .filter(|s| !s.is_empty())
      .collect();
    let delimiter = PARTIAL_NAME_DELIMITER.to_string();
    for end in 1..segments.len() {
      if module.add_alias(&segments[..end].join(&delimiter)) {
        added += 1;
      }
    }
  }
  added
}

/// Rename a grabbed resource so a module-name prefix becomes the output's name.
pub fn rename_resource(resource_name: &str, module_simple_name: &str, output_stem: &str) -> String {
  match resource_name.strip_prefix(module_simple_name) {
    Some(rest) if !module_simple_name.is_empty() => format!("{output_stem}{rest}"),
    _ => resource_name.to_string(),
  }
}
