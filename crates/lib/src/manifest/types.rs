//! Manifest types for packbox.
//!
//! The manifest captures everything the packaging pipeline needs to produce a
//! distributable and everything the loader needs to restore its artifacts:
//! - compression profiles, referenced by id from every artifact
//! - module artifacts, resolvable by alias at run time
//! - file artifacts, extracted to disk at start-up
//! - the output descriptor, listing the included artifacts and the main module

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compression strength applied to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
  Store,
  Fastest,
  Fast,
  Normal,
  Maximum,
  Ultra,
}

impl CompressionLevel {
  pub const ALL: [CompressionLevel; 6] = [
    Self::Store,
    Self::Fastest,
    Self::Fast,
    Self::Normal,
    Self::Maximum,
    Self::Ultra,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Store => "store",
      Self::Fastest => "fastest",
      Self::Fast => "fast",
      Self::Normal => "normal",
      Self::Maximum => "maximum",
      Self::Ultra => "ultra",
    }
  }
}

impl fmt::Display for CompressionLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A named compression setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionProfile {
  pub id: String,
  pub level: CompressionLevel,
}

/// Field-less discriminant of [`Placement`], used for manifest defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
  File,
  Overlay,
  Resource,
}

impl PlacementKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::File => "file",
      Self::Overlay => "overlay",
      Self::Resource => "resource",
    }
  }
}

impl fmt::Display for PlacementKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Where an artifact's compressed bytes live in the distributable.
///
/// The variant-specific accessors (`overlay`, `set_overlay`, `resource_name`,
/// `set_resource_name`, `file_path`) require the matching variant. Calling one
/// on another variant is a precondition violation and panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
  /// Kept as an external file, read from `path` at run time.
  File { path: String },

  /// Appended to the executable body. Populated by the pipeline.
  Overlay {
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    length: i64,
  },

  /// Embedded as a named inline blob. The pipeline fills in `name` from the
  /// packed file name unless the manifest already carries one.
  Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
  },
}

impl Placement {
  pub fn kind(&self) -> PlacementKind {
    match self {
      Self::File { .. } => PlacementKind::File,
      Self::Overlay { .. } => PlacementKind::Overlay,
      Self::Resource { .. } => PlacementKind::Resource,
    }
  }

  /// Build the empty placement for a default kind.
  ///
  /// Returns `None` for [`PlacementKind::File`], which needs a path.
  pub fn from_kind(kind: PlacementKind) -> Option<Self> {
    match kind {
      PlacementKind::File => None,
      PlacementKind::Overlay => Some(Self::Overlay { offset: 0, length: 0 }),
      PlacementKind::Resource => Some(Self::Resource { name: None }),
    }
  }

  /// Overlay `(offset, length)`.
  ///
  /// # Panics
  ///
  /// Panics if the placement is not [`Placement::Overlay`].
  pub fn overlay(&self) -> (i64, i64) {
    match self {
      Self::Overlay { offset, length } => (*offset, *length),
      other => mismatch(other, PlacementKind::Overlay),
    }
  }

  /// # Panics
  ///
  /// Panics if the placement is not [`Placement::Overlay`].
  pub fn set_overlay(&mut self, new_offset: i64, new_length: i64) {
    match self {
      Self::Overlay { offset, length } => {
        *offset = new_offset;
        *length = new_length;
      }
      other => mismatch(other, PlacementKind::Overlay),
    }
  }

  /// # Panics
  ///
  /// Panics if the placement is not [`Placement::Resource`].
  pub fn resource_name(&self) -> Option<&str> {
    match self {
      Self::Resource { name } => name.as_deref().filter(|n| !n.is_empty()),
      other => mismatch(other, PlacementKind::Resource),
    }
  }

  /// # Panics
  ///
  /// Panics if the placement is not [`Placement::Resource`].
  pub fn set_resource_name(&mut self, new_name: String) {
    match self {
      Self::Resource { name } => *name = Some(new_name),
      other => mismatch(other, PlacementKind::Resource),
    }
  }

  /// # Panics
  ///
  /// Panics if the placement is not [`Placement::File`].
  pub fn file_path(&self) -> &str {
    match self {
      Self::File { path } => path,
      other => mismatch(other, PlacementKind::File),
    }
  }
}

fn mismatch(actual: &Placement, expected: PlacementKind) -> ! {
  panic!("placement type mismatch: expected {expected}, found {}", actual.kind())
}

/// What to do when a file artifact's extraction target already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
  #[default]
  Always,
  IfMissing,
  IfSizeDiffers,
  Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
  Console,
  Windowed,
}

impl AppType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Console => "console",
      Self::Windowed => "windowed",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
  Any,
  X86,
  X64,
  Itanium,
}

impl TargetArch {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Any => "any",
      Self::X86 => "x86",
      Self::X64 => "x64",
      Self::Itanium => "itanium",
    }
  }
}

/// Concurrency affinity of the thread that runs the entry routine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingModel {
  /// Single-threaded apartment.
  #[default]
  Sta,
  /// Multi-threaded apartment.
  Mta,
}

/// Minimum host runtime version the link step targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeVersion {
  #[default]
  #[serde(rename = "v2.0")]
  V2_0,
  #[serde(rename = "v3.0")]
  V3_0,
  #[serde(rename = "v3.5")]
  V3_5,
  #[serde(rename = "v4.0")]
  V4_0,
}

impl RuntimeVersion {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::V2_0 => "v2.0",
      Self::V3_0 => "v3.0",
      Self::V3_5 => "v3.5",
      Self::V4_0 => "v4.0",
    }
  }
}

/// Fields shared by every artifact kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactConfig {
  pub id: String,
  pub placement: Placement,
  /// Source path, may contain path variables.
  pub source_path: String,
  /// Id of the compression profile.
  pub compression: String,
  /// Optional side-channel destination for the compressed bytes.
  pub copy_compressed_to: Option<String>,
}

/// A loadable module, resolvable by alias at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
  pub config: ArtifactConfig,
  /// When false, the module is loaded during start-up.
  pub lazy: bool,
  /// Logical names this module satisfies, in insertion order without duplicates.
  pub aliases: Vec<String>,
  pub generate_partial_aliases: bool,
}

impl ModuleArtifact {
  /// Add an alias unless already present. Returns whether it was added.
  pub fn add_alias(&mut self, alias: &str) -> bool {
    if self.aliases.iter().any(|a| a == alias) {
      return false;
    }
    self.aliases.push(alias.to_string());
    true
  }
}

/// A plain file, extracted to disk at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
  pub config: ArtifactConfig,
  /// Extraction target, may contain path variables.
  pub extract_to: String,
  pub overwrite: OverwritePolicy,
}

/// Index of an artifact within the manifest's owned collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactRef {
  Module(usize),
  File(usize),
}

impl ArtifactRef {
  pub fn kind_name(&self) -> &'static str {
    match self {
      Self::Module(_) => "module",
      Self::File(_) => "file",
    }
  }
}

/// Borrowed view of an included artifact.
#[derive(Debug, Clone, Copy)]
pub enum IncludedObject<'a> {
  Module(&'a ModuleArtifact),
  File(&'a FileArtifact),
}

impl<'a> IncludedObject<'a> {
  pub fn config(&self) -> &'a ArtifactConfig {
    match self {
      Self::Module(m) => &m.config,
      Self::File(f) => &f.config,
    }
  }

  pub fn id(&self) -> &'a str {
    &self.config().id
  }
}

/// Description of the produced executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
  pub app_type: AppType,
  pub arch: TargetArch,
  /// Output path, may contain path variables.
  pub path: String,
  /// Name of the produced executable; defaults to the output file stem.
  pub name: Option<String>,
  pub icon: Option<String>,
  /// Index of the main module in [`super::BuildManifest::modules`].
  pub main_module: usize,
  pub threading: ThreadingModel,
  pub grab_resources: bool,
  pub build_options: Option<String>,
  pub min_runtime: RuntimeVersion,
  /// Id of the file artifact carrying the application config.
  pub app_config: Option<String>,
  pub shadow_copy: bool,
  /// Included artifacts, in declaration order. Does not contain the main module.
  pub included: Vec<ArtifactRef>,
}

/// Defaults applied to module entries that omit a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefaults {
  pub compression: Option<String>,
  pub placement: PlacementKind,
  pub lazy: bool,
  pub partial_aliases: bool,
}

impl Default for ModuleDefaults {
  fn default() -> Self {
    Self {
      compression: None,
      placement: PlacementKind::Resource,
      lazy: true,
      partial_aliases: true,
    }
  }
}

/// Defaults applied to file entries that omit a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDefaults {
  pub compression: Option<String>,
  pub placement: PlacementKind,
  pub overwrite: OverwritePolicy,
}

impl Default for FileDefaults {
  fn default() -> Self {
    Self {
      compression: None,
      placement: PlacementKind::Overlay,
      overwrite: OverwritePolicy::Always,
    }
  }
}
