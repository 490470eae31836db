//! Declarative (serialized) form of the manifest.
//!
//! The document mirrors the JSON a user writes: most fields are optional and
//! fall back to per-section defaults. [`super::BuildManifest::from_document`]
//! applies those defaults and validates references;
//! [`super::BuildManifest::to_document`] writes every field back explicitly.
//!
//! # Example
//!
//! ```json
//! {
//!   "compression": [{ "id": "max", "level": "ultra" }],
//!   "modules": {
//!     "defaults": { "compression": "max", "placement": "resource" },
//!     "entries": [
//!       { "id": "app", "path": "%configdir%/bin/app.so" },
//!       { "id": "util", "path": "%configdir%/bin/util.so", "lazy": false, "aliases": ["Util"] }
//!     ]
//!   },
//!   "files": {
//!     "defaults": { "compression": "max", "overwrite": "if-missing" },
//!     "entries": [{ "id": "readme", "path": "README.txt", "extract_to": "%exedir%/README.txt" }]
//!   },
//!   "output": {
//!     "path": "%configdir%/dist/app.bin",
//!     "app_type": "console",
//!     "arch": "x64",
//!     "main_module": "app",
//!     "threading": "mta",
//!     "include": { "modules": ["util"], "files": ["readme"] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::types::{
  AppType, CompressionProfile, OverwritePolicy, Placement, PlacementKind, RuntimeVersion, TargetArch, ThreadingModel,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
  pub compression: Vec<CompressionProfile>,
  #[serde(default)]
  pub modules: ModuleSection,
  #[serde(default)]
  pub files: FileSection,
  pub output: OutputSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
  #[serde(default)]
  pub defaults: ModuleDefaultsDoc,
  #[serde(default)]
  pub entries: Vec<ModuleEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDefaultsDoc {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compression: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placement: Option<PlacementKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lazy: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub partial_aliases: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
  pub id: String,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compression: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placement: Option<Placement>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub copy_compressed_to: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lazy: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub partial_aliases: Option<bool>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSection {
  #[serde(default)]
  pub defaults: FileDefaultsDoc,
  #[serde(default)]
  pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDefaultsDoc {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compression: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placement: Option<PlacementKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub overwrite: Option<OverwritePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
  pub id: String,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compression: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placement: Option<Placement>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub copy_compressed_to: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extract_to: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub overwrite: Option<OverwritePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub app_type: AppType,
  pub arch: TargetArch,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  pub main_module: String,
  #[serde(default)]
  pub threading: ThreadingModel,
  #[serde(default)]
  pub grab_resources: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build_options: Option<String>,
  #[serde(default)]
  pub min_runtime: RuntimeVersion,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub app_config: Option<AppConfigRef>,
  #[serde(default)]
  pub include: IncludeSection,
}

/// Reference to the file artifact that carries the application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfigRef {
  pub file: String,
  #[serde(default)]
  pub shadow_copy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeSection {
  #[serde(default)]
  pub modules: Vec<String>,
  #[serde(default)]
  pub files: Vec<String>,
}
