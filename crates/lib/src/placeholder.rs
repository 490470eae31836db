//! Path variable substitution.
//!
//! Any configured path (artifact sources, extraction targets, the output path,
//! copy-through destinations) may carry one variable token that expands to an
//! absolute directory.
//!
//! # Variables
//!
//! - `%configdir%` - directory containing the manifest file (build time)
//! - `%rootdir%` - root volume of the manifest file (build time)
//! - `%exedir%` - directory of the produced or running executable
//! - `%systemdir%` - host system library directory
//!
//! Tokens match case-insensitively. A token without a value, or an unknown
//! `%name%`, is left in place so the filesystem layer fails on it naturally.
//!
//! # Example
//!
//! ```
//! use std::path::{Path, PathBuf};
//! use packbox_lib::placeholder::{substitute, RuntimeVariables};
//!
//! let vars = RuntimeVariables::new(PathBuf::from("/opt/app"), PathBuf::from("/work"));
//! let path = substitute("%exedir%/data/readme.txt", &vars);
//! assert_eq!(path, Path::new("/opt/app").join("data").join("readme.txt"));
//! ```

use std::fmt;
use std::io;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use thiserror::Error;

use crate::platform::paths;

/// A recognized path variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
  ConfigDir,
  RootDir,
  ExeDir,
  SystemDir,
}

impl Variable {
  pub const ALL: [Variable; 4] = [Self::ConfigDir, Self::RootDir, Self::ExeDir, Self::SystemDir];

  /// Lowercase token as written in paths, including the `%` delimiters.
  pub fn token(&self) -> &'static str {
    match self {
      Self::ConfigDir => "%configdir%",
      Self::RootDir => "%rootdir%",
      Self::ExeDir => "%exedir%",
      Self::SystemDir => "%systemdir%",
    }
  }
}

impl fmt::Display for Variable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.token())
  }
}

#[derive(Debug, Error)]
pub enum VarError {
  #[error("manifest path {0} has no parent directory")]
  NoParent(PathBuf),

  #[error("failed to resolve absolute path of {path}: {source}")]
  Absolute {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to locate the running executable: {0}")]
  CurrentExe(#[source] io::Error),

  #[error("failed to read the current directory: {0}")]
  CurrentDir(#[source] io::Error),
}

/// Supplies variable values and the base for relative paths.
pub trait VariableSource {
  /// Value of a variable, or `None` when it is not defined in this context.
  fn resolve(&self, variable: Variable) -> Option<&Path>;

  /// Directory that token-less relative paths are resolved against.
  fn base_dir(&self) -> &Path;
}

/// Variables available while packaging.
#[derive(Debug, Clone)]
pub struct BuildVariables {
  config_dir: PathBuf,
  root_dir: Option<PathBuf>,
  exe_dir: Option<PathBuf>,
  system_dir: Option<PathBuf>,
}

impl BuildVariables {
  /// Derive `%configdir%` and `%rootdir%` from the manifest's location.
  pub fn for_manifest(manifest_path: &Path) -> Result<Self, VarError> {
    let absolute = std::path::absolute(manifest_path).map_err(|source| VarError::Absolute {
      path: manifest_path.to_path_buf(),
      source,
    })?;
    let config_dir = absolute
      .parent()
      .ok_or_else(|| VarError::NoParent(absolute.clone()))?
      .to_path_buf();
    Ok(Self::new(config_dir))
  }

  pub fn new(config_dir: PathBuf) -> Self {
    Self {
      root_dir: paths::root_of(&config_dir),
      config_dir,
      exe_dir: None,
      system_dir: paths::system_dir(),
    }
  }

  /// Set `%exedir%`, the directory of the produced executable.
  pub fn with_exe_dir(mut self, exe_dir: PathBuf) -> Self {
    self.exe_dir = Some(exe_dir);
    self
  }

  pub fn config_dir(&self) -> &Path {
    &self.config_dir
  }
}

impl VariableSource for BuildVariables {
  fn resolve(&self, variable: Variable) -> Option<&Path> {
    match variable {
      Variable::ConfigDir => Some(&self.config_dir),
      Variable::RootDir => self.root_dir.as_deref(),
      Variable::ExeDir => self.exe_dir.as_deref(),
      Variable::SystemDir => self.system_dir.as_deref(),
    }
  }

  fn base_dir(&self) -> &Path {
    &self.config_dir
  }
}

/// Variables available inside the running executable.
#[derive(Debug, Clone)]
pub struct RuntimeVariables {
  exe_dir: PathBuf,
  system_dir: Option<PathBuf>,
  base_dir: PathBuf,
}

impl RuntimeVariables {
  pub fn new(exe_dir: PathBuf, base_dir: PathBuf) -> Self {
    Self {
      exe_dir,
      system_dir: paths::system_dir(),
      base_dir,
    }
  }

  /// Detect variables for the running process, relative paths resolving
  /// against the current directory.
  pub fn detect() -> Result<Self, VarError> {
    let exe = paths::current_exe().map_err(VarError::CurrentExe)?;
    let exe_dir = exe.parent().ok_or_else(|| VarError::NoParent(exe.clone()))?.to_path_buf();
    let base_dir = std::env::current_dir().map_err(VarError::CurrentDir)?;
    Ok(Self::new(exe_dir, base_dir))
  }

  /// Variables for an executable at an explicit path.
  pub fn for_executable(exe_path: &Path) -> Result<Self, VarError> {
    let absolute = std::path::absolute(exe_path).map_err(|source| VarError::Absolute {
      path: exe_path.to_path_buf(),
      source,
    })?;
    let exe_dir = absolute
      .parent()
      .ok_or_else(|| VarError::NoParent(absolute.clone()))?
      .to_path_buf();
    let base_dir = std::env::current_dir().map_err(VarError::CurrentDir)?;
    Ok(Self::new(exe_dir, base_dir))
  }

  pub fn with_system_dir(mut self, system_dir: Option<PathBuf>) -> Self {
    self.system_dir = system_dir;
    self
  }

  pub fn exe_dir(&self) -> &Path {
    &self.exe_dir
  }
}

impl VariableSource for RuntimeVariables {
  fn resolve(&self, variable: Variable) -> Option<&Path> {
    match variable {
      Variable::ExeDir => Some(&self.exe_dir),
      Variable::SystemDir => self.system_dir.as_deref(),
      Variable::ConfigDir | Variable::RootDir => None,
    }
  }

  fn base_dir(&self) -> &Path {
    &self.base_dir
  }
}

/// Replace both `/` and `\` with the platform separator.
pub fn normalize_separators(path: &str) -> String {
  path
    .chars()
    .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
    .collect()
}

/// Find the first known token in a path, returning it with its byte offset.
pub fn find_variable(path: &str) -> Option<(Variable, usize)> {
  let lower = path.to_ascii_lowercase();
  Variable::ALL
    .iter()
    .filter_map(|v| lower.find(v.token()).map(|idx| (*v, idx)))
    .min_by_key(|(_, idx)| *idx)
}

/// Expand a configured path into a filesystem path.
///
/// Separators are normalized first. When a token with a value is present it
/// is removed, one leading separator is stripped from what remains, and the
/// remainder is joined onto the value. A path without a token is made
/// absolute against the source's base directory.
pub fn substitute(path: &str, source: &impl VariableSource) -> PathBuf {
  let normalized = normalize_separators(path);

  if let Some((variable, start)) = find_variable(&normalized) {
    let Some(value) = source.resolve(variable) else {
      return PathBuf::from(normalized);
    };

    let end = start + variable.token().len();
    let rest = format!("{}{}", &normalized[..start], &normalized[end..]);
    let rest = rest.strip_prefix(MAIN_SEPARATOR).unwrap_or(&rest);
    return if rest.is_empty() {
      value.to_path_buf()
    } else {
      value.join(rest)
    };
  }

  let plain = PathBuf::from(normalized);
  if plain.is_absolute() {
    plain
  } else {
    source.base_dir().join(plain)
  }
}
