use std::io;
use std::path::{Component, Path, PathBuf};

/// Host system library directory, the value of `%systemdir%`.
#[cfg(windows)]
pub fn system_dir() -> Option<PathBuf> {
  std::env::var_os("SystemRoot").map(|root| PathBuf::from(root).join("System32"))
}

/// Host system library directory, the value of `%systemdir%`.
#[cfg(not(windows))]
pub fn system_dir() -> Option<PathBuf> {
  Some(PathBuf::from("/usr/lib"))
}

/// Root volume of a path: the drive prefix and root on Windows, `/` elsewhere.
///
/// Returns `None` for relative paths.
pub fn root_of(path: &Path) -> Option<PathBuf> {
  let mut root = PathBuf::new();
  for component in path.components() {
    match component {
      Component::Prefix(_) | Component::RootDir => root.push(component.as_os_str()),
      _ => break,
    }
  }
  (!root.as_os_str().is_empty()).then_some(root)
}

/// Path of the running executable, canonicalized without UNC prefixes.
pub fn current_exe() -> io::Result<PathBuf> {
  let exe = std::env::current_exe()?;
  Ok(dunce::canonicalize(&exe).unwrap_or(exe))
}
