//! Link step: turn the loader plus inline blobs into one executable.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::image::{ImageError, ResourceTableWriter};
use crate::manifest::{AppType, RuntimeVersion, TargetArch};

/// A named blob to embed, backed by a file in the scratch workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineBlob {
  pub name: String,
  pub path: PathBuf,
}

/// Everything the link step needs to produce the executable.
#[derive(Debug, Clone)]
pub struct LinkRequest {
  pub output: PathBuf,
  pub blobs: Vec<InlineBlob>,
  pub app_type: AppType,
  pub arch: TargetArch,
  pub icon: Option<PathBuf>,
  pub build_options: Option<String>,
  pub min_runtime: RuntimeVersion,
}

/// Pass/fail plus the diagnostics the tool printed, verbatim.
///
/// `warnings` lists request options the linker could not honor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
  pub success: bool,
  pub log: Vec<String>,
  pub warnings: Vec<String>,
}

impl LinkOutcome {
  fn failed(message: String) -> Self {
    Self {
      success: false,
      log: vec![message],
      warnings: Vec::new(),
    }
  }

  fn finished(success: bool, log: Vec<String>) -> Self {
    Self {
      success,
      log,
      warnings: Vec::new(),
    }
  }
}

#[derive(Debug, Error)]
pub enum LinkError {
  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to embed resources: {0}")]
  Image(#[from] ImageError),

  #[error("failed to spawn link command '{command}': {source}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },
}

/// External build/link collaborator.
///
/// Tool diagnostics belong in [`LinkOutcome::log`]; an `Err` is reserved for
/// failures to run the tool at all.
pub trait Linker: Send + Sync {
  fn link(&self, request: &LinkRequest) -> Result<LinkOutcome, LinkError>;
}

/// Copies a prebuilt loader stub and appends a resource table to it.
#[derive(Debug, Clone)]
pub struct StubLinker {
  stub: PathBuf,
}

impl StubLinker {
  pub fn new(stub: impl Into<PathBuf>) -> Self {
    Self { stub: stub.into() }
  }

  /// Options a prebuilt stub cannot apply. The stub is a console image for
  /// whatever architecture it was built for.
  pub fn ignored_options(request: &LinkRequest) -> Vec<String> {
    let mut ignored = Vec::new();
    if request.app_type != AppType::Console {
      ignored.push(format!("app type '{}'", request.app_type.as_str()));
    }
    if request.arch != TargetArch::Any {
      ignored.push(format!("target arch '{}'", request.arch.as_str()));
    }
    if let Some(icon) = &request.icon {
      ignored.push(format!("icon {}", icon.display()));
    }
    if let Some(options) = request.build_options.as_deref().filter(|o| !o.trim().is_empty()) {
      ignored.push(format!("build options '{options}'"));
    }
    ignored
      .into_iter()
      .map(|option| format!("loader stub ignores {option}"))
      .collect()
  }
}

impl Linker for StubLinker {
  fn link(&self, request: &LinkRequest) -> Result<LinkOutcome, LinkError> {
    if !self.stub.is_file() {
      return Ok(LinkOutcome::failed(format!(
        "loader stub {} not found",
        self.stub.display()
      )));
    }

    let io_err = |path: &Path| {
      let path = path.to_path_buf();
      move |source| LinkError::Io { path, source }
    };

    fs::copy(&self.stub, &request.output).map_err(io_err(&request.output))?;
    let out = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&request.output)
      .map_err(io_err(&request.output))?;

    let mut writer = ResourceTableWriter::new(out)?;
    for blob in &request.blobs {
      let mut input = File::open(&blob.path).map_err(io_err(&blob.path))?;
      writer.add(&blob.name, &mut input)?;
      debug!(name = %blob.name, "embedded resource");
    }
    writer.finish()?;

    Ok(LinkOutcome {
      success: true,
      log: vec![format!(
        "embedded {} resources into {}",
        request.blobs.len(),
        request.output.display()
      )],
      warnings: Self::ignored_options(request),
    })
  }
}

/// Runs an external build command through the platform shell.
///
/// The command template may reference `{output}`, `{resources}` (blob paths
/// joined by `,`), `{names}` (blob names joined by `,`), `{apptype}`,
/// `{arch}`, `{icon}`, `{options}` and `{runtime}`.
#[derive(Debug, Clone)]
pub struct CommandLinker {
  template: String,
  shell: Option<String>,
}

impl CommandLinker {
  pub fn new(template: impl Into<String>) -> Self {
    Self {
      template: template.into(),
      shell: None,
    }
  }

  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  /// The command line for a request.
  pub fn render(&self, request: &LinkRequest) -> String {
    let join = |f: fn(&InlineBlob) -> String| request.blobs.iter().map(f).collect::<Vec<_>>().join(",");

    self
      .template
      .replace("{output}", &request.output.to_string_lossy())
      .replace("{resources}", &join(|b| b.path.to_string_lossy().into_owned()))
      .replace("{names}", &join(|b| b.name.clone()))
      .replace("{apptype}", request.app_type.as_str())
      .replace("{arch}", request.arch.as_str())
      .replace(
        "{icon}",
        &request
          .icon
          .as_ref()
          .map(|p| p.to_string_lossy().into_owned())
          .unwrap_or_default(),
      )
      .replace("{options}", request.build_options.as_deref().unwrap_or_default())
      .replace("{runtime}", request.min_runtime.as_str())
  }
}

impl Linker for CommandLinker {
  fn link(&self, request: &LinkRequest) -> Result<LinkOutcome, LinkError> {
    let command = self.render(request);
    let (shell, shell_args) = get_shell(self.shell.as_deref());
    info!(cmd = %command, "running link command");

    let working_dir = request.output.parent().unwrap_or(Path::new("."));
    let output = Command::new(&shell)
      .args(&shell_args)
      .arg(&command)
      .current_dir(working_dir)
      .output()
      .map_err(|source| LinkError::Spawn {
        command: command.clone(),
        source,
      })?;

    let mut log: Vec<String> = String::from_utf8_lossy(&output.stdout)
      .lines()
      .chain(String::from_utf8_lossy(&output.stderr).lines())
      .map(str::to_string)
      .collect();

    if !output.status.success() {
      debug!(code = ?output.status.code(), "link command failed");
      log.push(match output.status.code() {
        Some(code) => format!("link command exited with status {code}"),
        None => "link command was terminated by a signal".to_string(),
      });
      return Ok(LinkOutcome::finished(false, log));
    }

    if !request.output.is_file() {
      log.push(format!(
        "link command did not produce {}",
        request.output.display()
      ));
      return Ok(LinkOutcome::finished(false, log));
    }

    Ok(LinkOutcome::finished(true, log))
  }
}

/// Shell program and the flag that passes it a command string.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
