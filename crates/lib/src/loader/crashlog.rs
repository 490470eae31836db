//! On-disk crash logs.
//!
//! The loader never writes to the console. Fatal faults go to
//! `rolling-fatal.log`, faults recovered inside the resolution hook to
//! `rolling-error.log`. Each entry is a timestamped block with the full
//! cause chain.

use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};

use crate::consts::{ERROR_LOG_FILENAME, FATAL_LOG_FILENAME};

#[derive(Debug, Clone)]
pub struct CrashLog {
  dir: PathBuf,
}

impl CrashLog {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// Logs in the current working directory.
  pub fn in_current_dir() -> Self {
    Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
  }

  pub fn fatal_path(&self) -> PathBuf {
    self.dir.join(FATAL_LOG_FILENAME)
  }

  pub fn error_path(&self) -> PathBuf {
    self.dir.join(ERROR_LOG_FILENAME)
  }

  pub fn fatal(&self, error: &(dyn Error + 'static)) -> io::Result<()> {
    append(&self.fatal_path(), "fatal", &cause_chain(error))
  }

  pub fn error(&self, context: &str, error: &(dyn Error + 'static)) -> io::Result<()> {
    let mut lines = vec![context.to_string()];
    lines.extend(cause_chain(error));
    append(&self.error_path(), "error", &lines)
  }

  /// Log a fault that carries only a message, such as a caught panic.
  pub fn error_message(&self, context: &str, message: &str) -> io::Result<()> {
    append(&self.error_path(), "error", &[context.to_string(), message.to_string()])
  }
}

fn cause_chain(error: &(dyn Error + 'static)) -> Vec<String> {
  let mut lines = vec![error.to_string()];
  let mut source = error.source();
  while let Some(cause) = source {
    lines.push(format!("caused by: {cause}"));
    source = cause.source();
  }
  lines
}

fn append(path: &Path, severity: &str, lines: &[String]) -> io::Result<()> {
  let mut block = format!("[{}] {severity}\n", Local::now().to_rfc3339_opts(SecondsFormat::Millis, false));
  for line in lines {
    block.push_str("  ");
    block.push_str(line);
    block.push('\n');
  }
  block.push('\n');

  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  file.write_all(block.as_bytes())?;
  file.flush()
}
