//! Terminal output for packbox commands.
//!
//! Status lines carry a leading symbol and are only colored when the target
//! stream supports it. Diagnostics and errors go to stderr, everything else to
//! stdout.

use anyhow::Context;
use owo_colors::{AnsiColors, OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// First 12 hex digits of a digest.
pub fn truncate_hash(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

/// Packed size as a percentage of the original.
pub fn format_ratio(original: u64, packed: u64) -> String {
  if original == 0 {
    return "-".to_string();
  }
  format!("{:.0}%", packed as f64 * 100.0 / original as f64)
}

fn status(stream: Stream, symbol: &str, color: AnsiColors, message: &str) {
  let line = format!("{} {}", symbol.if_supports_color(stream, |s| s.color(color)), message);
  match stream {
    Stream::Stderr => eprintln!("{line}"),
    _ => println!("{line}"),
  }
}

pub fn print_success(message: &str) {
  status(Stream::Stdout, symbols::SUCCESS, AnsiColors::Green, message);
}

pub fn print_info(message: &str) {
  status(Stream::Stdout, symbols::INFO, AnsiColors::Blue, message);
}

/// Tool diagnostics, printed verbatim.
pub fn print_warning(message: &str) {
  status(Stream::Stderr, symbols::WARNING, AnsiColors::Yellow, message);
}

pub fn print_error(message: &str) {
  let message = message.if_supports_color(Stream::Stderr, |s| s.red()).to_string();
  status(Stream::Stderr, symbols::ERROR, AnsiColors::Red, &message);
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
