//! Implementation of the `packbox build` command.
//!
//! Runs the packaging pipeline and reports the outcome. The last line on
//! stdout is always `BUILD SUCCEEDED.` or `BUILD FAILED.`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use owo_colors::{OwoColorize, Stream};

use packbox_lib::consts::STUB_ENV_VAR;
use packbox_lib::manifest::BuildManifest;
use packbox_lib::pack::{CommandLinker, PackError, PackReport, Packager, StubLinker};
use packbox_lib::placeholder::BuildVariables;

use crate::output::{
  format_bytes, format_ratio, print_error, print_info, print_stat, print_success, print_warning, symbols, truncate_hash,
};

pub enum LinkerChoice {
  Stub(PathBuf),
  Command { template: String, shell: Option<String> },
}

pub struct BuildOptions {
  pub manifest: PathBuf,
  pub linker: Option<LinkerChoice>,
  pub output: Option<String>,
  pub verbose: bool,
}

pub fn cmd_build(opts: &BuildOptions) -> ExitCode {
  let started = Instant::now();
  print_info(&format!("Building {}", opts.manifest.display()));

  match run(opts) {
    Ok(report) => {
      print_report(&report, opts.verbose);
      print_stat("Elapsed", &elapsed(started).to_string());
      println!();
      println!("BUILD SUCCEEDED.");
      ExitCode::SUCCESS
    }
    Err(e) => {
      if let Some(PackError::LinkFailed { log }) = e.downcast_ref::<PackError>() {
        for line in log {
          print_warning(line);
        }
      }
      print_error(&format!("{e:#}"));
      println!();
      println!("BUILD FAILED.");
      ExitCode::FAILURE
    }
  }
}

fn run(opts: &BuildOptions) -> Result<PackReport> {
  let packager = match &opts.linker {
    Some(LinkerChoice::Command { template, shell }) => {
      let mut linker = CommandLinker::new(template.as_str());
      if let Some(shell) = shell {
        linker = linker.with_shell(shell.as_str());
      }
      Packager::new(linker)
    }
    Some(LinkerChoice::Stub(stub)) => Packager::new(StubLinker::new(stub)),
    None => bail!("No loader stub given; pass --stub, set {STUB_ENV_VAR}, or use --link-cmd"),
  };

  let manifest_path = dunce::canonicalize(&opts.manifest)
    .with_context(|| format!("Manifest not found: {}", opts.manifest.display()))?;
  let mut manifest = BuildManifest::load(&manifest_path)?;
  if let Some(output) = &opts.output {
    manifest.output.path = output.clone();
  }
  let vars = BuildVariables::for_manifest(&manifest_path)?;

  Ok(packager.build_manifest(manifest, vars)?)
}

fn print_report(report: &PackReport, verbose: bool) {
  for artifact in &report.artifacts {
    println!(
      "  {} {} {} {} {} {} ({})",
      symbols::INFO,
      artifact.id,
      format!("({}, {})", artifact.kind, artifact.placement).if_supports_color(Stream::Stdout, |s| s.dimmed()),
      format_bytes(artifact.original_len),
      symbols::ARROW,
      format_bytes(artifact.packed_len),
      format_ratio(artifact.original_len, artifact.packed_len),
    );
  }
  for warning in &report.link_warnings {
    print_warning(warning);
  }
  if verbose {
    for line in &report.link_log {
      println!("  {}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
    }
  }

  println!();
  print_success(&format!("Wrote {}", report.output.display()));
  print_stat("Size", &format_bytes(report.original_len + report.overlay_len + 4));
  print_stat("Overlays", &format_bytes(report.overlay_len));
  print_stat("SHA-256", truncate_hash(&report.sha256.0));
}

/// Elapsed time, rounded to milliseconds.
fn elapsed(started: Instant) -> humantime::FormattedDuration {
  let millis = started.elapsed().as_millis() as u64;
  humantime::format_duration(Duration::from_millis(millis))
}
