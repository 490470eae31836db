//! Implementation of the `packbox check` command.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use packbox_lib::manifest::BuildManifest;

use crate::output::{print_json, print_stat, print_success, symbols};

/// Load and validate a manifest, then list what a build would include.
///
/// Artifacts are listed in packing order, which is also the order overlays
/// are laid out in; the main module comes last.
pub fn cmd_check(manifest_path: &Path, json: bool) -> Result<()> {
  let manifest =
    BuildManifest::load(manifest_path).with_context(|| format!("Invalid manifest: {}", manifest_path.display()))?;

  let mut rows = Vec::new();
  for r in manifest.all_included() {
    let config = manifest.config(r);
    let profile = manifest.profile_for(r)?;
    rows.push((r.kind_name(), config.id.as_str(), config.placement.kind(), profile));
  }

  if json {
    let artifacts: Vec<_> = rows
      .iter()
      .map(|(kind, id, placement, profile)| {
        json!({ "kind": kind, "id": id, "placement": placement, "compression": profile.id, "level": profile.level })
      })
      .collect();
    return print_json(&json!({
      "output": manifest.output.path,
      "name": manifest.output_name(),
      "main_module": manifest.main_module().config.id,
      "artifacts": artifacts,
    }));
  }

  print_success(&format!("Manifest is valid: {}", manifest_path.display()));
  print_stat("Output", &manifest.output.path);
  print_stat("Main module", &manifest.main_module().config.id);
  print_stat("Artifacts", &rows.len().to_string());
  println!();
  println!("Included:");
  for (kind, id, placement, profile) in rows {
    println!(
      "  {} {} {}",
      symbols::INFO,
      id,
      format!("({kind}, {placement}, {})", profile.level).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}
