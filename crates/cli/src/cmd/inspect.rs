//! Implementation of the `packbox inspect` command.
//!
//! Reads the stamp, the resource table and the embedded manifest of a
//! produced executable.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use packbox_lib::consts::MANIFEST_RESOURCE_NAME;
use packbox_lib::image::ImageReader;
use packbox_lib::manifest::{BuildManifest, PlacementKind};

use crate::output::{format_bytes, print_json, print_stat, print_success, symbols};

#[derive(Serialize)]
struct Inspection {
  overlay_base: u64,
  overlay_len: u64,
  main_module: String,
  resources: Vec<ResourceRow>,
  overlays: Vec<OverlayRow>,
}

#[derive(Serialize)]
struct ResourceRow {
  name: String,
  offset: u64,
  length: u64,
}

#[derive(Serialize)]
struct OverlayRow {
  id: String,
  offset: i64,
  length: i64,
}

pub fn cmd_inspect(executable: &Path, json: bool) -> Result<()> {
  let reader = ImageReader::open(executable).with_context(|| format!("Failed to open {}", executable.display()))?;
  let overlay_base = reader.overlay_base().context("Not a packbox executable")?;
  let overlay_len = reader.overlay_len()?;
  let table = reader.resources().context("Failed to read resource table")?;
  let manifest_bytes = reader
    .read_resource(MANIFEST_RESOURCE_NAME)
    .context("Executable carries no embedded manifest")?;
  let manifest = BuildManifest::from_slice(&manifest_bytes).context("Embedded manifest is invalid")?;

  let inspection = Inspection {
    overlay_base,
    overlay_len,
    main_module: manifest.main_module().config.id.clone(),
    resources: table
      .entries()
      .iter()
      .map(|e| ResourceRow {
        name: e.name.clone(),
        offset: e.offset,
        length: e.length,
      })
      .collect(),
    overlays: manifest
      .all_included()
      .into_iter()
      .map(|r| manifest.config(r))
      .filter(|c| c.placement.kind() == PlacementKind::Overlay)
      .map(|c| {
        let (offset, length) = c.placement.overlay();
        OverlayRow {
          id: c.id.clone(),
          offset,
          length,
        }
      })
      .collect(),
  };

  if json {
    return print_json(&inspection);
  }

  print_success(&executable.display().to_string());
  print_stat("Loader", &format_bytes(inspection.overlay_base));
  print_stat("Overlays", &format_bytes(inspection.overlay_len));
  print_stat("Main module", &inspection.main_module);

  println!();
  println!("Resources:");
  for row in &inspection.resources {
    println!("  {} {} ({})", symbols::INFO, row.name, format_bytes(row.length));
  }

  if !inspection.overlays.is_empty() {
    println!();
    println!("Overlays:");
    for row in &inspection.overlays {
      println!("  {} {} @{} ({})", symbols::INFO, row.id, row.offset, format_bytes(row.length as u64));
    }
  }
  Ok(())
}
