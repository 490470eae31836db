//! End-to-end tests for the packaging pipeline.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use packbox_lib::codec::{Codec, DeflateCodec};
use packbox_lib::consts::{MANIFEST_RESOURCE_NAME, SCRATCH_DIR};
use packbox_lib::image::ImageReader;
use packbox_lib::manifest::{BuildManifest, ManifestError, PlacementKind};
use packbox_lib::pack::{IntrospectError, ModuleIntrospector, ModuleMetadata, PackError, SidecarIntrospector};
use serde_json::json;

use super::common::{CountingCodec, Project, STUB_BYTES, add_file, add_module, base_manifest};

fn embedded_manifest(reader: &ImageReader) -> BuildManifest {
  BuildManifest::from_slice(&reader.read_resource(MANIFEST_RESOURCE_NAME).unwrap()).unwrap()
}

#[test]
fn build_produces_stamped_executable() {
  let project = Project::new();
  project.write("bin/app.so", b"main module body");
  project.write("docs/README.txt", b"read me first");
  project.write("data/table.bin", &[9u8; 4096]);

  let mut manifest = base_manifest();
  add_file(&mut manifest, json!({ "id": "readme", "path": "docs/README.txt" }), true);
  add_file(&mut manifest, json!({ "id": "table", "path": "data/table.bin" }), true);
  let report = project.build(&manifest);

  assert_eq!(report.output, project.path("dist/app.bin"));
  let len = fs::metadata(&report.output).unwrap().len();
  assert_eq!(len, report.original_len + report.overlay_len + 4);

  let bytes = fs::read(&report.output).unwrap();
  assert!(bytes.starts_with(STUB_BYTES));
  assert_eq!(&bytes[bytes.len() - 4..], &(report.original_len as u32).to_be_bytes());
  assert_eq!(report.sha256, packbox_lib::util::hash::hash_bytes(&bytes));

  assert!(!project.path(SCRATCH_DIR).exists(), "scratch workspace should be removed");
}

#[test]
fn embedded_manifest_records_placement() {
  let project = Project::new();
  project.write("bin/app.so", b"main module body");
  project.write("bin/util.so", b"utility module");
  project.write("a.txt", b"aaaa");
  project.write("b.txt", b"bbbbbbbbbbbbbbbbbbbbbbbb");

  let mut manifest = base_manifest();
  manifest["modules"]["entries"][0]["placement"] = json!({ "kind": "overlay" });
  add_module(&mut manifest, json!({ "id": "util", "path": "bin/util.so" }), true);
  add_file(&mut manifest, json!({ "id": "a", "path": "a.txt" }), true);
  add_file(&mut manifest, json!({ "id": "b", "path": "b.txt" }), true);
  let report = project.build(&manifest);

  let reader = ImageReader::open(&report.output).unwrap();
  let embedded = embedded_manifest(&reader);

  // Overlays follow all_included order: a, b, then the main module.
  let a = embedded.file("a").unwrap().config.placement.overlay();
  let b = embedded.file("b").unwrap().config.placement.overlay();
  let main = embedded.main_module().config.placement.overlay();
  assert_eq!(a.0, 0);
  assert_eq!(b.0, a.0 + a.1);
  assert_eq!(main.0, b.0 + b.1);
  assert_eq!((main.0 + main.1) as u64, report.overlay_len);

  let util = embedded.module("util").unwrap();
  assert_eq!(util.config.placement.kind(), PlacementKind::Resource);
  assert!(util.config.placement.resource_name().unwrap().ends_with(".packed"));
  assert_eq!(util.aliases, vec!["util"]);

  let codec = DeflateCodec;
  let packed = reader.read_overlay(b.0, b.1).unwrap();
  assert_eq!(codec.decompress(&packed).unwrap(), b"bbbbbbbbbbbbbbbbbbbbbbbb");
}

#[test]
fn qualified_names_become_aliases() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  let core = project.write("bin/core.so", b"core module");
  fs::write(
    SidecarIntrospector::sidecar_path(&core),
    r#"{ "name": "Core, Version=1.2.0.0, Culture=neutral" }"#,
  )
  .unwrap();

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({ "id": "core", "path": "bin/core.so", "aliases": ["CoreLib"] }),
    true,
  );
  let report = project.build(&manifest);

  let embedded = embedded_manifest(&ImageReader::open(&report.output).unwrap());
  assert_eq!(
    embedded.module("core").unwrap().aliases,
    vec![
      "CoreLib",
      "Core, Version=1.2.0.0, Culture=neutral",
      "Core",
      "Core, Version=1.2.0.0",
    ]
  );
}

#[test]
fn duplicate_id_fails_before_packing() {
  let project = Project::new();
  project.write("bin/app.so", b"main");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "app", "path": "bin/other.so" }), false);

  let err = project.try_build(&manifest).unwrap_err();
  assert!(matches!(
    err,
    PackError::Manifest(ManifestError::DuplicateId { kind: "module", ref id }) if id == "app"
  ));
  assert!(!project.path(SCRATCH_DIR).exists());
  assert!(!project.path("dist").exists());
}

#[test]
fn missing_source_aborts_build() {
  let project = Project::new();

  let err = project.try_build(&base_manifest()).unwrap_err();
  assert!(matches!(err, PackError::ReadSource { ref id, .. } if id == "app"));
  assert!(!project.path(SCRATCH_DIR).exists());
}

#[test]
fn copy_through_writes_packed_bytes() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  project.write("plugin.so", b"plugin payload");

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({
      "id": "plugin",
      "path": "plugin.so",
      "copy_compressed_to": "%exedir%/side/plugin.packed",
    }),
    true,
  );
  project.build(&manifest);

  let copied = fs::read(project.path("dist/side/plugin.packed")).unwrap();
  assert_eq!(DeflateCodec.decompress(&copied).unwrap(), b"plugin payload");
}

#[test]
fn failed_link_promotes_nothing() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  project.write("plugin.so", b"plugin payload");
  fs::remove_file(project.path("loader.stub")).unwrap();

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({ "id": "plugin", "path": "plugin.so", "copy_compressed_to": "%exedir%/plugin.packed" }),
    true,
  );

  let err = project.try_build(&manifest).unwrap_err();
  assert!(matches!(err, PackError::LinkFailed { ref log } if log[0].contains("not found")));
  assert!(!project.path("dist/app.bin").exists());
  assert!(!project.path("dist/plugin.packed").exists());
  assert!(!project.path(SCRATCH_DIR).exists());
}

#[test]
fn grabbed_resources_are_renamed_to_output() {
  let project = Project::new();
  let app = project.write("bin/app.so", b"main");
  project.write("bin/res/strings.bin", b"localized strings");
  project.write("bin/res/icons.bin", b"icons");
  fs::write(
    SidecarIntrospector::sidecar_path(&app),
    r#"{
      "name": "Launcher.Core, Version=3.0",
      "resources": {
        "Launcher.Core.Strings.resources": "res/strings.bin",
        "Shared.Icons.resources": "res/icons.bin"
      }
    }"#,
  )
  .unwrap();

  let mut manifest = base_manifest();
  manifest["output"]["grab_resources"] = json!(true);
  let report = project.build(&manifest);

  let reader = ImageReader::open(&report.output).unwrap();
  assert_eq!(reader.read_resource("app.Strings.resources").unwrap(), b"localized strings");
  // Falls back to the executable-qualified name.
  assert_eq!(reader.read_resource("Strings.resources").unwrap(), b"localized strings");
  assert_eq!(reader.read_resource("Shared.Icons.resources").unwrap(), b"icons");
}

#[test]
fn conflicting_resource_names_are_fatal() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  project.write("plugin.so", b"plugin");

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({
      "id": "plugin",
      "path": "plugin.so",
      "placement": { "kind": "resource", "name": MANIFEST_RESOURCE_NAME },
    }),
    true,
  );

  let err = project.try_build(&manifest).unwrap_err();
  assert!(matches!(err, PackError::ResourceConflict(ref name) if name == MANIFEST_RESOURCE_NAME));
}

#[test]
fn app_config_is_included_last() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  project.write("app.config", b"<config/>");
  project.write("notes.txt", b"notes");

  let mut manifest = base_manifest();
  add_file(&mut manifest, json!({ "id": "config", "path": "app.config" }), false);
  add_file(&mut manifest, json!({ "id": "notes", "path": "notes.txt" }), true);
  manifest["output"]["app_config"] = json!({ "file": "config", "shadow_copy": true });
  let report = project.build(&manifest);

  let embedded = embedded_manifest(&ImageReader::open(&report.output).unwrap());
  let ids: Vec<&str> = embedded
    .all_included()
    .into_iter()
    .map(|r| embedded.object(r).id())
    .collect();
  assert_eq!(ids, vec!["notes", "config", "app"]);
  assert!(embedded.output.shadow_copy);
}

/// Names every module `Vendor.<stem>, Version=1.0`.
struct VendorIntrospector;

impl ModuleIntrospector for VendorIntrospector {
  fn inspect(&self, module: &Path) -> Result<ModuleMetadata, IntrospectError> {
    let stem = module.file_stem().unwrap().to_string_lossy();
    Ok(ModuleMetadata::new(format!("Vendor.{stem}, Version=1.0")))
  }
}

#[test]
fn injected_collaborators_are_used() {
  let project = Project::new();
  project.write("bin/app.so", b"main");
  let path = project.write_manifest(&base_manifest());

  let codec = Arc::new(CountingCodec::default());
  let report = project
    .packager()
    .with_codec(Arc::clone(&codec) as Arc<dyn Codec>)
    .with_introspector(VendorIntrospector)
    .build(&path)
    .unwrap();

  let embedded = embedded_manifest(&ImageReader::open(&report.output).unwrap());
  assert_eq!(embedded.main_module().aliases, vec!["Vendor.app, Version=1.0", "Vendor.app"]);
  assert_eq!(codec.decompressions(), 0);
}
