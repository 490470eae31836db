//! Runtime tests: build a real executable, then bring it up against a fake host.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use packbox_lib::loader::LoaderError;
use packbox_lib::manifest::ThreadingModel;
use serde_json::json;

use super::common::{CountingCodec, EntryBehavior, FakeHost, Project, add_file, add_module, base_manifest};

fn args() -> Vec<String> {
  vec!["--flag".to_string(), "value".to_string()]
}

#[test]
fn eager_modules_load_without_the_hook() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/util.so", b"utility module");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "util", "path": "bin/util.so", "lazy": false }), true);
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Return {
    code: None,
    accepts_args: false,
  });
  let codec = Arc::new(CountingCodec::default());
  let code = project.bootstrap(&report, &host, &codec).run(args()).unwrap();

  assert_eq!(code, 0);
  assert_eq!(host.loads(), vec!["util", "app"]);
  assert_eq!(host.hook_calls(), 0);
}

#[test]
fn lazy_module_loads_once_on_request() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/bar.so", b"lazy bar module");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "bar", "path": "bin/bar.so", "aliases": ["Bar"] }), true);
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Request("Bar".to_string()));
  let codec = Arc::new(CountingCodec::default());
  let resolver = project.bootstrap(&report, &host, &codec).start().unwrap();
  assert_eq!(resolver.lookup("Bar").unwrap().config.id, "bar");
  assert!(resolver.cache().is_empty());

  assert_eq!(resolver.run(Vec::new()).unwrap(), 0);
  assert!(resolver.cache().is_loaded("bar"));
  assert_eq!(host.loads(), vec!["app", "bar"]);
  assert_eq!(codec.decompressions(), 2);

  // Served from the cache the second time.
  let again = host.request("Bar").unwrap();
  assert_eq!(again.bytes.as_slice(), b"lazy bar module");
  assert_eq!(host.loads(), vec!["app", "bar"]);
  assert_eq!(codec.decompressions(), 2);
  assert_eq!(host.hook_calls(), 2);
}

#[test]
fn eager_resource_module_is_resolved_from_the_cache() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/foo.so", b"eager foo module");

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({
      "id": "foo",
      "path": "bin/foo.so",
      "placement": { "kind": "resource" },
      "aliases": ["Foo"],
      "lazy": false
    }),
    true,
  );
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Request("Foo".to_string()));
  let codec = Arc::new(CountingCodec::default());
  let resolver = project.bootstrap(&report, &host, &codec).start().unwrap();

  assert_eq!(resolver.run(Vec::new()).unwrap(), 0);
  assert_eq!(host.loads(), vec!["foo", "app"]);
  assert_eq!(host.hook_calls(), 1);
  assert_eq!(codec.decompressions(), 2);

  let foo = host.request("Foo").unwrap();
  assert_eq!(foo.bytes.as_slice(), b"eager foo module");
  assert_eq!(host.loads(), vec!["foo", "app"]);
}

#[test]
fn unknown_alias_is_declined() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  let report = project.build(&base_manifest());

  let host = FakeHost::new(EntryBehavior::Request("Missing.Module".to_string()));
  let codec = Arc::new(CountingCodec::default());
  let bootstrap = project.bootstrap(&report, &host, &codec);

  assert_eq!(bootstrap.run(Vec::new()).unwrap(), 2);
  assert!(!bootstrap.crash_log().error_path().exists());
}

#[test]
fn hook_failure_is_logged_and_declined() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/broken.so", b"BAD image");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "broken", "path": "bin/broken.so", "aliases": ["Broken"] }), true);
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Request("Broken".to_string()));
  let codec = Arc::new(CountingCodec::default());
  let bootstrap = project.bootstrap(&report, &host, &codec);

  assert_eq!(bootstrap.run(Vec::new()).unwrap(), 2);
  let log = fs::read_to_string(bootstrap.crash_log().error_path()).unwrap();
  assert!(log.contains("resolving 'Broken'"), "log: {log}");
  assert!(log.contains("bad image format"), "log: {log}");
  assert!(!bootstrap.crash_log().fatal_path().exists());
}

#[test]
fn host_panic_during_resolution_is_contained() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/boom.so", b"PANIC on load");
  project.write("bin/bar.so", b"lazy bar module");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "boom", "path": "bin/boom.so", "aliases": ["Boom"] }), true);
  add_module(&mut manifest, json!({ "id": "bar", "path": "bin/bar.so", "aliases": ["Bar"] }), true);
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  let bootstrap = project.bootstrap(&report, &host, &codec);
  let resolver = bootstrap.start().unwrap();
  resolver.install_hook();

  assert_eq!(host.request("Boom"), None);
  let log = fs::read_to_string(bootstrap.crash_log().error_path()).unwrap();
  assert!(log.contains("resolving 'Boom'"), "log: {log}");
  assert!(log.contains("host blew up loading boom"), "log: {log}");
  assert!(!resolver.cache().is_loaded("boom"));

  assert_eq!(host.request("Nope"), None);
  assert_eq!(host.request("Bar").unwrap().id, "bar");
  assert!(!bootstrap.crash_log().fatal_path().exists());
}

#[test]
fn concurrent_resolution_loads_once() {
  const THREADS: usize = 8;

  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/bar.so", b"lazy bar module");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "bar", "path": "bin/bar.so", "aliases": ["Bar"] }), true);
  let report = project.build(&manifest);

  let host = FakeHost::slow(EntryBehavior::Missing, Duration::from_millis(30));
  let codec = Arc::new(CountingCodec::default());
  let resolver = project.bootstrap(&report, &host, &codec).start().unwrap();

  let barrier = Barrier::new(THREADS);
  let modules: Vec<_> = thread::scope(|scope| {
    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        scope.spawn(|| {
          barrier.wait();
          resolver.resolve("Bar").unwrap().unwrap()
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(host.loads(), vec!["bar"]);
  assert_eq!(codec.decompressions(), 1);
  assert!(modules.iter().all(|m| Arc::ptr_eq(&m.bytes, &modules[0].bytes)));
}

#[test]
fn overwrite_policies_are_honored() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("files/sized.txt", b"0123456789");
  project.write("files/same.txt", b"abcdef");
  project.write("files/missing.txt", b"missing");
  project.write("files/never.txt", b"never");

  let mut manifest = base_manifest();
  add_file(
    &mut manifest,
    json!({ "id": "sized", "path": "files/sized.txt", "overwrite": "if-size-differs" }),
    true,
  );
  add_file(
    &mut manifest,
    json!({ "id": "same", "path": "files/same.txt", "overwrite": "if-size-differs" }),
    true,
  );
  add_file(
    &mut manifest,
    json!({ "id": "missing", "path": "files/missing.txt", "overwrite": "if-missing" }),
    true,
  );
  add_file(
    &mut manifest,
    json!({ "id": "never", "path": "files/never.txt", "overwrite": "never" }),
    true,
  );
  let report = project.build(&manifest);

  project.write("dist/sized.txt", b"short");
  project.write("dist/same.txt", b"ABCDEF");
  project.write("dist/missing.txt", b"keep me");

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  assert_eq!(project.bootstrap(&report, &host, &codec).run(Vec::new()).unwrap(), 0);

  assert_eq!(fs::read(project.path("dist/sized.txt")).unwrap(), b"0123456789");
  assert_eq!(fs::read(project.path("dist/same.txt")).unwrap(), b"ABCDEF");
  assert_eq!(fs::read(project.path("dist/missing.txt")).unwrap(), b"keep me");
  assert!(!project.path("dist/never.txt").exists());
}

#[test]
fn files_are_extracted_to_their_targets() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("docs/README.txt", b"read me");

  let mut manifest = base_manifest();
  add_file(
    &mut manifest,
    json!({ "id": "readme", "path": "docs/README.txt", "extract_to": "%exedir%/docs/README.txt" }),
    true,
  );
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  project.bootstrap(&report, &host, &codec).run(Vec::new()).unwrap();

  assert_eq!(fs::read(project.path("dist/docs/README.txt")).unwrap(), b"read me");
}

#[test]
fn alias_conflict_is_fatal() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/one.so", b"one");
  project.write("bin/two.so", b"two");

  let mut manifest = base_manifest();
  add_module(&mut manifest, json!({ "id": "one", "path": "bin/one.so", "aliases": ["Shared"] }), true);
  add_module(&mut manifest, json!({ "id": "two", "path": "bin/two.so", "aliases": ["Shared"] }), true);
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  let bootstrap = project.bootstrap(&report, &host, &codec);

  let err = bootstrap.run(Vec::new()).unwrap_err();
  assert!(matches!(err, LoaderError::AliasConflict { ref alias, .. } if alias == "Shared"));
  assert!(host.loads().is_empty());

  let log = fs::read_to_string(bootstrap.crash_log().fatal_path()).unwrap();
  assert!(log.contains("alias 'Shared'"), "log: {log}");
}

#[test]
fn entry_panic_is_fatal() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  let report = project.build(&base_manifest());

  let host = FakeHost::new(EntryBehavior::Panic);
  let codec = Arc::new(CountingCodec::default());
  let bootstrap = project.bootstrap(&report, &host, &codec);

  let err = bootstrap.run(Vec::new()).unwrap_err();
  assert!(matches!(err, LoaderError::EntryPanicked(ref msg) if msg == "entry exploded"));
  let log = fs::read_to_string(bootstrap.crash_log().fatal_path()).unwrap();
  assert!(log.contains("entry exploded"));
}

#[test]
fn arguments_reach_entries_that_accept_them() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  let report = project.build(&base_manifest());
  let codec = Arc::new(CountingCodec::default());

  let host = FakeHost::new(EntryBehavior::Return {
    code: Some(7),
    accepts_args: true,
  });
  assert_eq!(project.bootstrap(&report, &host, &codec).run(args()).unwrap(), 7);
  assert_eq!(host.seen_args(), Some(args()));

  let host = FakeHost::new(EntryBehavior::Return {
    code: Some(3),
    accepts_args: false,
  });
  assert_eq!(project.bootstrap(&report, &host, &codec).run(args()).unwrap(), 3);
  assert_eq!(host.seen_args(), Some(Vec::new()));
}

#[test]
fn entry_runs_on_a_configured_worker_thread() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");

  let mut manifest = base_manifest();
  manifest["output"]["threading"] = json!("mta");
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Return {
    code: None,
    accepts_args: false,
  });
  let codec = Arc::new(CountingCodec::default());
  project.bootstrap(&report, &host, &codec).run(Vec::new()).unwrap();

  assert_eq!(
    host.entered(),
    Some((ThreadingModel::Mta, Some("packbox-entry".to_string())))
  );
}

#[test]
fn file_placed_module_is_read_from_disk() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/plugin.so", b"plugin module");

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({
      "id": "plugin",
      "path": "bin/plugin.so",
      "lazy": false,
      "placement": { "kind": "file", "path": "%exedir%/plugin.packed" },
      "copy_compressed_to": "%exedir%/plugin.packed",
    }),
    true,
  );
  let report = project.build(&manifest);
  assert!(project.path("dist/plugin.packed").is_file());

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  project.bootstrap(&report, &host, &codec).run(Vec::new()).unwrap();
  assert_eq!(host.loads(), vec!["plugin", "app"]);
}

#[test]
fn missing_file_placed_module_is_fatal() {
  let project = Project::new();
  project.write("bin/app.so", b"main module");
  project.write("bin/plugin.so", b"plugin module");

  let mut manifest = base_manifest();
  add_module(
    &mut manifest,
    json!({
      "id": "plugin",
      "path": "bin/plugin.so",
      "lazy": false,
      "placement": { "kind": "file", "path": "%exedir%/plugin.packed" },
    }),
    true,
  );
  let report = project.build(&manifest);

  let host = FakeHost::new(EntryBehavior::Missing);
  let codec = Arc::new(CountingCodec::default());
  let err = project.bootstrap(&report, &host, &codec).run(Vec::new()).unwrap_err();
  assert!(matches!(err, LoaderError::ReadFile { ref id, .. } if id == "plugin"));
}
