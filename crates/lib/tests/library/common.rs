//! Shared fixtures for library integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use packbox_lib::codec::{Codec, CodecError, DeflateCodec};
use packbox_lib::loader::{Bootstrap, EntryPoint, HostError, HostRuntime, ResolutionHook};
use packbox_lib::manifest::{CompressionLevel, ThreadingModel};
use packbox_lib::pack::{PackError, PackReport, Packager, StubLinker};
use serde_json::{Value, json};
use tempfile::TempDir;

pub const STUB_BYTES: &[u8] = b"#!packbox-loader-stub\n";

/// A module handle: the id and the bytes the host was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeModule {
  pub id: String,
  pub bytes: Arc<Vec<u8>>,
}

/// What the main module's entry routine does.
#[derive(Debug, Clone)]
pub enum EntryBehavior {
  Missing,
  Return { code: Option<i32>, accepts_args: bool },
  /// Ask the host for an alias; exit 0 if it resolved, 2 otherwise.
  Request(String),
  Panic,
}

type Hook = Arc<Mutex<Option<ResolutionHook<FakeModule>>>>;

/// Host runtime double that records every interaction.
pub struct FakeHost {
  hook: Hook,
  hook_calls: Arc<AtomicUsize>,
  loads: Mutex<Vec<String>>,
  load_delay: Duration,
  entry: EntryBehavior,
  seen_args: Arc<Mutex<Option<Vec<String>>>>,
  entered: Arc<Mutex<Option<(ThreadingModel, Option<String>)>>>,
}

impl FakeHost {
  pub fn new(entry: EntryBehavior) -> Arc<Self> {
    Self::slow(entry, Duration::ZERO)
  }

  /// A host that takes `load_delay` to load each module.
  pub fn slow(entry: EntryBehavior, load_delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      hook: Arc::new(Mutex::new(None)),
      hook_calls: Arc::new(AtomicUsize::new(0)),
      loads: Mutex::new(Vec::new()),
      load_delay,
      entry,
      seen_args: Arc::new(Mutex::new(None)),
      entered: Arc::new(Mutex::new(None)),
    })
  }

  /// Simulate a failed normal lookup that falls back to the hook.
  pub fn request(&self, name: &str) -> Option<FakeModule> {
    call_hook(&self.hook, &self.hook_calls, name)
  }

  pub fn loads(&self) -> Vec<String> {
    self.loads.lock().unwrap().clone()
  }

  pub fn hook_calls(&self) -> usize {
    self.hook_calls.load(Ordering::SeqCst)
  }

  pub fn seen_args(&self) -> Option<Vec<String>> {
    self.seen_args.lock().unwrap().clone()
  }

  pub fn entered(&self) -> Option<(ThreadingModel, Option<String>)> {
    self.entered.lock().unwrap().clone()
  }
}

fn call_hook(hook: &Hook, calls: &AtomicUsize, name: &str) -> Option<FakeModule> {
  calls.fetch_add(1, Ordering::SeqCst);
  let hook = hook.lock().unwrap().clone()?;
  hook(name)
}

impl HostRuntime for FakeHost {
  type Module = FakeModule;

  fn load_from_bytes(&self, id: &str, bytes: Vec<u8>) -> Result<FakeModule, HostError> {
    if bytes.starts_with(b"PANIC") {
      panic!("host blew up loading {id}");
    }
    if bytes.starts_with(b"BAD") {
      return Err(HostError::Load {
        id: id.to_string(),
        message: "bad image format".to_string(),
      });
    }
    thread::sleep(self.load_delay);
    self.loads.lock().unwrap().push(id.to_string());
    Ok(FakeModule {
      id: id.to_string(),
      bytes: Arc::new(bytes),
    })
  }

  fn register_resolution_fallback(&self, hook: ResolutionHook<FakeModule>) {
    *self.hook.lock().unwrap() = Some(hook);
  }

  fn entry_point(&self, _module: &FakeModule) -> Option<EntryPoint> {
    match self.entry.clone() {
      EntryBehavior::Missing => None,
      EntryBehavior::Return { code, accepts_args } => {
        let seen = Arc::clone(&self.seen_args);
        Some(EntryPoint {
          accepts_args,
          routine: Box::new(move |args| {
            *seen.lock().unwrap() = Some(args);
            Ok(code)
          }),
        })
      }
      EntryBehavior::Request(alias) => {
        let hook = Arc::clone(&self.hook);
        let calls = Arc::clone(&self.hook_calls);
        Some(EntryPoint {
          accepts_args: false,
          routine: Box::new(move |_| {
            let code = if call_hook(&hook, &calls, &alias).is_some() { 0 } else { 2 };
            Ok(Some(code))
          }),
        })
      }
      EntryBehavior::Panic => Some(EntryPoint {
        accepts_args: false,
        routine: Box::new(|_| panic!("entry exploded")),
      }),
    }
  }

  fn enter_thread(&self, threading: ThreadingModel) -> Result<(), HostError> {
    let name = thread::current().name().map(str::to_string);
    *self.entered.lock().unwrap() = Some((threading, name));
    Ok(())
  }
}

/// Codec that counts decompressions.
#[derive(Default)]
pub struct CountingCodec {
  inner: DeflateCodec,
  decompressions: AtomicUsize,
}

impl CountingCodec {
  pub fn decompressions(&self) -> usize {
    self.decompressions.load(Ordering::SeqCst)
  }
}

impl Codec for CountingCodec {
  fn compress(&self, level: CompressionLevel, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    self.inner.compress(level, data)
  }

  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    self.decompressions.fetch_add(1, Ordering::SeqCst);
    self.inner.decompress(data)
  }
}

/// A temporary project directory with a loader stub and source artifacts.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  pub fn new() -> Self {
    let project = Self {
      temp: TempDir::new().unwrap(),
    };
    project.write("loader.stub", STUB_BYTES);
    project
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.root().join(relative)
  }

  pub fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
  }

  pub fn write_manifest(&self, manifest: &Value) -> PathBuf {
    self.write("packbox.json", serde_json::to_string_pretty(manifest).unwrap().as_bytes())
  }

  pub fn packager(&self) -> Packager {
    Packager::new(StubLinker::new(self.path("loader.stub")))
  }

  pub fn try_build(&self, manifest: &Value) -> Result<PackReport, PackError> {
    let path = self.write_manifest(manifest);
    self.packager().build(&path)
  }

  pub fn build(&self, manifest: &Value) -> PackReport {
    self.try_build(manifest).unwrap()
  }

  /// Bootstrap a built executable with crash logs in the project root.
  pub fn bootstrap(
    &self,
    report: &PackReport,
    host: &Arc<FakeHost>,
    codec: &Arc<CountingCodec>,
  ) -> Bootstrap<FakeHost> {
    Bootstrap::new(Arc::clone(host))
      .with_executable(&report.output)
      .with_log_dir(self.root())
      .with_codec(Arc::clone(codec) as Arc<dyn Codec>)
  }
}

/// Manifest skeleton: one compression profile and a main module `app`.
pub fn base_manifest() -> Value {
  json!({
    "compression": [{ "id": "max", "level": "ultra" }],
    "modules": {
      "defaults": { "compression": "max" },
      "entries": [{ "id": "app", "path": "%configdir%/bin/app.so" }]
    },
    "files": {
      "defaults": { "compression": "max" },
      "entries": []
    },
    "output": {
      "path": "%configdir%/dist/app.bin",
      "app_type": "console",
      "arch": "x64",
      "main_module": "app",
      "include": { "modules": [], "files": [] }
    }
  })
}

pub fn add_module(manifest: &mut Value, entry: Value, include: bool) {
  let id = entry["id"].clone();
  manifest["modules"]["entries"].as_array_mut().unwrap().push(entry);
  if include {
    manifest["output"]["include"]["modules"].as_array_mut().unwrap().push(id);
  }
}

pub fn add_file(manifest: &mut Value, entry: Value, include: bool) {
  let id = entry["id"].clone();
  manifest["files"]["entries"].as_array_mut().unwrap().push(entry);
  if include {
    manifest["output"]["include"]["files"].as_array_mut().unwrap().push(id);
  }
}
