//! Runtime resolver.
//!
//! Bring-up happens once, explicitly, through [`Resolver::initialize`]: the
//! embedded manifest is parsed and the alias index built. The resulting
//! resolver is immutable apart from its module cache and is shared as an
//! `Arc` with the resolution hook. [`Resolver::run`] then drives the entry
//! sequence:
//!
//! 1. install the resolution hook
//! 2. extract file artifacts according to their overwrite policy
//! 3. load non-lazy modules
//! 4. load the main module
//! 5. run the entry routine on a dedicated worker thread
//!
//! [`Bootstrap`] wraps all of it for a produced executable and records fatal
//! faults in the crash log.

mod cache;
mod crashlog;
mod host;

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use cache::ModuleCache;
pub use crashlog::CrashLog;
pub use host::{EntryPoint, HostError, HostRuntime, ResolutionHook};

use crate::codec::{Codec, CodecError, DeflateCodec};
use crate::consts::MANIFEST_RESOURCE_NAME;
use crate::image::{ImageError, ImageReader};
use crate::manifest::{
  ArtifactConfig, ArtifactRef, BuildManifest, FileArtifact, ManifestError, ModuleArtifact, OverwritePolicy, Placement,
};
use crate::placeholder::{RuntimeVariables, VarError, substitute};

#[derive(Debug, Error)]
pub enum LoaderError {
  #[error("invalid embedded manifest: {0}")]
  Manifest(#[from] ManifestError),

  #[error("alias '{alias}' is claimed by both '{first}' and '{second}'")]
  AliasConflict {
    alias: String,
    first: String,
    second: String,
  },

  #[error(transparent)]
  Image(#[from] ImageError),

  #[error(transparent)]
  Vars(#[from] VarError),

  #[error("failed to read '{id}' from {path}: {source}")]
  ReadFile {
    id: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to decompress '{id}': {source}")]
  Decompress {
    id: String,
    #[source]
    source: CodecError,
  },

  #[error(transparent)]
  Host(#[from] HostError),

  #[error("failed to extract '{id}' to {path}: {source}")]
  Extract {
    id: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to start entry thread: {0}")]
  Spawn(#[source] io::Error),

  #[error("entry routine panicked: {0}")]
  EntryPanicked(String),

  #[error("loader panicked: {0}")]
  Panicked(String),
}

/// Alias index plus the machinery to materialize modules on demand.
pub struct Resolver<H: HostRuntime> {
  manifest: BuildManifest,
  aliases: HashMap<String, usize>,
  image: ImageReader,
  vars: RuntimeVariables,
  host: Arc<H>,
  codec: Arc<dyn Codec>,
  cache: ModuleCache<H::Module>,
  crash_log: CrashLog,
}

impl<H: HostRuntime> Resolver<H> {
  /// Parse the embedded manifest and build the alias index.
  pub fn initialize(
    manifest_bytes: &[u8],
    host: Arc<H>,
    image: ImageReader,
    vars: RuntimeVariables,
  ) -> Result<Self, LoaderError> {
    let manifest = BuildManifest::from_slice(manifest_bytes)?;

    let mut aliases: HashMap<String, usize> = HashMap::new();
    for r in manifest.all_included() {
      let ArtifactRef::Module(idx) = r else {
        continue;
      };
      for alias in &manifest.modules[idx].aliases {
        match aliases.get(alias) {
          Some(&existing) if existing != idx => {
            return Err(LoaderError::AliasConflict {
              alias: alias.clone(),
              first: manifest.modules[existing].config.id.clone(),
              second: manifest.modules[idx].config.id.clone(),
            });
          }
          _ => {
            aliases.insert(alias.clone(), idx);
          }
        }
      }
    }
    debug!(aliases = aliases.len(), "built alias index");

    Ok(Self {
      manifest,
      aliases,
      image,
      vars,
      host,
      codec: Arc::new(DeflateCodec),
      cache: ModuleCache::new(),
      crash_log: CrashLog::in_current_dir(),
    })
  }

  pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
    self.codec = codec;
    self
  }

  pub fn with_crash_log(mut self, crash_log: CrashLog) -> Self {
    self.crash_log = crash_log;
    self
  }

  pub fn manifest(&self) -> &BuildManifest {
    &self.manifest
  }

  pub fn cache(&self) -> &ModuleCache<H::Module> {
    &self.cache
  }

  /// Module registered under an alias.
  pub fn lookup(&self, alias: &str) -> Option<&ModuleArtifact> {
    self.aliases.get(alias).map(|&idx| &self.manifest.modules[idx])
  }

  /// Retrieve and decompress one artifact's payload.
  pub fn load_raw_data(&self, config: &ArtifactConfig) -> Result<Vec<u8>, LoaderError> {
    let packed = match &config.placement {
      Placement::File { path } => {
        let path = substitute(path, &self.vars);
        fs::read(&path).map_err(|source| LoaderError::ReadFile {
          id: config.id.clone(),
          path,
          source,
        })?
      }
      Placement::Resource { .. } => {
        let name = config.placement.resource_name().unwrap_or(&config.id);
        self.image.read_resource(name)?
      }
      Placement::Overlay { offset, length } => self.image.read_overlay(*offset, *length)?,
    };

    let data = self.codec.decompress(&packed).map_err(|source| LoaderError::Decompress {
      id: config.id.clone(),
      source,
    })?;
    debug!(id = %config.id, packed = packed.len(), decoded = data.len(), "loaded raw data");
    Ok(data)
  }

  /// Load a module into the host, at most once per id.
  pub fn load_module(&self, module: &ModuleArtifact) -> Result<H::Module, LoaderError> {
    let id = &module.config.id;
    self.cache.get_or_try_load(id, || -> Result<H::Module, LoaderError> {
      let bytes = self.load_raw_data(&module.config)?;
      let handle = self.host.load_from_bytes(id, bytes)?;
      info!(id = %id, "loaded module");
      Ok(handle)
    })
  }

  /// Body of the resolution hook: `Ok(None)` means "not ours".
  pub fn resolve(&self, name: &str) -> Result<Option<H::Module>, LoaderError> {
    match self.lookup(name) {
      Some(module) => self.load_module(module).map(Some),
      None => {
        debug!(name, "alias not found");
        Ok(None)
      }
    }
  }

  /// Resolve without ever propagating a fault to the host.
  fn resolve_guarded(&self, name: &str) -> Option<H::Module> {
    match panic::catch_unwind(AssertUnwindSafe(|| self.resolve(name))) {
      Ok(Ok(found)) => found,
      Ok(Err(e)) => {
        warn!(name, error = %e, "resolution hook failed");
        if let Err(log_err) = self.crash_log.error(&format!("resolving '{name}'"), &e) {
          warn!(error = %log_err, "failed to write error log");
        }
        None
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        warn!(name, panic = %message, "resolution hook panicked");
        if let Err(log_err) = self.crash_log.error_message(&format!("resolving '{name}'"), &message) {
          warn!(error = %log_err, "failed to write error log");
        }
        None
      }
    }
  }

  /// Register the resolution fallback with the host.
  ///
  /// The hook holds a weak reference, so it stops resolving once the last
  /// strong reference to the resolver is gone.
  pub fn install_hook(self: &Arc<Self>) {
    let weak = Arc::downgrade(self);
    let hook: ResolutionHook<H::Module> = Arc::new(move |name: &str| weak.upgrade()?.resolve_guarded(name));
    self.host.register_resolution_fallback(hook);
    debug!("installed resolution hook");
  }

  /// Extract included files. Returns the number of files written.
  pub fn extract_files(&self) -> Result<usize, LoaderError> {
    let mut written = 0;
    for r in &self.manifest.output.included {
      let ArtifactRef::File(idx) = *r else {
        continue;
      };
      if self.extract_file(&self.manifest.files[idx])? {
        written += 1;
      }
    }
    Ok(written)
  }

  fn extract_file(&self, file: &FileArtifact) -> Result<bool, LoaderError> {
    let id = &file.config.id;
    let target = substitute(&file.extract_to, &self.vars);

    let data = match file.overwrite {
      OverwritePolicy::Never => None,
      OverwritePolicy::Always => Some(self.load_raw_data(&file.config)?),
      OverwritePolicy::IfMissing if target.exists() => None,
      OverwritePolicy::IfMissing => Some(self.load_raw_data(&file.config)?),
      OverwritePolicy::IfSizeDiffers => {
        let data = self.load_raw_data(&file.config)?;
        match fs::metadata(&target) {
          Ok(meta) if meta.len() == data.len() as u64 => None,
          _ => Some(data),
        }
      }
    };

    let Some(data) = data else {
      debug!(id = %id, target = %target.display(), policy = ?file.overwrite, "skipped extraction");
      return Ok(false);
    };

    let extract_err = |source| LoaderError::Extract {
      id: id.clone(),
      path: target.clone(),
      source,
    };
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(extract_err)?;
    }
    fs::write(&target, &data).map_err(extract_err)?;
    info!(id = %id, target = %target.display(), bytes = data.len(), "extracted file");
    Ok(true)
  }

  /// Load every included non-lazy module. Returns the number loaded.
  pub fn load_eager(&self) -> Result<usize, LoaderError> {
    let mut loaded = 0;
    for r in &self.manifest.output.included {
      let ArtifactRef::Module(idx) = *r else {
        continue;
      };
      let module = &self.manifest.modules[idx];
      if !module.lazy {
        self.load_module(module)?;
        loaded += 1;
      }
    }
    Ok(loaded)
  }

  pub fn load_main(&self) -> Result<H::Module, LoaderError> {
    self.load_module(self.manifest.main_module())
  }

  /// Run the main module's entry routine on a dedicated worker thread and
  /// wait for it. Returns the process exit code.
  pub fn run_entry(&self, main: &H::Module, args: Vec<String>) -> Result<i32, LoaderError> {
    let Some(entry) = self.host.entry_point(main) else {
      info!("main module has no entry routine");
      return Ok(0);
    };

    let args = if entry.accepts_args { args } else { Vec::new() };
    let threading = self.manifest.output.threading;
    let host = Arc::clone(&self.host);

    let worker = thread::Builder::new()
      .name("packbox-entry".to_string())
      .spawn(move || -> Result<Option<i32>, HostError> {
        host.enter_thread(threading)?;
        (entry.routine)(args)
      })
      .map_err(LoaderError::Spawn)?;
    debug!(threading = ?threading, "dispatched entry routine");

    match worker.join() {
      Ok(result) => Ok(result?.unwrap_or(0)),
      Err(payload) => Err(LoaderError::EntryPanicked(panic_message(payload.as_ref()))),
    }
  }

  /// The full entry sequence.
  pub fn run(self: &Arc<Self>, args: Vec<String>) -> Result<i32, LoaderError> {
    self.install_hook();

    let extracted = self.extract_files()?;
    let eager = self.load_eager()?;
    debug!(extracted, eager, "bring-up complete");

    let main = self.load_main()?;
    let code = self.run_entry(&main, args)?;
    info!(code, "entry routine finished");
    Ok(code)
  }
}

/// Starts a produced executable: reads its embedded manifest, initializes the
/// resolver and runs the entry sequence.
pub struct Bootstrap<H: HostRuntime> {
  host: Arc<H>,
  executable: Option<PathBuf>,
  crash_log: CrashLog,
  codec: Arc<dyn Codec>,
}

impl<H: HostRuntime> Bootstrap<H> {
  /// Bootstrap the running executable, logging to the current directory.
  pub fn new(host: Arc<H>) -> Self {
    Self {
      host,
      executable: None,
      crash_log: CrashLog::in_current_dir(),
      codec: Arc::new(DeflateCodec),
    }
  }

  pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
    self.executable = Some(path.into());
    self
  }

  pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.crash_log = CrashLog::new(dir);
    self
  }

  pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
    self.codec = codec;
    self
  }

  pub fn crash_log(&self) -> &CrashLog {
    &self.crash_log
  }

  /// Static bring-up: returns the shared resolver.
  pub fn start(&self) -> Result<Arc<Resolver<H>>, LoaderError> {
    let (image, vars) = match &self.executable {
      Some(path) => (ImageReader::open(path)?, RuntimeVariables::for_executable(path)?),
      None => (ImageReader::for_current_exe()?, RuntimeVariables::detect()?),
    };

    let manifest_bytes = image.read_resource(MANIFEST_RESOURCE_NAME)?;
    let resolver = Resolver::initialize(&manifest_bytes, Arc::clone(&self.host), image, vars)?
      .with_codec(Arc::clone(&self.codec))
      .with_crash_log(self.crash_log.clone());
    Ok(Arc::new(resolver))
  }

  /// Start and run. A fatal fault is appended to the fatal log before it is
  /// returned.
  pub fn run(&self, args: Vec<String>) -> Result<i32, LoaderError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| self.start()?.run(args)))
      .unwrap_or_else(|payload| Err(LoaderError::Panicked(panic_message(payload.as_ref()))));

    if let Err(e) = &result {
      error!(error = %e, "loader failed");
      if let Err(log_err) = self.crash_log.fatal(e) {
        warn!(error = %log_err, "failed to write fatal log");
      }
    }
    result
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
