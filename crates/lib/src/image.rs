//! On-disk layout of a produced executable.
//!
//! ```text
//! [link output][overlay 1]..[overlay N][stamp: u32 BE = len(link output)]
//! ```
//!
//! The built-in stub linker produces the link output as
//!
//! ```text
//! [stub][blob 1]..[blob M][index JSON][index len: u32 BE][magic "PKBXRES1"]
//! ```
//!
//! so the resource table always ends exactly where the overlay region
//! begins. Index entries carry absolute offsets into the image.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::platform::paths;

/// Size of the trailing overlay stamp.
pub const STAMP_LEN: u64 = 4;

/// Marker closing a resource table.
pub const RESOURCE_MAGIC: &[u8; 8] = b"PKBXRES1";

const TABLE_TRAILER_LEN: u64 = 4 + RESOURCE_MAGIC.len() as u64;

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("image I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("failed to open image {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("executable is {0} bytes, larger than the overlay stamp can address")]
  TooLarge(u64),

  #[error("corrupted image: expected {expected} bytes at offset {offset}, read {actual}")]
  Corrupted { offset: u64, expected: u64, actual: u64 },

  #[error("image is {0} bytes, too short to carry an overlay stamp")]
  MissingStamp(u64),

  #[error("overlay stamp {stamp} points past the end of the image ({len} bytes)")]
  BadStamp { stamp: u64, len: u64 },

  #[error("image has no resource table")]
  NoResourceTable,

  #[error("malformed resource index: {0}")]
  MalformedIndex(String),

  #[error("resource '{0}' not found")]
  ResourceNotFound(String),

  #[error("resource '{0}' is embedded more than once")]
  DuplicateResource(String),
}

/// Append overlay files and the trailing stamp to an executable.
///
/// Returns the executable's length before anything was appended. The stamp is
/// written even when there are no overlays.
pub fn append_overlays(exe: &Path, overlays: &[PathBuf]) -> Result<u64, ImageError> {
  let mut out = OpenOptions::new()
    .append(true)
    .open(exe)
    .map_err(|source| ImageError::Open {
      path: exe.to_path_buf(),
      source,
    })?;

  let original_len = out.metadata()?.len();
  let stamp = i32::try_from(original_len).map_err(|_| ImageError::TooLarge(original_len))?;

  for overlay in overlays {
    let mut input = File::open(overlay).map_err(|source| ImageError::Open {
      path: overlay.clone(),
      source,
    })?;
    let copied = io::copy(&mut input, &mut out)?;
    trace!(overlay = %overlay.display(), bytes = copied, "appended overlay");
  }

  out.write_all(&(stamp as u32).to_be_bytes())?;
  out.flush()?;
  debug!(exe = %exe.display(), original_len, overlays = overlays.len(), "wrote overlay stamp");
  Ok(original_len)
}

/// Read the trailing stamp: the length of the image before its overlays.
pub fn read_stamp<R: Read + Seek>(image: &mut R) -> Result<u64, ImageError> {
  let len = image.seek(SeekFrom::End(0))?;
  if len < STAMP_LEN {
    return Err(ImageError::MissingStamp(len));
  }

  image.seek(SeekFrom::End(-(STAMP_LEN as i64)))?;
  let mut buf = [0u8; STAMP_LEN as usize];
  image.read_exact(&mut buf)?;

  let stamp = u64::from(u32::from_be_bytes(buf));
  if stamp > len - STAMP_LEN {
    return Err(ImageError::BadStamp { stamp, len });
  }
  Ok(stamp)
}

/// Read exactly `length` bytes at `offset`; a short read means a corrupted image.
fn read_exact_at<R: Read + Seek>(image: &mut R, offset: u64, length: u64) -> Result<Vec<u8>, ImageError> {
  image.seek(SeekFrom::Start(offset))?;
  let mut buf = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
  image.by_ref().take(length).read_to_end(&mut buf)?;

  let actual = buf.len() as u64;
  if actual != length {
    return Err(ImageError::Corrupted {
      offset,
      expected: length,
      actual,
    });
  }
  Ok(buf)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
  pub name: String,
  pub offset: u64,
  pub length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceIndex {
  resources: Vec<ResourceEntry>,
}

/// Appends named blobs and their index to the end of a writer.
pub struct ResourceTableWriter<W: Write + Seek> {
  out: W,
  position: u64,
  entries: Vec<ResourceEntry>,
}

impl<W: Write + Seek> ResourceTableWriter<W> {
  pub fn new(mut out: W) -> Result<Self, ImageError> {
    let position = out.seek(SeekFrom::End(0))?;
    Ok(Self {
      out,
      position,
      entries: Vec::new(),
    })
  }

  pub fn add(&mut self, name: &str, data: &mut impl Read) -> Result<(), ImageError> {
    if self.entries.iter().any(|e| e.name == name) {
      return Err(ImageError::DuplicateResource(name.to_string()));
    }

    let length = io::copy(data, &mut self.out)?;
    self.entries.push(ResourceEntry {
      name: name.to_string(),
      offset: self.position,
      length,
    });
    self.position += length;
    Ok(())
  }

  /// Write the index and trailer.
  pub fn finish(mut self) -> Result<ResourceTable, ImageError> {
    let index = ResourceIndex {
      resources: self.entries,
    };
    let json = serde_json::to_vec(&index).map_err(|e| ImageError::MalformedIndex(e.to_string()))?;
    let json_len = u32::try_from(json.len()).map_err(|_| ImageError::TooLarge(json.len() as u64))?;

    self.out.write_all(&json)?;
    self.out.write_all(&json_len.to_be_bytes())?;
    self.out.write_all(RESOURCE_MAGIC)?;
    self.out.flush()?;

    Ok(ResourceTable {
      entries: index.resources,
    })
  }
}

/// Index of the named blobs embedded in an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
  entries: Vec<ResourceEntry>,
}

impl ResourceTable {
  /// Locate and parse the table that ends at byte `end`.
  pub fn read<R: Read + Seek>(image: &mut R, end: u64) -> Result<Self, ImageError> {
    if end < TABLE_TRAILER_LEN {
      return Err(ImageError::NoResourceTable);
    }

    image.seek(SeekFrom::Start(end - RESOURCE_MAGIC.len() as u64))?;
    let mut magic = [0u8; 8];
    image.read_exact(&mut magic)?;
    if &magic != RESOURCE_MAGIC {
      return Err(ImageError::NoResourceTable);
    }

    image.seek(SeekFrom::Start(end - TABLE_TRAILER_LEN))?;
    let mut len_buf = [0u8; 4];
    image.read_exact(&mut len_buf)?;
    let index_len = u64::from(u32::from_be_bytes(len_buf));
    let index_end = end - TABLE_TRAILER_LEN;
    if index_len > index_end {
      return Err(ImageError::MalformedIndex(format!(
        "index length {index_len} exceeds table start"
      )));
    }

    let index_start = index_end - index_len;
    let json = read_exact_at(image, index_start, index_len)?;
    let index: ResourceIndex =
      serde_json::from_slice(&json).map_err(|e| ImageError::MalformedIndex(e.to_string()))?;

    if let Some(entry) = index
      .resources
      .iter()
      .find(|e| e.offset.saturating_add(e.length) > index_start)
    {
      return Err(ImageError::MalformedIndex(format!(
        "resource '{}' overlaps the index",
        entry.name
      )));
    }

    Ok(Self {
      entries: index.resources,
    })
  }

  pub fn get(&self, name: &str) -> Option<&ResourceEntry> {
    self.entries.iter().find(|e| e.name == name)
  }

  pub fn entries(&self) -> &[ResourceEntry] {
    &self.entries
  }

  pub fn read_entry<R: Read + Seek>(&self, image: &mut R, entry: &ResourceEntry) -> Result<Vec<u8>, ImageError> {
    read_exact_at(image, entry.offset, entry.length)
  }
}

/// Read access to a produced executable.
///
/// The overlay base and the resource table are read on first use and then
/// cached for the lifetime of the reader.
#[derive(Debug)]
pub struct ImageReader {
  path: PathBuf,
  stem: String,
  overlay_base: OnceCell<u64>,
  resources: OnceCell<ResourceTable>,
}

impl ImageReader {
  pub fn open(path: &Path) -> Result<Self, ImageError> {
    fs::metadata(path).map_err(|source| ImageError::Open {
      path: path.to_path_buf(),
      source,
    })?;

    Ok(Self {
      stem: path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default(),
      path: path.to_path_buf(),
      overlay_base: OnceCell::new(),
      resources: OnceCell::new(),
    })
  }

  /// Reader over the running executable.
  pub fn for_current_exe() -> Result<Self, ImageError> {
    let exe = paths::current_exe()?;
    Self::open(&exe)
  }

  fn file(&self) -> Result<File, ImageError> {
    File::open(&self.path).map_err(|source| ImageError::Open {
      path: self.path.clone(),
      source,
    })
  }

  /// Start of the overlay region, from the trailing stamp.
  pub fn overlay_base(&self) -> Result<u64, ImageError> {
    self
      .overlay_base
      .get_or_try_init(|| {
        let base = read_stamp(&mut self.file()?)?;
        debug!(image = %self.path.display(), base, "read overlay stamp");
        Ok(base)
      })
      .copied()
  }

  /// Bytes between the overlay base and the stamp.
  pub fn overlay_len(&self) -> Result<u64, ImageError> {
    let base = self.overlay_base()?;
    let len = self.file()?.metadata()?.len();
    Ok(len - STAMP_LEN - base)
  }

  /// Read one overlay slice, relative to the overlay base.
  pub fn read_overlay(&self, offset: i64, length: i64) -> Result<Vec<u8>, ImageError> {
    let base = self.overlay_base()?;
    let (Ok(offset), Ok(length)) = (u64::try_from(offset), u64::try_from(length)) else {
      return Err(ImageError::Corrupted {
        offset: base,
        expected: length.max(0) as u64,
        actual: 0,
      });
    };

    let mut file = self.file()?;
    let region_end = file.metadata()?.len() - STAMP_LEN;
    let start = base + offset;
    // Bytes past the overlay region belong to the stamp, never to an artifact.
    let available = region_end.saturating_sub(start).min(length);
    if available != length {
      return Err(ImageError::Corrupted {
        offset: start,
        expected: length,
        actual: available,
      });
    }
    read_exact_at(&mut file, start, length)
  }

  /// The embedded resource table.
  pub fn resources(&self) -> Result<&ResourceTable, ImageError> {
    self.resources.get_or_try_init(|| {
      let base = self.overlay_base()?;
      ResourceTable::read(&mut self.file()?, base)
    })
  }

  /// Read a resource by name, falling back to `<exe stem>.<name>`.
  pub fn read_resource(&self, name: &str) -> Result<Vec<u8>, ImageError> {
    let table = self.resources()?;
    let entry = match table.get(name) {
      Some(entry) => entry,
      None => table
        .get(&format!("{}.{}", self.stem, name))
        .ok_or_else(|| ImageError::ResourceNotFound(name.to_string()))?,
    };
    table.read_entry(&mut self.file()?, entry)
  }
}
