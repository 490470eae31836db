//! packbox-lib: Core types and logic for packbox
//!
//! This crate provides everything needed to turn a set of artifacts into one
//! self-contained executable and to restore them again at run time:
//! - `Manifest`: the declarative description of artifacts and the output
//! - `Pack`: the packaging pipeline (compress, place, link, append overlays)
//! - `Image`: the on-disk layout of a produced executable
//! - `Loader`: the runtime resolver that serves artifacts to a host runtime

pub mod codec;
pub mod consts;
pub mod image;
pub mod loader;
pub mod manifest;
pub mod pack;
pub mod placeholder;
pub mod platform;
pub mod util;
