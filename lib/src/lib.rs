//! Importer for DirectX `.X` model files.
//!
//! [`format::xof`] reads the chunked object format itself (text or binary),
//! [`import`] turns the object tree into frames, split meshes and a global
//! material table ready for rendering.

pub mod error;
pub mod format;
pub mod import;
pub mod util;

pub use error::ImportError;
pub use import::Importer;
