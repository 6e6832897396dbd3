//! DirectX `.X` chunked object format.
//!
//! A file is a 16-byte header followed by a token stream, either text or
//! binary. The stream declares templates (record layouts) and data objects
//! (template instances with nested children). Data objects are packed into
//! flat little-endian blocks following their template, which is what
//! [`XofObject::lock`] hands to the readers.

pub mod object;
pub mod template;
pub mod token;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub use self::{
    object::{XofFile, XofObject},
    template::TemplateRegistry,
};
use crate::{
    error::ImportError,
    format::{peek_four_cc, FourCC},
};

// File magic
pub const K_MAGIC_XOF: FourCC = FourCC(*b"xof ");
// Text encoding
pub const K_FORMAT_TEXT: FourCC = FourCC(*b"txt ");
// Binary encoding
pub const K_FORMAT_BINARY: FourCC = FourCC(*b"bin ");
// MSZIP compressed text
pub const K_FORMAT_TEXT_ZIP: FourCC = FourCC(*b"tzip");
// MSZIP compressed binary
pub const K_FORMAT_BINARY_ZIP: FourCC = FourCC(*b"bzip");
// 32-bit floats
pub const K_FLOAT_32: FourCC = FourCC(*b"0032");
// 64-bit floats
pub const K_FLOAT_64: FourCC = FourCC(*b"0064");

pub const XOF_HEADER_SIZE: usize = 16;

#[derive(Clone, Debug, PartialEq, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct XofHeader {
    pub magic: FourCC,
    pub major_version: [u8; 2],
    pub minor_version: [u8; 2],
    pub format: FourCC,
    pub float_size: FourCC,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum XofEncoding {
    Text,
    Binary,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FloatSize {
    F32,
    F64,
}

/// Returns whether `data` starts with the `xof ` magic.
#[inline]
pub fn is_xof(data: &[u8]) -> bool { peek_four_cc(data) == Some(K_MAGIC_XOF) }

impl XofHeader {
    /// Splits the header off the token stream that follows it.
    pub fn slice(data: &[u8]) -> Result<(&Self, &[u8]), ImportError> {
        if !is_xof(data) {
            log::warn!("Missing 'xof ' magic");
            return Err(ImportError::FileError);
        }
        let Some(header) = Self::ref_from_prefix(data) else {
            log::warn!("Truncated .X header ({} bytes)", data.len());
            return Err(ImportError::FileError);
        };
        log::debug!(
            "X file version {}.{}, format {}, float size {}",
            String::from_utf8_lossy(&header.major_version),
            String::from_utf8_lossy(&header.minor_version),
            header.format,
            header.float_size
        );
        Ok((header, &data[XOF_HEADER_SIZE..]))
    }

    pub fn encoding(&self) -> Result<XofEncoding, ImportError> {
        match self.format {
            K_FORMAT_TEXT => Ok(XofEncoding::Text),
            K_FORMAT_BINARY => Ok(XofEncoding::Binary),
            K_FORMAT_TEXT_ZIP | K_FORMAT_BINARY_ZIP => {
                log::warn!("Compressed .X files ({}) are not supported", self.format);
                Err(ImportError::FileError)
            }
            format => {
                log::warn!("Unknown .X format {format:?}");
                Err(ImportError::FileError)
            }
        }
    }

    pub fn float_size(&self) -> Result<FloatSize, ImportError> {
        match self.float_size {
            K_FLOAT_32 => Ok(FloatSize::F32),
            K_FLOAT_64 => Ok(FloatSize::F64),
            size => {
                log::warn!("Unknown .X float size {size:?}");
                Err(ImportError::FileError)
            }
        }
    }
}
