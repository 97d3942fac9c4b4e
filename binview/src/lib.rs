// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

use std::fmt;

use anyhow::{anyhow as error, Result};

pub mod elf;
pub mod image;
pub mod pe;
pub mod strings;

#[doc(inline)]
pub use elf::ElfView;
#[doc(inline)]
pub use image::Image;
#[doc(inline)]
pub use pe::PeView;

/// Virtual memory address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(pub u64);

impl Address {
    pub fn offset_by(&self, offset: Offset) -> Result<Address> {
        let addr = self
            .0
            .checked_add(offset.0)
            .ok_or_else(|| error!("overflow: {:x} + {:x}", self.0, offset.0))?;

        Ok(Address(addr))
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Byte offset into a file image or a loaded module.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Offset(pub u64);

/// Errors reading or mapping an image file.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unable to open image file: {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to read metadata for image file: {path}")]
    Metadata {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to map image file: {path}")]
    Map {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("image file is empty: {path}")]
    Empty { path: String },

    #[error("image file exceeds size ceiling ({size} > {limit} bytes): {path}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("read of {len} bytes at offset {offset:x} exceeds image size {size:x}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

/// Errors decoding an executable file format.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("not an ELF image")]
    NotElf,

    #[error("not a PE image")]
    NotPe,

    #[error("malformed {format} image: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },

    #[error("{format} table out of range: {what} at {offset:x}+{size:x} exceeds image size {image_size:x}")]
    Truncated {
        format: &'static str,
        what: String,
        offset: u64,
        size: u64,
        image_size: u64,
    },

    #[error("unsupported image for this operation: {reason}")]
    Unsupported { reason: String },
}

pub(crate) mod se {
    use serde::Serializer;

    pub fn lower_hex08<S>(offset: &u64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("0x{offset:08x}"))
    }
}
