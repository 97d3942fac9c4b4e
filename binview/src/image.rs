// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::ImageError;

/// Default ceiling on mappable image size.
pub const MAX_IMAGE_SIZE: u64 = 100 * 1024 * 1024;

/// A read-only, bounds-checked view of an executable file.
///
/// Parser views borrow the mapped bytes, so an `Image` must outlive every
/// view derived from it.
#[derive(Debug)]
pub struct Image {
    path: PathBuf,
    map: Mmap,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        Self::open_with_limit(path, MAX_IMAGE_SIZE)
    }

    pub fn open_with_limit(path: impl AsRef<Path>, limit: u64) -> Result<Self, ImageError> {
        let path = path.as_ref().to_path_buf();

        let display = || path.display().to_string();

        let file = File::open(&path).map_err(|source| ImageError::Open {
            path: display(),
            source,
        })?;

        let metadata = file.metadata().map_err(|source| ImageError::Metadata {
            path: display(),
            source,
        })?;

        let size = metadata.len();

        if size == 0 {
            return Err(ImageError::Empty { path: display() });
        }

        if size > limit {
            return Err(ImageError::TooLarge {
                path: display(),
                size,
                limit,
            });
        }

        // Safety: the mapping is private and read-only. A concurrent
        // truncation of the backing file could still fault reads, which is
        // the accepted contract for inspecting on-disk images.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| ImageError::Map {
            path: display(),
            source,
        })?;

        debug!("mapped {} ({size} bytes)", path.display());

        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Checked subslice of the image.
    pub fn bytes(&self, offset: u64, len: u64) -> Result<&[u8], ImageError> {
        let size = self.len();

        let end = offset.checked_add(len).filter(|end| *end <= size);

        match end {
            Some(end) => Ok(&self.map[offset as usize..end as usize]),
            None => Err(ImageError::OutOfBounds { offset, len, size }),
        }
    }

    /// Offsets of every occurrence of `needle` in the image.
    pub fn find(&self, needle: &[u8]) -> Vec<u64> {
        find_all(&self.map, needle)
    }
}

/// Offsets of every occurrence of `needle` in `data`.
pub fn find_all(data: &[u8], needle: &[u8]) -> Vec<u64> {
    if needle.is_empty() || needle.len() > data.len() {
        return vec![];
    }

    data.windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle)
        .map(|(i, _)| i as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn image_with(data: &[u8]) -> (tempfile::NamedTempFile, Image) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();

        let image = Image::open(file.path()).unwrap();

        (file, image)
    }

    #[test]
    fn test_open_and_read() {
        let (_file, image) = image_with(b"hello, mapped world");

        assert_eq!(image.len(), 19);
        assert_eq!(image.bytes(0, 5).unwrap(), b"hello");
        assert_eq!(image.bytes(7, 6).unwrap(), b"mapped");
        assert_eq!(image.bytes(14, 5).unwrap(), b"world");
    }

    #[test]
    fn test_bounds_are_enforced() {
        let (_file, image) = image_with(b"0123456789");

        assert!(image.bytes(0, 10).is_ok());
        assert!(matches!(
            image.bytes(0, 11),
            Err(ImageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            image.bytes(10, 1),
            Err(ImageError::OutOfBounds { .. })
        ));

        // Offset past the end with a length that would wrap.
        assert!(matches!(
            image.bytes(u64::MAX, 2),
            Err(ImageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let err = Image::open(file.path()).unwrap_err();
        assert!(matches!(err, ImageError::Empty { .. }));
    }

    #[test]
    fn test_size_ceiling() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 32]).unwrap();
        file.flush().unwrap();

        let err = Image::open_with_limit(file.path(), 16).unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { size: 32, .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Image::open("/nonexistent/definitely-not-here").unwrap_err();
        assert!(matches!(err, ImageError::Open { .. }));
    }

    #[test]
    fn test_find() {
        let (_file, image) = image_with(b"abcabcab");

        assert_eq!(image.find(b"abc"), vec![0, 3]);
        assert_eq!(image.find(b"ab"), vec![0, 3, 6]);
        assert_eq!(image.find(b"zz"), Vec::<u64>::new());
        assert_eq!(image.find(b""), Vec::<u64>::new());
    }
}
