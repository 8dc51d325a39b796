//! Byte sources decoder plugins read from.
//!
//! Only local files are opened by URI; remote protocols are provided by the
//! embedding daemon through its own [`InputStream`] implementations.

mod file;
mod memory;
mod rewind;

use std::path::Path;

use anyhow::Result;
use decoder_types::Tag;

use crate::error::DecoderError;

pub use file::FileInputStream;
pub use memory::MemoryInputStream;
pub use rewind::RewindInputStream;

/// A readable, possibly seekable stream of bytes.
pub trait InputStream: Send + Sync {
    /// URI the stream was opened from.
    fn uri(&self) -> &str;

    /// Read up to `buf.len()` bytes; 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move to the absolute byte `offset`.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Current read position.
    fn offset(&self) -> u64;

    /// Total size in bytes, when known.
    fn size(&self) -> Option<u64>;

    fn is_seekable(&self) -> bool;

    fn is_eof(&self) -> bool;

    fn mime_type(&self) -> Option<&str> {
        None
    }

    /// Metadata announced by the stream itself (e.g. a radio station title).
    ///
    /// Returns each new tag once.
    fn read_tag(&mut self) -> Option<Tag> {
        None
    }
}

pub type InputStreamPtr = Box<dyn InputStream>;

/// Open `uri`: a `file://` URI or an absolute local path.
///
/// Non-seekable streams come back wrapped in a [`RewindInputStream`].
pub fn open_uri(uri: &str) -> Result<InputStreamPtr> {
    let input = if let Some(path) = uri.strip_prefix("file://") {
        open_local(Path::new(path))?
    } else if uri.contains("://") {
        return Err(DecoderError::UnsupportedUri(uri.to_string()).into());
    } else {
        open_local(Path::new(uri))?
    };
    Ok(rewind_open(input))
}

/// Open a local file.
pub fn open_local(path: &Path) -> Result<InputStreamPtr> {
    Ok(Box::new(FileInputStream::open(path)?))
}

/// Wrap non-seekable streams so the start can be re-read.
///
/// Seekable streams are returned unchanged.
pub fn rewind_open(input: InputStreamPtr) -> InputStreamPtr {
    debug_assert_eq!(input.offset(), 0);
    if input.is_seekable() {
        return input;
    }
    Box::new(RewindInputStream::new(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn open_uri_accepts_paths_and_file_uris() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let path = tmp.path().to_str().unwrap().to_string();

        let a = open_uri(&path).unwrap();
        assert_eq!(a.size(), Some(3));
        let b = open_uri(&format!("file://{path}")).unwrap();
        assert!(b.is_seekable());
    }

    #[test]
    fn open_uri_rejects_remote_schemes() {
        let err = open_uri("http://example.com/stream.mp3").err().unwrap();
        assert!(matches!(
            DecoderError::from(err),
            DecoderError::UnsupportedUri(_)
        ));
    }

    #[test]
    fn rewind_open_keeps_seekable_streams() {
        let input = rewind_open(Box::new(MemoryInputStream::new("mem://a", vec![1, 2, 3])));
        assert!(input.is_seekable());

        let input = rewind_open(Box::new(
            MemoryInputStream::new("mem://b", vec![1, 2, 3]).non_seekable(),
        ));
        assert!(!input.is_seekable());
        assert_eq!(input.uri(), "mem://b");
    }
}
