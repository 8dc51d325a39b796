use anyhow::{Result, bail};
use decoder_types::Tag;

use super::InputStream;

/// Stream over bytes held in memory.
///
/// Can pretend to be non-seekable to stand in for network streams.
pub struct MemoryInputStream {
    uri: String,
    data: Vec<u8>,
    offset: usize,
    seekable: bool,
    mime_type: Option<String>,
    tag: Option<Tag>,
}

impl MemoryInputStream {
    pub fn new(uri: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            uri: uri.into(),
            data,
            offset: 0,
            seekable: true,
            mime_type: None,
            tag: None,
        }
    }

    pub fn non_seekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Tag returned by the first [`InputStream::read_tag`] call.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }
}

impl InputStream for MemoryInputStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = &self.data[self.offset..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.offset += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if !self.seekable {
            bail!("{} is not seekable", self.uri);
        }
        if offset > self.data.len() as u64 {
            bail!("seek beyond end of {}", self.uri);
        }
        self.offset = offset as usize;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset as u64
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn is_eof(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    fn read_tag(&mut self) -> Option<Tag> {
        self.tag.take()
    }
}
