use anyhow::Result;
use decoder_types::Tag;

use super::{InputStream, InputStreamPtr};

/// Bytes kept from the start of the stream.
const REWIND_BUFFER_SIZE: usize = 64 * 1024;

/// Keeps the first [`REWIND_BUFFER_SIZE`] bytes of a non-seekable stream so
/// that seeking back into them (typically to offset 0 after probing) works.
///
/// Buffering stops for good once the input moves past the buffer.
pub struct RewindInputStream {
    input: InputStreamPtr,
    buffer: Box<[u8]>,
    /// Read position inside `buffer` while replaying it.
    head: usize,
    /// Bytes stored in `buffer`; 0 once buffering is disabled.
    tail: usize,
    offset: u64,
}

impl RewindInputStream {
    pub fn new(input: InputStreamPtr) -> Self {
        let offset = input.offset();
        Self {
            input,
            buffer: vec![0u8; REWIND_BUFFER_SIZE].into_boxed_slice(),
            head: 0,
            tail: 0,
            offset,
        }
    }

    fn reading_from_buffer(&self) -> bool {
        self.tail > 0 && self.offset < self.input.offset()
    }
}

impl InputStream for RewindInputStream {
    fn uri(&self) -> &str {
        self.input.uri()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.reading_from_buffer() {
            debug_assert_eq!(self.head as u64, self.offset);
            debug_assert_eq!(self.tail as u64, self.input.offset());

            let n = buf.len().min(self.tail - self.head);
            buf[..n].copy_from_slice(&self.buffer[self.head..self.head + n]);
            self.head += n;
            self.offset += n as u64;
            return Ok(n);
        }

        let n = self.input.read(buf)?;

        if self.input.offset() > REWIND_BUFFER_SIZE as u64 {
            self.tail = 0;
        } else if self.tail as u64 == self.offset {
            self.buffer[self.tail..self.tail + n].copy_from_slice(&buf[..n]);
            self.tail += n;
            debug_assert_eq!(self.tail as u64, self.input.offset());
        }

        self.offset = self.input.offset();
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if self.tail > 0 && offset <= self.tail as u64 {
            self.head = offset as usize;
            self.offset = offset;
            return Ok(());
        }

        // Leaving the buffered range.
        self.tail = 0;
        self.input.seek(offset)?;
        self.offset = self.input.offset();
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> Option<u64> {
        self.input.size()
    }

    fn is_seekable(&self) -> bool {
        self.input.is_seekable()
    }

    fn is_eof(&self) -> bool {
        !self.reading_from_buffer() && self.input.is_eof()
    }

    fn mime_type(&self) -> Option<&str> {
        self.input.mime_type()
    }

    fn read_tag(&mut self) -> Option<Tag> {
        self.input.read_tag()
    }
}
