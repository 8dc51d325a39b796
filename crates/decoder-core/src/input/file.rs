use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

use super::InputStream;

/// Seekable stream over a local file.
pub struct FileInputStream {
    uri: String,
    file: File,
    offset: u64,
    size: u64,
}

impl FileInputStream {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let meta = file
            .metadata()
            .with_context(|| format!("stat {:?}", path))?;
        anyhow::ensure!(meta.is_file(), "not a regular file: {:?}", path);

        Ok(Self {
            uri: path.to_string_lossy().into_owned(),
            file,
            offset: 0,
            size: meta.len(),
        })
    }
}

impl InputStream for FileInputStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .file
            .read(buf)
            .with_context(|| format!("read {}", self.uri))?;
        self.offset += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("seek {} to {offset}", self.uri))?;
        self.offset = offset;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn is_eof(&self) -> bool {
        self.offset >= self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_and_seeks() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let mut input = FileInputStream::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(input.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(input.offset(), 4);

        input.seek(8).unwrap();
        assert_eq!(input.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert!(input.is_eof());
    }

    #[test]
    fn directories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileInputStream::open(dir.path()).is_err());
    }
}
