use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, SogError};

/// Builds an in-memory zip archive.
pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self { zip: ZipWriter::new(Cursor::new(Vec::new())) }
    }

    /// Adds an entry. Images are already compressed and are stored as-is.
    pub fn add(&mut self, name: &str, bytes: &[u8], deflate: bool) -> Result<()> {
        let method = if deflate { CompressionMethod::Deflated } else { CompressionMethod::Stored };
        let options = SimpleFileOptions::default().compression_method(method);
        self.zip.start_file(name, options).map_err(|e| SogError::io(name, e))?;
        self.zip.write_all(bytes).map_err(|e| SogError::io(name, e))?;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let cursor = self.zip.finish().map_err(|e| SogError::io("archive", e))?;
        Ok(cursor.into_inner())
    }
}

/// Random-access reader over a zip archive.
pub struct ArchiveReader<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn open(reader: R) -> Result<Self> {
        let zip = ZipArchive::new(reader).map_err(|e| SogError::io("archive", e))?;
        Ok(Self { zip })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.zip.file_names().map(|name| name.to_string()).collect()
    }

    /// Reads a whole entry. A missing entry is a format error.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut file = match self.zip.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(SogError::format(name, "missing archive entry"));
            }
            Err(e) => return Err(SogError::io(name, e)),
        };
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes).map_err(|e| SogError::io(name, e))?;
        Ok(bytes)
    }
}

/// Copies a non-seekable stream into an anonymous temporary file, which the
/// OS removes once the returned handle is dropped.
pub fn spool_to_tempfile<R: Read>(mut reader: R) -> Result<File> {
    let mut file = tempfile::tempfile().map_err(|e| SogError::io("tempfile", e))?;
    std::io::copy(&mut reader, &mut file).map_err(|e| SogError::io("tempfile", e))?;
    file.seek(SeekFrom::Start(0)).map_err(|e| SogError::io("tempfile", e))?;
    Ok(file)
}
