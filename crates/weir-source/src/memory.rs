//! An in-memory [`DataSource`] for tests and local playback.

use weir_error::Result;
use weir_types::SourceFlags;

use crate::traits::DataSource;

/// A byte source backed by a memory buffer.
///
/// Always available, never fails, reads short only at the end of the
/// buffer. Cloning shares nothing; the data is owned per instance.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    flags: SourceFlags,
    uri: Option<String>,
    mime_type: Option<String>,
}

impl MemorySource {
    /// Create a source over `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            flags: SourceFlags::empty(),
            uri: None,
            mime_type: None,
        }
    }

    /// Create a source of `len` bytes with a deterministic pattern, so
    /// tests can verify read-through equivalence byte-for-byte.
    #[must_use]
    pub fn patterned(len: usize) -> Self {
        let data = (0..len)
            .map(|i| u8::try_from(i % 251).expect("remainder fits in u8"))
            .collect();
        Self::new(data)
    }

    /// Override the reported capability flags.
    #[must_use]
    pub fn with_flags(mut self, flags: SourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the reported URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the reported MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

impl DataSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = usize::try_from(offset).expect("offset < data len, fits usize");
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn flags(&self) -> SourceFlags {
        self.flags
    }

    fn uri(&self) -> Option<String> {
        self.uri.clone()
    }

    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }
}
