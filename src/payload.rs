use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::content::ContentMetadata;
use crate::util::lock_unpoisoned;

pub type PayloadStream = Box<dyn Read + Send>;

/// Origin of payload bytes. Opening is side-effecting; dropping the returned
/// stream releases whatever the source holds for it.
pub trait PayloadSource: Send + Sync {
    fn open(&self) -> io::Result<PayloadStream>;

    fn is_repeatable(&self) -> bool;
}

struct BytesSource(Bytes);

impl PayloadSource for BytesSource {
    fn open(&self) -> io::Result<PayloadStream> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }

    fn is_repeatable(&self) -> bool {
        true
    }
}

struct ReaderSource(Mutex<Option<PayloadStream>>);

impl PayloadSource for ReaderSource {
    fn open(&self) -> io::Result<PayloadStream> {
        lock_unpoisoned(&self.0)
            .take()
            .ok_or_else(|| io::Error::other("payload stream was already opened"))
    }

    fn is_repeatable(&self) -> bool {
        false
    }
}

struct FileSource(PathBuf);

impl PayloadSource for FileSource {
    fn open(&self) -> io::Result<PayloadStream> {
        Ok(Box::new(File::open(&self.0)?))
    }

    fn is_repeatable(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct Payload {
    source: Arc<dyn PayloadSource>,
    metadata: ContentMetadata,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Payload")
            .field("repeatable", &self.source.is_repeatable())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Payload {
    pub fn new(source: Arc<dyn PayloadSource>, metadata: ContentMetadata) -> Self {
        Self { source, metadata }
    }

    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let metadata = ContentMetadata::new()
            .with_length(body.len() as u64)
            .with_content_type("application/octet-stream");
        Self::new(Arc::new(BytesSource(body)), metadata)
    }

    pub fn from_static(body: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(body))
    }

    pub fn from_string(body: impl Into<String>) -> Self {
        Self::from_bytes(body.into()).with_content_type("text/plain; charset=utf-8")
    }

    /// Single-reader payload; the length stays unknown until set explicitly.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::new(
            Arc::new(ReaderSource(Mutex::new(Some(Box::new(reader))))),
            ContentMetadata::new(),
        )
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let length = std::fs::metadata(path)?.len();
        let metadata = ContentMetadata::new()
            .with_length(length)
            .with_content_type("application/octet-stream");
        Ok(Self::new(Arc::new(FileSource(path.to_owned())), metadata))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_content_type(content_type);
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.metadata = self.metadata.with_length(length);
        self
    }

    pub fn metadata(&self) -> &ContentMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ContentMetadata {
        &mut self.metadata
    }

    pub fn is_repeatable(&self) -> bool {
        self.source.is_repeatable()
    }

    pub fn open_stream(&self) -> io::Result<PayloadStream> {
        self.source.open()
    }

    pub fn read_to_bytes(&self) -> io::Result<Bytes> {
        let mut stream = self.open_stream()?;
        let mut collected = Vec::new();
        stream.read_to_end(&mut collected)?;
        Ok(Bytes::from(collected))
    }

    pub fn text(&self) -> io::Result<String> {
        let bytes = self.read_to_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drains a single-reader payload into memory so it can be read again.
    /// Repeatable payloads are returned as-is.
    pub(crate) fn into_repeatable(self) -> io::Result<Self> {
        if self.is_repeatable() {
            return Ok(self);
        }
        let body = self.read_to_bytes()?;
        Ok(Self::new(Arc::new(BytesSource(body)), self.metadata))
    }

    pub(crate) fn map_source<F>(self, wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn PayloadSource>) -> Arc<dyn PayloadSource>,
    {
        Self {
            source: wrap(self.source),
            metadata: self.metadata,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(body: Bytes) -> Self {
        Self::from_bytes(body)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Self {
        Self::from_bytes(body)
    }
}

impl From<String> for Payload {
    fn from(body: String) -> Self {
        Self::from_string(body)
    }
}

impl From<&'static str> for Payload {
    fn from(body: &'static str) -> Self {
        Self::from_string(body)
    }
}
