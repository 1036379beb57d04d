use std::io::{self, Read};
use std::sync::Arc;

use tracing::{Level, trace};

use crate::Result;
use crate::payload::{PayloadSource, PayloadStream};
use crate::request::{Request, Response};

const DEFAULT_MAX_LOGGED_BYTES: usize = 4096;

/// Byte-level diagnostics for payloads crossing the wire.
pub trait HttpWire: Send + Sync {
    fn enabled(&self) -> bool;

    /// May replace the request payload, but never changes the bytes sent.
    fn output(&self, request: &mut Request) -> Result<()>;

    fn input(&self, response: &mut Response);
}

/// Logs payload bytes at trace level under the `httpcmd::wire` target.
#[derive(Clone, Copy, Debug)]
pub struct TracingWire {
    max_logged_bytes: usize,
}

impl Default for TracingWire {
    fn default() -> Self {
        Self {
            max_logged_bytes: DEFAULT_MAX_LOGGED_BYTES,
        }
    }
}

impl TracingWire {
    pub fn new(max_logged_bytes: usize) -> Self {
        Self { max_logged_bytes }
    }
}

impl HttpWire for TracingWire {
    fn enabled(&self) -> bool {
        tracing::enabled!(target: "httpcmd::wire", Level::TRACE)
    }

    fn output(&self, request: &mut Request) -> Result<()> {
        let Some(payload) = request.payload_mut() else {
            return Ok(());
        };
        if !payload.is_repeatable() {
            *payload = payload.clone().into_repeatable()?;
        }
        let bytes = payload.read_to_bytes()?;
        log_chunk(">>", &bytes, self.max_logged_bytes);
        Ok(())
    }

    fn input(&self, response: &mut Response) {
        let Some(payload) = response.payload_mut() else {
            return;
        };
        let max_logged_bytes = self.max_logged_bytes;
        *payload = payload.clone().map_source(|inner| {
            Arc::new(TeeSource {
                inner,
                max_logged_bytes,
            })
        });
    }
}

fn log_chunk(direction: &str, bytes: &[u8], max_logged_bytes: usize) {
    let shown = &bytes[..bytes.len().min(max_logged_bytes)];
    let text = String::from_utf8_lossy(shown);
    if shown.len() < bytes.len() {
        trace!(target: "httpcmd::wire", "{direction} {text}... ({} bytes)", bytes.len());
    } else {
        trace!(target: "httpcmd::wire", "{direction} {text}");
    }
}

struct TeeSource {
    inner: Arc<dyn PayloadSource>,
    max_logged_bytes: usize,
}

impl PayloadSource for TeeSource {
    fn open(&self) -> io::Result<PayloadStream> {
        Ok(Box::new(TeeReader {
            inner: self.inner.open()?,
            remaining: self.max_logged_bytes,
        }))
    }

    fn is_repeatable(&self) -> bool {
        self.inner.is_repeatable()
    }
}

struct TeeReader {
    inner: PayloadStream,
    remaining: usize,
}

impl Read for TeeReader {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buffer)?;
        if read > 0 && self.remaining > 0 {
            let shown = read.min(self.remaining);
            log_chunk("<<", &buffer[..shown], shown);
            self.remaining -= shown;
        }
        Ok(read)
    }
}
