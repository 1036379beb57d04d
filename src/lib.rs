//! `httpcmd` executes HTTP commands against vCloud-style APIs over a blocking
//! transport, with request filters, pluggable retry handlers and optional
//! wire tracing.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use httpcmd::prelude::{CommandExecutor, ExecutorConfig, HeaderFilter, Request};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = CommandExecutor::builder()
//!         .config(ExecutorConfig::default().with_request_timeout(Duration::from_secs(30)))
//!         .build()?;
//!
//!     let session = HeaderFilter::try_replacing("x-vcloud-authorization", "session-token")?;
//!     let request = Request::get("https://vcd.example.com/api/org")
//!         .header("accept", "application/*+xml;version=5.5")
//!         .filter(Arc::new(session))
//!         .build()?;
//!
//!     let response = executor.execute(request)?;
//!     println!("{} -> {}", response.status_line(), response.text()?);
//!     Ok(())
//! }
//! ```
//!
//! # Retries
//!
//! - Failure statuses go through the retry handler; if it declines, the
//!   response comes back unchanged and callers inspect the status.
//! - Failures whose cause is an `io::Error` go through the I/O retry handler.
//! - `ExecutorConfig::max_attempts` bounds every command regardless of policy.

mod command;
mod config;
mod content;
mod error;
mod executor;
mod filter;
mod params;
mod payload;
mod proxy;
mod request;
mod retry;
mod transport;
mod util;
mod wire;

pub use crate::command::Command;
pub use crate::config::{CallConfig, DEFAULT_MAX_ATTEMPTS, ExecutorConfig};
pub use crate::content::{
    ContentMetadata, ContentMetadataCodec, StandardContentMetadataCodec,
    filter_out_content_headers, is_content_header,
};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::executor::{CommandExecutor, CommandExecutorBuilder};
pub use crate::filter::{HeaderFilter, RequestFilter};
pub use crate::params::{
    Disk, DiskBuilder, HardwareCustomization, HardwareCustomizationBuilder, Reference,
    SourcedVmInstantiationParams, SourcedVmInstantiationParamsBuilder, XmlParams,
};
pub use crate::payload::{Payload, PayloadSource, PayloadStream};
pub use crate::proxy::{
    DirectProxySelector, EnvProxySelector, ProxyConfig, ProxySelector, StaticProxySelector,
};
pub use crate::request::{Request, RequestBuilder, Response};
pub use crate::retry::{
    AttemptOutcome, BackoffLimitedRetryHandler, DelegatingRetryHandler, ErrorHandler,
    IoRetryHandler, LoggingErrorHandler, NeverRetry, RedirectionRetryHandler, RetryCoordinator,
    RetryHandler, RetryReason, StatusErrorHandler,
};
pub use crate::transport::{
    BodyReader, CallBody, DEFAULT_USER_AGENT, NativeBody, NativeCall, ReasonPhrase, StreamingBody,
    Transport, TransportAdapter, UreqTransport,
};
pub use crate::wire::{HttpWire, TracingWire};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BackoffLimitedRetryHandler, Command, CommandExecutor, DelegatingRetryHandler, Error,
        ErrorCode, ExecutorConfig, HeaderFilter, Payload, ProxyConfig, ProxySelector, Request,
        RequestFilter, Response, Result, RetryHandler, StaticProxySelector, XmlParams,
    };
}
