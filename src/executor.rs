use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::Result;
use crate::command::Command;
use crate::config::ExecutorConfig;
use crate::content::{ContentMetadataCodec, StandardContentMetadataCodec};
use crate::error::{Error, ErrorCode};
use crate::proxy::{DirectProxySelector, ProxySelector};
use crate::request::{Request, Response};
use crate::retry::{
    AttemptOutcome, BackoffLimitedRetryHandler, DelegatingRetryHandler, ErrorHandler,
    IoRetryHandler, LoggingErrorHandler, RetryCoordinator, RetryHandler,
};
use crate::transport::{Transport, TransportAdapter, UreqTransport};
use crate::util::{log_headers, redact_uri_for_logs};
use crate::wire::{HttpWire, TracingWire};

/// Runs commands to completion: filter, send, classify, and retry until a
/// response or a terminal error comes out.
///
/// One executor is meant to be shared; it holds no per-call state.
pub struct CommandExecutor {
    adapter: TransportAdapter,
    coordinator: RetryCoordinator,
    wire: Arc<dyn HttpWire>,
    config: Arc<ExecutorConfig>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CommandExecutor")
            .field("adapter", &self.adapter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    pub fn builder() -> CommandExecutorBuilder {
        CommandExecutorBuilder::new()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute(&self, request: Request) -> Result<Response> {
        let mut command = Command::new(request);
        self.invoke(&mut command)
    }

    /// Yields exactly one response or one terminal error.
    ///
    /// A response with a failure status is returned as-is when no retry is
    /// granted, unless the error handler stored a failure on the command.
    pub fn invoke(&self, command: &mut Command) -> Result<Response> {
        let max_attempts = self.config.max_attempts.max(1);
        loop {
            let attempt = command.begin_attempt();
            let retries_allowed = attempt < max_attempts;
            let span = info_span!(
                "httpcmd.command",
                command_id = command.id(),
                method = %command.current_request().method(),
                uri = %redact_uri_for_logs(&command.current_request().uri().to_string()),
                attempt = attempt,
                max_attempts = max_attempts
            );
            let _enter = span.enter();

            let outcome = match self.attempt(command) {
                Ok(response) => self
                    .coordinator
                    .on_response(command, response, retries_allowed),
                Err(error) => self.coordinator.on_failure(command, error, retries_allowed),
            };

            match outcome {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Retry(reason) => {
                    warn!(
                        attempt,
                        max_attempts,
                        reason = ?reason,
                        "retrying command"
                    );
                }
                AttemptOutcome::Fatal(error) => {
                    if error.code() == ErrorCode::RetryLimitExceeded {
                        warn!(max_attempts, error = %error, "attempt bound reached");
                    }
                    return Err(error);
                }
            }
        }
    }

    fn attempt(&self, command: &Command) -> Result<Response> {
        let current = command.current_request();
        let mut request = current.clone();
        for filter in current.filters() {
            request = filter.filter(request).map_err(|error| match error {
                Error::Filter { .. } => error,
                other => Error::filter(filter.name(), other),
            })?;
        }
        check_request_has_content_length_or_chunked_encoding(&request)?;

        let wire_enabled = self.config.wire_tracing && self.wire.enabled();
        debug!(
            command_id = command.id(),
            request_line = %redacted_request_line(&request),
            "sending request"
        );
        if wire_enabled {
            self.wire.output(&mut request)?;
        }
        log_headers(">>", request.headers());

        let call = self.adapter.convert(&request)?;
        let mut response = self.adapter.invoke(call)?;

        debug!(
            command_id = command.id(),
            status_line = %response.status_line(),
            "receiving response"
        );
        log_headers("<<", response.headers());
        if wire_enabled && response.payload().is_some() {
            self.wire.input(&mut response);
        }
        Ok(response)
    }
}

fn check_request_has_content_length_or_chunked_encoding(request: &Request) -> Result<()> {
    let Some(payload) = request.payload() else {
        return Ok(());
    };
    if payload.metadata().length().is_some() || request.is_chunked() {
        return Ok(());
    }
    Err(Error::MissingContentLength {
        request_line: request.request_line(),
    })
}

fn redacted_request_line(request: &Request) -> String {
    format!(
        "{} {} HTTP/1.1",
        request.method(),
        redact_uri_for_logs(&request.uri().to_string())
    )
}

pub struct CommandExecutorBuilder {
    config: ExecutorConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Arc<dyn ContentMetadataCodec>,
    proxy_selector: Arc<dyn ProxySelector>,
    retry_handler: Arc<dyn RetryHandler>,
    io_retry_handler: Arc<dyn IoRetryHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    wire: Arc<dyn HttpWire>,
}

impl Default for CommandExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutorBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            transport: None,
            codec: Arc::new(StandardContentMetadataCodec),
            proxy_selector: Arc::new(DirectProxySelector),
            retry_handler: Arc::new(DelegatingRetryHandler::default()),
            io_retry_handler: Arc::new(BackoffLimitedRetryHandler::default()),
            error_handler: Arc::new(LoggingErrorHandler),
            wire: Arc::new(TracingWire::default()),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default `ureq` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn content_metadata_codec(mut self, codec: Arc<dyn ContentMetadataCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn proxy_selector(mut self, proxy_selector: Arc<dyn ProxySelector>) -> Self {
        self.proxy_selector = proxy_selector;
        self
    }

    pub fn retry_handler(mut self, retry_handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = retry_handler;
        self
    }

    pub fn io_retry_handler(mut self, io_retry_handler: Arc<dyn IoRetryHandler>) -> Self {
        self.io_retry_handler = io_retry_handler;
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Only consulted when `wire_tracing` is on in the config.
    pub fn wire(mut self, wire: Arc<dyn HttpWire>) -> Self {
        self.wire = wire;
        self
    }

    pub fn build(self) -> Result<CommandExecutor> {
        let config = Arc::new(self.config);
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(UreqTransport::new(Arc::clone(&config))),
        };
        let adapter = TransportAdapter::new(
            transport,
            self.codec,
            self.proxy_selector,
            Arc::clone(&config),
        )?;
        Ok(CommandExecutor {
            adapter,
            coordinator: RetryCoordinator::new(
                self.retry_handler,
                self.io_retry_handler,
                self.error_handler,
            ),
            wire: self.wire,
            config,
        })
    }
}
