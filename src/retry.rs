use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HOST, HeaderName};
use http::{Method, StatusCode};
use rand::RngExt;
use tracing::{debug, warn};

use crate::command::Command;
use crate::content::is_content_header;
use crate::error::Error;
use crate::request::Response;
use crate::util::{
    is_redirect_status, redact_uri_for_logs, redirect_location, redirect_method,
    resolve_redirect_uri, same_origin, sanitize_headers_for_redirect,
};

/// Decides whether a response with status >= 300 should be sent again.
///
/// Handlers may rewrite the command's current request before returning
/// `true`, which is how redirects and credential refreshes work.
pub trait RetryHandler: Send + Sync {
    fn should_retry_request(&self, command: &mut Command, response: &Response) -> bool;
}

/// Decides whether an I/O failure during an attempt should be retried.
pub trait IoRetryHandler: Send + Sync {
    fn should_retry_request(&self, command: &mut Command, error: &io::Error) -> bool;
}

/// Classifies a failure response. Storing a failure on the command makes it
/// terminal unless the retry handler asks for another attempt.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, command: &mut Command, response: &mut Response);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryReason {
    Status(StatusCode),
    Io(io::ErrorKind),
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Response),
    Retry(RetryReason),
    Fatal(Error),
}

#[derive(Clone)]
pub struct RetryCoordinator {
    retry_handler: Arc<dyn RetryHandler>,
    io_retry_handler: Arc<dyn IoRetryHandler>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("RetryCoordinator").finish_non_exhaustive()
    }
}

impl RetryCoordinator {
    pub fn new(
        retry_handler: Arc<dyn RetryHandler>,
        io_retry_handler: Arc<dyn IoRetryHandler>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            retry_handler,
            io_retry_handler,
            error_handler,
        }
    }

    /// Classifies a response that came back from the transport.
    ///
    /// With `retries_allowed` false the retry handler is not consulted.
    pub fn on_response(
        &self,
        command: &mut Command,
        mut response: Response,
        retries_allowed: bool,
    ) -> AttemptOutcome {
        let status = response.status();
        if status.as_u16() < 300 {
            return AttemptOutcome::Success(response);
        }

        self.error_handler.handle_error(command, &mut response);
        if retries_allowed && self.retry_handler.should_retry_request(command, &response) {
            if let Some(discarded) = command.take_failure() {
                debug!(command_id = command.id(), error = %discarded, "dropping failure before retry");
            }
            return AttemptOutcome::Retry(RetryReason::Status(status));
        }

        match command.take_failure() {
            Some(failure) => AttemptOutcome::Fatal(failure),
            None => AttemptOutcome::Success(response),
        }
    }

    /// Classifies a failure raised by a filter, validation, conversion or the
    /// transport. Only failures with an I/O cause are offered for retry.
    ///
    /// An I/O failure on the last allowed attempt of a command that was
    /// already retried ends as [`Error::RetryLimitExceeded`]; every other
    /// terminal failure is wrapped as [`Error::Response`].
    pub fn on_failure(
        &self,
        command: &mut Command,
        error: Error,
        retries_allowed: bool,
    ) -> AttemptOutcome {
        let request_line = command.current_request().request_line();
        if let Some(cause) = error.io_cause() {
            if retries_allowed {
                if self.io_retry_handler.should_retry_request(command, cause) {
                    return AttemptOutcome::Retry(RetryReason::Io(cause.kind()));
                }
            } else if command.attempts() > 1 {
                return AttemptOutcome::Fatal(Error::RetryLimitExceeded {
                    attempts: command.attempts(),
                    request_line,
                    source: Box::new(error),
                });
            }
        }
        AttemptOutcome::Fatal(error.into_response_error(request_line))
    }
}

/// Never asks for another attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverRetry;

impl RetryHandler for NeverRetry {
    fn should_retry_request(&self, _command: &mut Command, _response: &Response) -> bool {
        false
    }
}

impl IoRetryHandler for NeverRetry {
    fn should_retry_request(&self, _command: &mut Command, _error: &io::Error) -> bool {
        false
    }
}

/// Retries replayable commands a bounded number of times, sleeping with
/// exponential backoff between attempts.
#[derive(Clone, Debug)]
pub struct BackoffLimitedRetryHandler {
    retry_count_limit: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
    retryable_io_kinds: Vec<io::ErrorKind>,
}

impl Default for BackoffLimitedRetryHandler {
    fn default() -> Self {
        Self {
            retry_count_limit: 5,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            jitter_ratio: 0.2,
            retryable_status_codes: default_retryable_status_codes(),
            retryable_io_kinds: default_retryable_io_kinds(),
        }
    }
}

impl BackoffLimitedRetryHandler {
    pub fn retry_count_limit(mut self, retry_count_limit: usize) -> Self {
        self.retry_count_limit = retry_count_limit;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn retryable_io_kinds(mut self, kinds: impl IntoIterator<Item = io::ErrorKind>) -> Self {
        self.retryable_io_kinds = kinds.into_iter().collect();
        self
    }

    fn increment_and_sleep(&self, command: &mut Command, cause: &str) -> bool {
        let failures = command.increment_failure_count();
        if !command.is_replayable() {
            warn!(
                command_id = command.id(),
                cause, "cannot retry after failure, command is not replayable"
            );
            return false;
        }
        if failures > self.retry_count_limit {
            warn!(
                command_id = command.id(),
                failures,
                limit = self.retry_count_limit,
                cause,
                "cannot retry after failure, retry limit reached"
            );
            return false;
        }
        let delay = self.backoff_for_retry(failures);
        debug!(
            command_id = command.id(),
            failures,
            delay_ms = delay.as_millis() as u64,
            cause,
            "backing off before retry"
        );
        std::thread::sleep(delay);
        true
    }

    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl RetryHandler for BackoffLimitedRetryHandler {
    fn should_retry_request(&self, command: &mut Command, response: &Response) -> bool {
        if !self
            .retryable_status_codes
            .contains(&response.status().as_u16())
        {
            return false;
        }
        self.increment_and_sleep(command, response.status().as_str())
    }
}

impl IoRetryHandler for BackoffLimitedRetryHandler {
    fn should_retry_request(&self, command: &mut Command, error: &io::Error) -> bool {
        if !self.retryable_io_kinds.contains(&error.kind()) {
            return false;
        }
        self.increment_and_sleep(command, &error.kind().to_string())
    }
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [429_u16, 500, 502, 503, 504].into_iter().collect()
}

fn default_retryable_io_kinds() -> Vec<io::ErrorKind> {
    vec![
        io::ErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted,
        io::ErrorKind::NotConnected,
        io::ErrorKind::BrokenPipe,
        io::ErrorKind::TimedOut,
        io::ErrorKind::UnexpectedEof,
        io::ErrorKind::Interrupted,
    ]
}

/// Follows `Location` on 301, 302, 303, 307 and 308 by rewriting the
/// command's current request.
#[derive(Clone, Copy, Debug)]
pub struct RedirectionRetryHandler {
    max_redirects: usize,
}

impl Default for RedirectionRetryHandler {
    fn default() -> Self {
        Self { max_redirects: 5 }
    }
}

impl RedirectionRetryHandler {
    pub fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }
}

impl RetryHandler for RedirectionRetryHandler {
    fn should_retry_request(&self, command: &mut Command, response: &Response) -> bool {
        let status = response.status();
        if !is_redirect_status(status) {
            return false;
        }
        let Some(location) = redirect_location(response.headers()) else {
            debug!(command_id = command.id(), %status, "redirect without location");
            return false;
        };
        if command.redirect_count() >= self.max_redirects {
            warn!(
                command_id = command.id(),
                max_redirects = self.max_redirects,
                "redirect limit reached"
            );
            return false;
        }

        let current = command.current_request();
        let Some(next_uri) = resolve_redirect_uri(current.uri(), &location) else {
            warn!(command_id = command.id(), %location, "unresolvable redirect location");
            return false;
        };
        let next_method = redirect_method(current.method(), status);
        let drops_payload = next_method == Method::GET && *current.method() != Method::GET;
        if !drops_payload && !current.is_replayable() {
            warn!(
                command_id = command.id(),
                "cannot follow redirect, payload is not replayable"
            );
            return false;
        }

        let same_origin_redirect = same_origin(current.uri(), &next_uri);
        let mut next = current.clone().with_method(next_method).with_uri(next_uri);
        let headers = next.headers_mut();
        headers.remove(HOST);
        sanitize_headers_for_redirect(headers, same_origin_redirect);
        if drops_payload {
            let content_headers: Vec<HeaderName> = headers
                .keys()
                .filter(|name| is_content_header(name))
                .cloned()
                .collect();
            for name in content_headers {
                headers.remove(name);
            }
            next = next.with_payload(None);
        }

        let redirects = command.increment_redirect_count();
        debug!(
            command_id = command.id(),
            redirects,
            %status,
            location = %redact_uri_for_logs(&next.uri().to_string()),
            "following redirect"
        );
        command.set_current_request(next);
        true
    }
}

/// Routes by status class: 3xx to redirection, 4xx to the client-error
/// handler and 5xx to the server-error handler.
#[derive(Clone)]
pub struct DelegatingRetryHandler {
    redirection: Arc<dyn RetryHandler>,
    client_error: Arc<dyn RetryHandler>,
    server_error: Arc<dyn RetryHandler>,
}

impl Default for DelegatingRetryHandler {
    fn default() -> Self {
        Self {
            redirection: Arc::new(RedirectionRetryHandler::default()),
            client_error: Arc::new(NeverRetry),
            server_error: Arc::new(BackoffLimitedRetryHandler::default()),
        }
    }
}

impl DelegatingRetryHandler {
    pub fn redirection(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.redirection = handler;
        self
    }

    pub fn client_error(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.client_error = handler;
        self
    }

    pub fn server_error(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.server_error = handler;
        self
    }
}

impl RetryHandler for DelegatingRetryHandler {
    fn should_retry_request(&self, command: &mut Command, response: &Response) -> bool {
        let status = response.status();
        if status.is_redirection() {
            self.redirection.should_retry_request(command, response)
        } else if status.is_client_error() {
            self.client_error.should_retry_request(command, response)
        } else if status.is_server_error() {
            self.server_error.should_retry_request(command, response)
        } else {
            false
        }
    }
}

/// Records the failure status and leaves the command untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, command: &mut Command, response: &mut Response) {
        debug!(
            command_id = command.id(),
            status_line = %response.status_line(),
            request_line = %redact_uri_for_logs(&command.current_request().uri().to_string()),
            "failure response"
        );
    }
}

/// Turns 4xx and 5xx responses into [`Error::HttpStatus`] unless a retry
/// follows.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusErrorHandler;

impl ErrorHandler for StatusErrorHandler {
    fn handle_error(&self, command: &mut Command, response: &mut Response) {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let request_line = command.current_request().request_line();
            command.set_failure(Error::HttpStatus {
                status: status.as_u16(),
                request_line,
            });
        }
    }
}
