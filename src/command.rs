use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::request::Request;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Per-call state carried across every attempt of one execution.
///
/// Retry handlers may replace the current request (redirects, refreshed
/// credentials) and error handlers may store a terminal failure.
#[derive(Debug)]
pub struct Command {
    id: u64,
    current_request: Request,
    failure: Option<Error>,
    attempts: usize,
    failure_count: usize,
    redirect_count: usize,
}

impl Command {
    pub fn new(request: Request) -> Self {
        Self {
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
            current_request: request,
            failure: None,
            attempts: 0,
            failure_count: 0,
            redirect_count: 0,
        }
    }

    /// Process-unique identifier, stable for the lifetime of the command.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn current_request(&self) -> &Request {
        &self.current_request
    }

    pub fn set_current_request(&mut self, request: Request) {
        self.current_request = request;
    }

    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn set_failure(&mut self, failure: Error) {
        self.failure = Some(failure);
    }

    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// Attempts started so far, including the one in flight.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub(crate) fn begin_attempt(&mut self) -> usize {
        self.attempts += 1;
        self.attempts
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn increment_failure_count(&mut self) -> usize {
        self.failure_count += 1;
        self.failure_count
    }

    pub fn redirect_count(&self) -> usize {
        self.redirect_count
    }

    pub fn increment_redirect_count(&mut self) -> usize {
        self.redirect_count += 1;
        self.redirect_count
    }

    pub fn is_replayable(&self) -> bool {
        self.current_request.is_replayable()
    }
}
