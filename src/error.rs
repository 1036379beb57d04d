use std::io;

use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl TransportErrorKind {
    pub(crate) fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::NotFound => Self::Dns,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => Self::Connect,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Read,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidNoProxyRule,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    MissingContentLength,
    MissingContentType,
    Filter,
    Transport,
    Io,
    HttpStatus,
    RetryLimitExceeded,
    Response,
    MissingField,
    Config,
    XmlEncode,
    XmlDecode,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidNoProxyRule => "invalid_no_proxy_rule",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::MissingContentLength => "missing_content_length",
            Self::MissingContentType => "missing_content_type",
            Self::Filter => "filter",
            Self::Transport => "transport",
            Self::Io => "io",
            Self::HttpStatus => "http_status",
            Self::RetryLimitExceeded => "retry_limit_exceeded",
            Self::Response => "response",
            Self::MissingField => "missing_field",
            Self::Config => "config",
            Self::XmlEncode => "xml_encode",
            Self::XmlDecode => "xml_decode",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid no_proxy rule: {rule}")]
    InvalidNoProxyRule { rule: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build native http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error(
        "after filtering, the request has neither chunked encoding nor content length: {request_line}"
    )]
    MissingContentLength { request_line: String },
    #[error("payload has a body but no content type: {request_line}")]
    MissingContentType { request_line: String },
    #[error("request filter {filter} failed: {source}")]
    Filter {
        filter: String,
        #[source]
        source: BoxError,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("http status error {status} for {request_line}")]
    HttpStatus { status: u16, request_line: String },
    #[error("gave up after {attempts} attempts connecting to {request_line}: {source}")]
    RetryLimitExceeded {
        attempts: usize,
        request_line: String,
        #[source]
        source: Box<Error>,
    },
    #[error("{message} connecting to {request_line}")]
    Response {
        message: String,
        request_line: String,
        #[source]
        source: Box<Error>,
    },
    #[error("{object} is missing required field {field}")]
    MissingField {
        object: &'static str,
        field: &'static str,
    },
    #[error("invalid executor configuration: {source}")]
    Config {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode parameters as xml: {source}")]
    XmlEncode {
        #[source]
        source: quick_xml::se::SeError,
    },
    #[error("failed to decode xml parameters: {source}")]
    XmlDecode {
        #[source]
        source: quick_xml::de::DeError,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidNoProxyRule { .. } => ErrorCode::InvalidNoProxyRule,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::MissingContentLength { .. } => ErrorCode::MissingContentLength,
            Self::MissingContentType { .. } => ErrorCode::MissingContentType,
            Self::Filter { .. } => ErrorCode::Filter,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Io { .. } => ErrorCode::Io,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::RetryLimitExceeded { .. } => ErrorCode::RetryLimitExceeded,
            Self::Response { .. } => ErrorCode::Response,
            Self::MissingField { .. } => ErrorCode::MissingField,
            Self::Config { .. } => ErrorCode::Config,
            Self::XmlEncode { .. } => ErrorCode::XmlEncode,
            Self::XmlDecode { .. } => ErrorCode::XmlDecode,
        }
    }

    /// Strips terminal `Response` wrappers and returns the failure that ended the command.
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Self::Response { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// First `io::Error` in the source chain, starting with `self`.
    pub fn io_cause(&self) -> Option<&io::Error> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(error) = current {
            if let Some(io_error) = error.downcast_ref::<io::Error>() {
                return Some(io_error);
            }
            current = error.source();
        }
        None
    }

    pub fn filter<E>(filter: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Filter {
            filter: filter.into(),
            source: source.into(),
        }
    }

    pub(crate) fn into_response_error(self, request_line: String) -> Self {
        Self::Response {
            message: self.to_string(),
            request_line,
            source: Box::new(self),
        }
    }
}
