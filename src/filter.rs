use http::header::{HeaderName, HeaderValue};

use crate::Result;
use crate::request::Request;
use crate::util::{parse_header_name, parse_header_value};

/// Transforms a request before every send attempt.
///
/// Filters run in declaration order on a copy of the command's current
/// request, so they must be deterministic: the same input yields the same
/// output on every attempt. A failure whose source chain holds an
/// `io::Error` is offered to the I/O retry handler; anything else ends the
/// command.
pub trait RequestFilter: Send + Sync {
    fn filter(&self, request: Request) -> Result<Request>;

    /// Label for failures this filter returns that are not already
    /// [`Error::Filter`](crate::Error::Filter).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> RequestFilter for F
where
    F: Fn(Request) -> Result<Request> + Send + Sync,
{
    fn filter(&self, request: Request) -> Result<Request> {
        self(request)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeaderMode {
    Append,
    Replace,
    IfAbsent,
}

/// Sets one header on every attempt, e.g. a session token.
#[derive(Clone, Debug)]
pub struct HeaderFilter {
    name: HeaderName,
    value: HeaderValue,
    mode: HeaderMode,
}

impl HeaderFilter {
    pub fn replacing(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            mode: HeaderMode::Replace,
        }
    }

    pub fn appending(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            mode: HeaderMode::Append,
        }
    }

    pub fn if_absent(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            mode: HeaderMode::IfAbsent,
        }
    }

    pub fn try_replacing(name: &str, value: &str) -> Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(Self::replacing(header_name, header_value))
    }
}

impl RequestFilter for HeaderFilter {
    fn filter(&self, request: Request) -> Result<Request> {
        let request = match self.mode {
            HeaderMode::Append => request.with_header(self.name.clone(), self.value.clone()),
            HeaderMode::Replace => {
                request.with_replaced_header(self.name.clone(), self.value.clone())
            }
            HeaderMode::IfAbsent if request.headers().contains_key(&self.name) => request,
            HeaderMode::IfAbsent => request.with_header(self.name.clone(), self.value.clone()),
        };
        Ok(request)
    }

    fn name(&self) -> &str {
        "header"
    }
}
