use std::sync::Arc;

use bytes::Bytes;
use http::header::{AsHeaderName, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::Result;
use crate::filter::RequestFilter;
use crate::payload::Payload;
use crate::util::{parse_header_name, parse_header_value, parse_uri};

#[derive(Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Option<Payload>,
    filters: Vec<Arc<dyn RequestFilter>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("payload", &self.payload)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl Request {
    pub fn builder(method: Method, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, uri.into())
    }

    pub fn get(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::POST, uri)
    }

    pub fn put(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::PUT, uri)
    }

    pub fn delete(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::DELETE, uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        self.payload.as_mut()
    }

    pub fn filters(&self) -> &[Arc<dyn RequestFilter>] {
        &self.filters
    }

    pub fn first_header<K: AsHeaderName>(&self, name: K) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn request_line(&self) -> String {
        format!("{} {} HTTP/1.1", self.method, self.uri)
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.get_all(TRANSFER_ENCODING).iter().any(|value| {
            value
                .to_str()
                .is_ok_and(|text| text.to_ascii_lowercase().contains("chunked"))
        })
    }

    /// A request can be sent again unless its payload is a single-reader stream.
    pub fn is_replayable(&self) -> bool {
        self.payload
            .as_ref()
            .is_none_or(|payload| payload.is_repeatable())
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Appends a value; existing values for the same name are kept.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_replaced_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn without_header<K: AsHeaderName>(mut self, name: K) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn into_builder(self) -> RequestBuilder {
        RequestBuilder {
            method: self.method,
            uri: self.uri.to_string(),
            headers: self.headers,
            payload: self.payload,
            filters: self.filters,
            error: None,
        }
    }
}

/// Accumulates request fields; header and uri errors surface from `build`.
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    payload: Option<Payload>,
    filters: Vec<Arc<dyn RequestFilter>>,
    error: Option<crate::Error>,
}

impl RequestBuilder {
    fn new(method: Method, uri: String) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            payload: None,
            filters: Vec::new(),
            error: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let parsed = parse_header_name(name)
            .and_then(|header_name| Ok((header_name, parse_header_value(name, value)?)));
        match parsed {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(error) => self.error = Some(error),
        }
        self
    }

    pub fn typed_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters<I>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn RequestFilter>>,
    {
        self.filters.extend(filters);
        self
    }

    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Request {
            method: self.method,
            uri: parse_uri(&self.uri)?,
            headers: self.headers,
            payload: self.payload,
            filters: self.filters,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
    payload: Option<Payload>,
}

impl Response {
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        headers: HeaderMap,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            headers,
            payload,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn first_header<K: AsHeaderName>(&self, name: K) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        self.payload.as_mut()
    }

    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    pub fn status_line(&self) -> String {
        format!("HTTP/1.1 {} {}", self.status.as_u16(), self.message)
    }

    /// Reads the payload to the end; an absent payload reads as empty.
    pub fn bytes(&self) -> Result<Bytes> {
        match &self.payload {
            Some(payload) => Ok(payload.read_to_bytes()?),
            None => Ok(Bytes::new()),
        }
    }

    pub fn text(&self) -> Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
