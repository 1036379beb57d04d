use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use http::header::{ACCEPT, HeaderValue, PROXY_AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, StatusCode};
use tracing::error;

use crate::Result;
use crate::config::{CallConfig, ExecutorConfig};
use crate::content::{ContentMetadataCodec, filter_out_content_headers};
use crate::error::{Error, TransportErrorKind};
use crate::payload::{Payload, PayloadStream};
use crate::proxy::{ProxyConfig, ProxySelector};
use crate::request::{Request, Response};
use crate::util::{lock_unpoisoned, parse_header_value, redact_uri_for_logs};

pub const DEFAULT_USER_AGENT: &str = concat!(
    "httpcmd/",
    env!("CARGO_PKG_VERSION"),
    " rust/",
    env!("CARGO_PKG_RUST_VERSION")
);

pub type NativeBody = Box<dyn Read + Send>;

/// A request in the form the transport sends. It is moved into
/// [`TransportAdapter::invoke`], so nothing is left behind to release.
pub type NativeCall = http::Request<CallBody>;

pub enum CallBody {
    Empty,
    Streaming(StreamingBody),
}

impl CallBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl std::fmt::Debug for CallBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Streaming(body) => formatter
                .debug_struct("Streaming")
                .field("content_type", &body.content_type)
                .field("length", &body.length())
                .finish(),
        }
    }
}

/// Payload bytes opened lazily when the transport asks for them.
pub struct StreamingBody {
    payload: Payload,
    content_type: String,
    target: String,
}

impl StreamingBody {
    fn new(payload: Payload, content_type: String, target: String) -> Self {
        Self {
            payload,
            content_type,
            target,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn length(&self) -> Option<u64> {
        self.payload.metadata().length()
    }

    /// Copies the whole payload into `sink`. The payload stream is closed
    /// before returning on every path.
    pub fn write_to(self, sink: &mut dyn Write) -> io::Result<u64> {
        let mut source = self.payload.open_stream()?;
        let copied = io::copy(&mut source, sink);
        drop(source);
        copied.inspect_err(|source| {
            error!(uri = %self.target, error = %source, "error writing bytes to request body");
        })
    }

    /// Opens the payload for pull-based transports. Read failures are logged
    /// with the target uri before they propagate.
    pub fn into_reader(self) -> io::Result<BodyReader> {
        let stream = self.payload.open_stream()?;
        Ok(BodyReader {
            inner: Mutex::new(stream),
            target: self.target,
        })
    }
}

pub struct BodyReader {
    inner: Mutex<PayloadStream>,
    target: String,
}

impl Read for BodyReader {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let stream = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        stream.read(buffer).inspect_err(|source| {
            error!(uri = %self.target, error = %source, "error writing bytes to request body");
        })
    }
}

/// Status-line reason phrase as received. Transports that can read it insert
/// it into the native response's extensions; otherwise the canonical reason
/// for the status code is reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasonPhrase(String);

impl ReasonPhrase {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(phrase.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sends one native call and hands back the raw native response.
pub trait Transport: Send + Sync {
    fn execute(&self, call: NativeCall, config: &CallConfig)
    -> Result<http::Response<NativeBody>>;
}

/// Blocking transport on top of `ureq`. Redirects and status errors are left
/// to the executor.
pub struct UreqTransport {
    config: Arc<ExecutorConfig>,
    direct: ureq::Agent,
    proxied: Mutex<BTreeMap<String, ureq::Agent>>,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("config", &self.config)
            .field("proxied_agents", &lock_unpoisoned(&self.proxied).len())
            .finish()
    }
}

impl UreqTransport {
    pub fn new(config: Arc<ExecutorConfig>) -> Self {
        let direct = make_agent(&config, None);
        Self {
            config,
            direct,
            proxied: Mutex::new(BTreeMap::new()),
        }
    }

    fn agent_for(&self, proxy: Option<&ProxyConfig>) -> Result<ureq::Agent> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let key = proxy.uri().to_string();
        let mut proxied = lock_unpoisoned(&self.proxied);
        if let Some(agent) = proxied.get(&key) {
            return Ok(agent.clone());
        }
        let ureq_proxy =
            ureq::Proxy::new(&key).map_err(|_| Error::InvalidUri { uri: key.clone() })?;
        let agent = make_agent(&self.config, Some(ureq_proxy));
        proxied.insert(key, agent.clone());
        Ok(agent)
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        agent: &ureq::Agent,
        config: &CallConfig,
        request: http::Request<S>,
    ) -> Result<http::Response<ureq::Body>> {
        let method = request.method().clone();
        let uri = redact_uri_for_logs(&request.uri().to_string());
        let mut configured_request = agent
            .configure_request(request)
            .timeout_global(Some(config.request_timeout))
            .timeout_connect(Some(config.connect_timeout))
            .build();

        if let Some(proxy) = &config.proxy
            && let Some(authorization) = proxy.authorization()
        {
            configured_request
                .headers_mut()
                .insert(PROXY_AUTHORIZATION, authorization.clone());
        }

        agent
            .run(configured_request)
            .map_err(|source| Error::Transport {
                kind: classify_ureq_transport_error(&source),
                method,
                uri,
                source: into_io_error(source),
            })
    }
}

impl Transport for UreqTransport {
    fn execute(
        &self,
        call: NativeCall,
        config: &CallConfig,
    ) -> Result<http::Response<NativeBody>> {
        let agent = self.agent_for(config.proxy.as_ref())?;
        let (parts, body) = call.into_parts();
        let response = match body {
            CallBody::Empty => self.run(&agent, config, http::Request::from_parts(parts, ()))?,
            CallBody::Streaming(body) => {
                let reader = body.into_reader()?;
                let request =
                    http::Request::from_parts(parts, ureq::SendBody::from_owned_reader(reader));
                self.run(&agent, config, request)?
            }
        };
        let (parts, body) = response.into_parts();
        let reader: NativeBody = Box::new(body.into_reader());
        Ok(http::Response::from_parts(parts, reader))
    }
}

fn make_agent(config: &ExecutorConfig, proxy: Option<ureq::Proxy>) -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false)
        .max_idle_age(config.pool_idle_timeout)
        .max_idle_connections_per_host(config.pool_max_idle_per_host)
        .max_idle_connections(config.pool_max_idle_connections)
        .proxy(proxy)
        .build()
        .new_agent()
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => TransportErrorKind::from_io_kind(source.kind()),
        _ => TransportErrorKind::Other,
    }
}

/// Keeps the original `io::Error` when ureq wraps one, otherwise maps the
/// failure onto the closest `io::ErrorKind` so I/O retry policies see it.
fn into_io_error(error: ureq::Error) -> io::Error {
    let kind = match error {
        ureq::Error::Io(source) => return source,
        ureq::Error::Timeout(_) => io::ErrorKind::TimedOut,
        ureq::Error::HostNotFound => io::ErrorKind::NotFound,
        ureq::Error::ConnectionFailed | ureq::Error::ConnectProxyFailed(_) => {
            io::ErrorKind::ConnectionRefused
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, error)
}

/// Converts between [`Request`]/[`Response`] and the transport's native
/// call, resolving the proxy for every send.
pub struct TransportAdapter {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn ContentMetadataCodec>,
    proxy_selector: Arc<dyn ProxySelector>,
    config: Arc<ExecutorConfig>,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportAdapter")
            .field("config", &self.config)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl TransportAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn ContentMetadataCodec>,
        proxy_selector: Arc<dyn ProxySelector>,
        config: Arc<ExecutorConfig>,
    ) -> Result<Self> {
        let user_agent = parse_header_value(
            USER_AGENT.as_str(),
            config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT),
        )?;
        Ok(Self {
            transport,
            codec,
            proxy_selector,
            config,
            user_agent,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn convert(&self, request: &Request) -> Result<NativeCall> {
        let mut headers = HeaderMap::with_capacity(request.headers().len() + 4);
        if !request.headers().contains_key(ACCEPT) {
            headers.append(ACCEPT, HeaderValue::from_static("*/*"));
        }
        if !request.headers().contains_key(USER_AGENT) {
            headers.append(USER_AGENT, self.user_agent.clone());
        }
        for (name, value) in request.headers() {
            headers.append(name.clone(), value.clone());
        }

        let body = match request.payload() {
            None => CallBody::Empty,
            Some(payload) => {
                for (name, value) in &self.codec.to_headers(payload.metadata()) {
                    headers.append(name.clone(), value.clone());
                }
                self.body_for(request, payload)?
            }
        };

        let mut call = http::Request::builder()
            .method(request.method().clone())
            .uri(request.uri().clone())
            .body(body)
            .map_err(|source| Error::RequestBuild { source })?;
        *call.headers_mut() = headers;
        Ok(call)
    }

    fn body_for(&self, request: &Request, payload: &Payload) -> Result<CallBody> {
        let attach = match payload.metadata().length() {
            Some(length) => length > 0,
            None if request.is_chunked() => true,
            None => {
                return Err(Error::MissingContentLength {
                    request_line: request.request_line(),
                });
            }
        };
        if !attach {
            return Ok(CallBody::Empty);
        }
        let content_type = payload
            .metadata()
            .content_type()
            .ok_or_else(|| Error::MissingContentType {
                request_line: request.request_line(),
            })?;
        Ok(CallBody::Streaming(StreamingBody::new(
            payload.clone(),
            content_type.to_owned(),
            redact_uri_for_logs(&request.uri().to_string()),
        )))
    }

    pub fn invoke(&self, call: NativeCall) -> Result<Response> {
        let proxy = self.proxy_selector.select(call.uri());
        let call_config = self.config.call_config(proxy);
        let (parts, body) = self.transport.execute(call, &call_config)?.into_parts();

        let status = parts.status;
        let message = match parts.extensions.get::<ReasonPhrase>() {
            Some(reason) => reason.as_str().to_owned(),
            None => status.canonical_reason().unwrap_or_default().to_owned(),
        };
        let payload = if status == StatusCode::NO_CONTENT {
            drop(body);
            None
        } else {
            let mut payload = Payload::from_reader(body);
            self.codec.from_headers(payload.metadata_mut(), &parts.headers);
            Some(payload)
        };

        Ok(Response::new(
            status,
            message,
            filter_out_content_headers(&parts.headers),
            payload,
        ))
    }
}
