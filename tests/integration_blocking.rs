use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use httpcmd::prelude::{
    BackoffLimitedRetryHandler, Command, CommandExecutor, DelegatingRetryHandler, ErrorCode,
    ExecutorConfig, HeaderFilter, Request,
};
use httpcmd::{
    DEFAULT_USER_AGENT, Disk, HardwareCustomization, Reference, SourcedVmInstantiationParams,
    XmlParams,
};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
        }
    }

    fn empty(status: u16) -> Self {
        Self::new(status, Vec::<(String, String)>::new(), Vec::new())
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, Vec<String>>,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers
                .entry(name.trim().to_ascii_lowercase())
                .or_default()
                .push(value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|values| values.first())
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        302 => "Found",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn fast_backoff() -> BackoffLimitedRetryHandler {
    BackoffLimitedRetryHandler::default()
        .base_backoff(Duration::from_millis(5))
        .max_backoff(Duration::from_millis(10))
        .jitter_ratio(0.0)
}

fn executor() -> CommandExecutor {
    CommandExecutor::builder()
        .config(
            ExecutorConfig::default()
                .with_request_timeout(Duration::from_secs(2))
                .with_connect_timeout(Duration::from_millis(500)),
        )
        .retry_handler(Arc::new(
            DelegatingRetryHandler::default().server_error(Arc::new(fast_backoff())),
        ))
        .io_retry_handler(Arc::new(fast_backoff().retry_count_limit(1)))
        .build()
        .expect("executor should build")
}

#[test]
fn get_returns_body_and_sends_default_headers_once() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/vnd.vmware.vcloud.org+xml")],
        b"<Org name=\"acme\"/>".to_vec(),
    )]);

    let response = executor()
        .execute(Request::get(server.url("/api/org/1")).build().expect("request"))
        .expect("get should succeed");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().expect("read body"), "<Org name=\"acme\"/>");
    assert_eq!(
        response
            .payload()
            .and_then(|payload| payload.metadata().content_type()),
        Some("application/vnd.vmware.vcloud.org+xml")
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/org/1");
    assert_eq!(requests[0].headers.get("accept").map(Vec::len), Some(1));
    assert_eq!(requests[0].header("accept"), Some("*/*"));
    assert_eq!(requests[0].header("user-agent"), Some(DEFAULT_USER_AGENT));
}

#[test]
fn service_unavailable_is_retried_then_succeeds() {
    let server = MockServer::start(vec![
        MockResponse::empty(503),
        MockResponse::new(200, vec![("Content-Type", "text/plain")], b"ready".to_vec()),
    ]);
    let mut command = Command::new(
        Request::get(server.url("/api/task/7"))
            .filter(Arc::new(
                HeaderFilter::try_replacing("x-vcloud-authorization", "session-1")
                    .expect("filter"),
            ))
            .build()
            .expect("request"),
    );

    let response = executor()
        .invoke(&mut command)
        .expect("second attempt succeeds");

    assert_eq!(response.text().expect("read body"), "ready");
    assert_eq!(command.attempts(), 2);
    assert_eq!(server.served_count(), 2);
    for request in server.requests() {
        assert_eq!(
            request.headers.get("x-vcloud-authorization"),
            Some(&vec!["session-1".to_owned()])
        );
    }
}

#[test]
fn no_content_response_has_no_payload() {
    let server = MockServer::start(vec![MockResponse::empty(204)]);

    let response = executor()
        .execute(
            Request::delete(server.url("/api/disk/9"))
                .build()
                .expect("request"),
        )
        .expect("delete should succeed");

    assert_eq!(response.status().as_u16(), 204);
    assert!(response.payload().is_none());
}

const RECOMPOSE_MEDIA_TYPE: &str = "application/vnd.vmware.vcloud.recomposeVAppParams+xml";

#[test]
fn post_streams_serialized_params() {
    let server = MockServer::start(vec![MockResponse::empty(202)]);
    let params = SourcedVmInstantiationParams::builder()
        .source(Reference::new("https://vcd.example.com/api/vAppTemplate/vm-1"))
        .hardware_customization(HardwareCustomization::new(Disk::new(
            Some("2000".to_owned()),
            4096,
        )))
        .build()
        .expect("params");
    let expected = params.to_xml().expect("encode params").into_bytes();
    let payload = params
        .to_payload(RECOMPOSE_MEDIA_TYPE)
        .expect("params payload");

    let response = executor()
        .execute(
            Request::post(server.url("/api/vApp/vapp-1/action/recomposeVApp"))
                .payload(payload)
                .build()
                .expect("request"),
        )
        .expect("post should succeed");

    assert_eq!(response.status().as_u16(), 202);
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].header("content-type"),
        Some(RECOMPOSE_MEDIA_TYPE)
    );
    let expected_length = expected.len().to_string();
    assert_eq!(
        requests[0].header("content-length"),
        Some(expected_length.as_str())
    );
    assert_eq!(requests[0].body, expected);
    let sent = String::from_utf8(requests[0].body.clone()).expect("utf-8 body");
    assert!(sent.contains(r#"<Disk instanceId="2000"><Size>4096</Size></Disk>"#));
    assert_eq!(
        SourcedVmInstantiationParams::from_xml(&sent).expect("decode sent params"),
        params
    );
}

#[test]
fn redirect_is_followed_to_location() {
    let server = MockServer::start(vec![
        MockResponse::new(302, vec![("Location", "/api/org/2")], Vec::new()),
        MockResponse::new(200, vec![("Content-Type", "text/plain")], b"moved".to_vec()),
    ]);
    let mut command = Command::new(
        Request::get(server.url("/api/org/1"))
            .build()
            .expect("request"),
    );

    let response = executor().invoke(&mut command).expect("redirect followed");

    assert_eq!(response.text().expect("read body"), "moved");
    assert_eq!(command.redirect_count(), 1);
    let paths: Vec<_> = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect();
    assert_eq!(paths, ["/api/org/1", "/api/org/2"]);
}

#[test]
fn failure_status_without_retry_is_returned_as_response() {
    let server = MockServer::start(vec![MockResponse::new(
        404,
        vec![("Content-Type", "application/xml")],
        b"<Error minorErrorCode=\"RESOURCE_NOT_FOUND\"/>".to_vec(),
    )]);

    let response = executor()
        .execute(
            Request::get(server.url("/api/vApp/missing"))
                .build()
                .expect("request"),
        )
        .expect("404 comes back as a response");

    assert_eq!(response.status().as_u16(), 404);
    assert!(
        response
            .text()
            .expect("read body")
            .contains("RESOURCE_NOT_FOUND")
    );
    assert_eq!(server.served_count(), 1);
}

#[test]
fn refused_connection_is_retried_then_reported_with_io_cause() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let address = listener.local_addr().expect("read local address");
    drop(listener);

    let error = executor()
        .execute(
            Request::get(format!("http://{address}/api/org"))
                .build()
                .expect("request"),
        )
        .expect_err("nothing listens on the port");

    assert_eq!(error.code(), ErrorCode::Response);
    assert_eq!(error.root().code(), ErrorCode::Transport);
    assert!(error.io_cause().is_some());
}
