//! Request and response descriptors passed through the breaker.

use std::time::Duration;

use url::Url;

/// An outbound request, as seen by matchers, plugins and the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, upper case.
    pub method: String,
    /// Target URL.
    pub url: Url,
    /// Request headers in send order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl Request {
    /// Creates a request with no headers or body.
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Parses `url` and creates a GET request for it.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new("GET", Url::parse(url)?))
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// A completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
    /// Wall-clock time the transport took. Set by the breaker on requests
    /// it counted, so plugins and callers see it.
    pub duration: Option<Duration>,
}

impl Response {
    /// Creates a response with the given status and no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            duration: None,
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Duration in whole milliseconds, if timed.
    pub fn duration_millis(&self) -> Option<u128> {
        self.duration.map(|d| d.as_millis())
    }

    /// 5xx responses are failures of the service.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Body as UTF-8, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
