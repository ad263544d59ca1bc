//! Buffered response writer.
//!
//! Handlers never build a response value and return it. They write into the
//! [`ResponseWriter`] held by their [`Context`](crate::Context), the same way
//! a middleware that answers from a cache writes and then declines to call
//! `next(true)`. The dispatcher turns whatever was written into the hyper
//! response once the chain is done.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseWriter::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The per-request response under construction.
///
/// ```rust
/// use waypoint::{ContentType, ResponseWriter};
/// use http::StatusCode;
///
/// let mut w = ResponseWriter::new();
/// w.write_header(StatusCode::CREATED);
/// w.bytes(ContentType::Xml, b"<ok/>".to_vec());
/// assert_eq!(w.status(), StatusCode::CREATED);
/// ```
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    /// Status implied by a body write without `write_header`. 200, except
    /// inside failure handlers.
    implied: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer whose implicit status is `status` instead of 200.
    pub(crate) fn implying(status: StatusCode) -> Self {
        Self { implied: status, ..Self::default() }
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// The status that will be sent: the written one, or the implicit one
    /// (200 outside failure handlers).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(self.implied)
    }

    /// Whether a status line has been written.
    pub fn is_written(&self) -> bool {
        self.status.is_some()
    }

    /// Sets (replaces) a header. Invalid header values are dropped with a
    /// warning rather than failing the request.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => warn!(header = %name, "dropping invalid header value"),
        }
    }

    /// Writes the status line. Only the first call has an effect.
    pub fn write_header(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(prev) => warn!(
                previous = prev.as_u16(),
                ignored = status.as_u16(),
                "superfluous write_header call"
            ),
        }
    }

    /// Appends to the body, writing the implicit status first if none was
    /// written.
    pub fn write(&mut self, data: &[u8]) {
        if self.status.is_none() {
            self.status = Some(self.implied);
        }
        self.body.extend_from_slice(data);
    }

    /// Writes a `text/plain; charset=utf-8` body.
    pub fn text(&mut self, body: impl AsRef<str>) {
        self.bytes(ContentType::Text, body.as_ref().as_bytes().to_vec());
    }

    /// Writes an `application/json` body. Pass bytes from your serialiser.
    pub fn json(&mut self, body: Vec<u8>) {
        self.bytes(ContentType::Json, body);
    }

    /// Writes a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(&mut self, content_type: ContentType, body: Vec<u8>) {
        self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        self.write(&body);
    }

    pub(crate) fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(Bytes::from(self.body)));
        *res.status_mut() = self.status.unwrap_or(self.implied);
        *res.headers_mut() = self.headers;
        res
    }

    /// Builds a response with the given status and no body, unless
    /// something has already been written.
    pub(crate) fn into_response_or(mut self, status: StatusCode) -> http::Response<Full<Bytes>> {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.into_response()
    }
}
