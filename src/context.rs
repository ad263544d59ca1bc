//! Per-request context.
//!
//! A [`Context`] is created immediately before a chain runs and dropped once
//! the response has been produced. It is never shared between requests, so
//! nothing in it is synchronised.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use http::header::{self, HeaderName};

use crate::error::{Error, HandlerError};
use crate::event::{Event, EventKind, EventReporter, TraceSource};
use crate::form::{self, BodyError, FormData, FormFile};
use crate::param::{ParamError, ParamValue};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Route parameters in the order the route pattern declares them.
pub type Params = Vec<(String, String)>;

/// Per-request state threaded through the middleware chain.
///
/// # The continuation gate
///
/// Before each middleware runs the dispatcher clears the continuation flag.
/// A middleware that wants the chain to go on must call
/// [`next(true)`](Context::next) before returning `Ok(())`. Returning
/// `Ok(())` without it ends the request quietly with whatever has been
/// written so far.
///
/// # The value store
///
/// [`set_value`](Context::set_value) / [`value`](Context::value) carry
/// request-scoped data between middleware. Values are type-erased; each key
/// has a contract between writer and reader about the stored type, and a
/// reader asking for the wrong type gets `None`.
pub struct Context {
    request: Arc<Request>,
    response: ResponseWriter,
    params: Params,
    store: HashMap<String, Box<dyn Any + Send + Sync>>,
    next: bool,
    form: Option<Result<FormData, BodyError>>,
    event: Option<Event>,
    reporter: Arc<EventReporter>,
    max_form_bytes: usize,
}

impl Context {
    pub(crate) fn new(
        request: Arc<Request>,
        params: Params,
        reporter: Arc<EventReporter>,
        max_form_bytes: usize,
    ) -> Self {
        Self {
            request,
            response: ResponseWriter::new(),
            params,
            store: HashMap::new(),
            next: false,
            form: None,
            event: None,
            reporter,
            max_form_bytes,
        }
    }

    pub(crate) fn with_event(mut self, event: Event) -> Self {
        self.response = ResponseWriter::implying(event.status);
        self.event = Some(event);
        self
    }

    pub(crate) fn into_response(self) -> ResponseWriter {
        self.response
    }

    pub(crate) fn take_params(&mut self) -> Params {
        std::mem::take(&mut self.params)
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn response(&self) -> &ResponseWriter { &self.response }
    pub fn response_mut(&mut self) -> &mut ResponseWriter { &mut self.response }
    pub fn params(&self) -> &[(String, String)] { &self.params }

    /// The failure being handled, inside not-found, method-not-allowed and
    /// server-error handlers. `None` in ordinary chains.
    ///
    /// In a failure handler the response status defaults to the outcome's
    /// (404, 405 or 500): writing a body without
    /// [`write_header`](ResponseWriter::write_header) keeps it.
    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    // ── Continuation ────────────────────────────────────────────────────────

    /// Sets the continuation flag. Middleware must call `next(true)` for the
    /// chain to proceed past it.
    pub fn next(&mut self, flag: bool) {
        self.next = flag;
    }

    pub fn is_next(&self) -> bool {
        self.next
    }

    pub(crate) fn reset_next(&mut self) {
        self.next = false;
    }

    // ── Parameters ──────────────────────────────────────────────────────────

    /// A route parameter. Missing names yield an empty value.
    pub fn route_value(&self, key: &str) -> ParamValue {
        let value = self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        ParamValue::new(key, value.unwrap_or(""))
    }

    /// A URL query parameter. Triggers body parsing on first use; a parse
    /// failure is carried in the returned value's error.
    pub async fn query_value(&mut self, key: &str) -> ParamValue {
        match self.parsed_form().await {
            Ok(form) => ParamValue::new(key, form.query_value(key).unwrap_or("")),
            Err(e) => ParamValue::failed(key, ParamError::Body(e.clone())),
        }
    }

    /// A form field from the body, falling back to the URL query.
    pub async fn form_value(&mut self, key: &str) -> ParamValue {
        match self.parsed_form().await {
            Ok(form) => ParamValue::new(key, form.form_value(key).unwrap_or("")),
            Err(e) => ParamValue::failed(key, ParamError::Body(e.clone())),
        }
    }

    /// An uploaded file from a `multipart/form-data` body.
    pub async fn form_file(&mut self, key: &str) -> Result<Option<&FormFile>, BodyError> {
        match self.parsed_form().await {
            Ok(form) => Ok(form.file(key)),
            Err(e) => Err(e.clone()),
        }
    }

    /// Whether the body has been parsed successfully.
    pub fn body_parsed(&self) -> bool {
        matches!(self.form, Some(Ok(_)))
    }

    async fn parsed_form(&mut self) -> Result<&FormData, &BodyError> {
        let parsed = match self.form.take() {
            Some(parsed) => parsed,
            None => form::parse(&self.request, self.max_form_bytes).await,
        };
        self.form.insert(parsed).as_ref()
    }

    // ── Store ───────────────────────────────────────────────────────────────

    /// Stores a value under `key`, replacing any previous value.
    pub fn set_value<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Reads a stored value as `T`. `None` if absent or of another type.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.store.get(key)?.downcast_ref::<T>()
    }

    pub fn remove_value(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    /// Best-effort client IP: first `X-Forwarded-For` entry, then
    /// `X-Real-IP`, then the peer address. Headers are not validated.
    pub fn real_ip(&self) -> String {
        fn non_empty(v: &str) -> Option<&str> {
            Some(v.trim()).filter(|v| !v.is_empty())
        }
        self.request
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(non_empty)
            .or_else(|| self.request.header("x-real-ip").and_then(non_empty))
            .map(str::to_owned)
            .or_else(|| self.request.remote_addr().map(|addr| addr.ip().to_string()))
            .unwrap_or_default()
    }

    /// Writes a redirect. `code` must be in `300..=308`; no body is written.
    pub fn redirect(&mut self, code: u16, url: &str) -> Result<(), Error> {
        if !(300..=308).contains(&code) {
            return Err(Error::invalid_argument(format!(
                "redirect status must be within 300-308, got {code}"
            )));
        }
        let status = StatusCode::from_u16(code).map_err(|e| Error::invalid_argument(e.to_string()))?;
        self.response.set_header(header::LOCATION, url);
        self.response.write_header(status);
        Ok(())
    }

    /// Sets a response header.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        self.response.set_header(name, value);
    }

    /// Emits a server-error event for an error the handler has dealt with
    /// itself. The chain is not affected and no failure handler runs; the
    /// event trace points at the caller.
    #[track_caller]
    pub fn report(&self, err: impl Into<HandlerError>) {
        let err = err.into();
        let location = std::panic::Location::caller();
        self.reporter.report(
            EventKind::ServerError,
            err.to_string(),
            Arc::clone(&self.request),
            TraceSource::Origin(location),
        );
    }
}
