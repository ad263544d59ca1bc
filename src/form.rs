//! Query-string and body decoding.
//!
//! Decoding runs at most once per [`Context`](crate::Context); the outcome,
//! success or failure, is cached there. Only `POST`, `PUT` and `PATCH`
//! bodies are decoded, and only for urlencoded and multipart content.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use http::Method;

use crate::request::Request;

/// Default limit for decoded form bodies (10 MiB).
pub(crate) const DEFAULT_MAX_FORM_BYTES: usize = 10 << 20;

/// Why a request body (or query string) could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    /// The body exceeds the configured form limit.
    TooLarge { limit: usize },
    /// Malformed `application/x-www-form-urlencoded` data.
    Urlencoded(String),
    /// `multipart/form-data` without a usable boundary.
    MissingBoundary,
    /// Malformed multipart data.
    Multipart(String),
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { limit } => write!(f, "body exceeds the {limit} byte form limit"),
            Self::Urlencoded(e) => write!(f, "malformed urlencoded data: {e}"),
            Self::MissingBoundary => f.write_str("multipart body without a boundary"),
            Self::Multipart(e) => write!(f, "malformed multipart data: {e}"),
        }
    }
}

impl StdError for BodyError {}

/// A file part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Decoded query string and body fields, in request order.
#[derive(Debug, Default)]
pub(crate) struct FormData {
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Vec<(String, String)>,
    pub(crate) files: Vec<FormFile>,
}

impl FormData {
    pub(crate) fn query_value(&self, key: &str) -> Option<&str> {
        first(&self.query, key)
    }

    /// Body fields take precedence over query parameters of the same name.
    pub(crate) fn form_value(&self, key: &str) -> Option<&str> {
        first(&self.body, key).or_else(|| self.query_value(key))
    }

    pub(crate) fn file(&self, key: &str) -> Option<&FormFile> {
        self.files.iter().find(|f| f.name == key)
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

pub(crate) async fn parse(req: &Request, max_bytes: usize) -> Result<FormData, BodyError> {
    let mut form = FormData {
        query: urlencoded(req.query().unwrap_or("").as_bytes())?,
        ..FormData::default()
    };

    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return Ok(form);
    }

    let content_type = req.content_type().unwrap_or("");
    let is_urlencoded = content_type.starts_with("application/x-www-form-urlencoded");
    let is_multipart = content_type.starts_with("multipart/form-data");
    if !is_urlencoded && !is_multipart {
        return Ok(form);
    }

    if req.body().len() > max_bytes {
        return Err(BodyError::TooLarge { limit: max_bytes });
    }

    if is_urlencoded {
        form.body = urlencoded(req.body())?;
    } else {
        let boundary = multer::parse_boundary(content_type).map_err(|_| BodyError::MissingBoundary)?;
        multipart(req.body().clone(), boundary, &mut form).await?;
    }
    Ok(form)
}

fn urlencoded(raw: &[u8]) -> Result<Vec<(String, String)>, BodyError> {
    serde_urlencoded::from_bytes(raw).map_err(|e| BodyError::Urlencoded(e.to_string()))
}

async fn multipart(body: Bytes, boundary: String, form: &mut FormData) -> Result<(), BodyError> {
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut parts = multer::Multipart::new(stream, boundary);

    let bad = |e: multer::Error| BodyError::Multipart(e.to_string());
    while let Some(field) = parts.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(str::to_owned);
        match file_name {
            Some(file_name) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let data = field.bytes().await.map_err(bad)?;
                form.files.push(FormFile { name, file_name, content_type, data });
            }
            None => {
                let value = field.text().await.map_err(bad)?;
                form.body.push((name, value));
            }
        }
    }
    Ok(())
}
