//! Static file serving.
//!
//! `None` from either function means "not found"; the dispatcher turns it
//! into the not-found failure path so static misses are reported exactly
//! like unmatched routes.
//!
//! Files are read into memory whole and sent with `Last-Modified`. A request
//! whose `If-Modified-Since` is not older than the file gets `304` with no
//! body. Range requests are not supported; the full file is always sent.
//!
//! The tail handed to [`serve_dir`] is already percent-decoded, so encoded
//! `..` segments are rejected like literal ones.

use std::path::{Component, Path};
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use httpdate::HttpDate;
use tracing::warn;

use crate::response::{ContentType, ResponseWriter};

type HttpResponse = http::Response<Full<Bytes>>;

/// Serves `tail` from below `root`.
pub(crate) async fn serve_dir(
    root: &Path,
    tail: &str,
    list: bool,
    headers: &HeaderMap,
) -> Option<HttpResponse> {
    let is_dir_request = tail.is_empty() || tail.ends_with('/');
    if is_dir_request && !list {
        return None;
    }

    let relative = Path::new(tail.trim_start_matches('/'));
    if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    let full = root.join(relative);

    let meta = tokio::fs::metadata(&full).await.ok()?;
    if !meta.is_dir() {
        return read(&full, meta.modified().ok(), headers).await;
    }
    if !list {
        return None;
    }

    let index = full.join("index.html");
    if let Ok(meta) = tokio::fs::metadata(&index).await {
        if meta.is_file() {
            return read(&index, meta.modified().ok(), headers).await;
        }
    }
    listing(&full, tail).await
}

/// Serves exactly one file.
pub(crate) async fn serve_file(path: &Path, headers: &HeaderMap) -> Option<HttpResponse> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    read(path, meta.modified().ok(), headers).await
}

async fn read(path: &Path, modified: Option<SystemTime>, headers: &HeaderMap) -> Option<HttpResponse> {
    let last_modified = modified.map(HttpDate::from);
    if let Some(last_modified) = last_modified {
        if not_modified_since(headers, last_modified) {
            let mut w = ResponseWriter::new();
            w.set_header(header::LAST_MODIFIED, &last_modified.to_string());
            w.write_header(StatusCode::NOT_MODIFIED);
            return Some(w.into_response());
        }
    }

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), "static file unreadable: {e}");
            return None;
        }
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut w = ResponseWriter::new();
    w.write(&data);
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        w.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(last_modified) = last_modified {
        w.set_header(header::LAST_MODIFIED, &last_modified.to_string());
    }
    Some(w.into_response())
}

/// `If-Modified-Since` is at or after `last_modified`. Unparsable dates
/// count as absent.
fn not_modified_since(headers: &HeaderMap, last_modified: HttpDate) -> bool {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<HttpDate>().ok())
        .is_some_and(|since| last_modified <= since)
}

async fn listing(dir: &Path, tail: &str) -> Option<HttpResponse> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    // Links are relative, so a directory requested without its trailing
    // slash would resolve them one level up.
    let prefix = match tail.rsplit('/').next() {
        Some(last) if !tail.is_empty() && !tail.ends_with('/') => format!("{last}/"),
        _ => String::new(),
    };

    let mut html = String::from("<!doctype html>\n<pre>\n");
    for name in &names {
        let escaped = escape_html(name);
        html.push_str(&format!("<a href=\"{prefix}{escaped}\">{escaped}</a>\n"));
    }
    html.push_str("</pre>\n");

    let mut w = ResponseWriter::new();
    w.bytes(ContentType::Html, html.into_bytes());
    Some(w.into_response())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
