//! Minimal HTTP/1.1 request reader.
//!
//! Reads exactly one request off a buffered stream: request line, header block
//! and a `Content-Length` body. Pipelined requests are left in the buffer for the
//! next call; nothing here guarantees they are honored.

use crate::error::{ServerError, ServerResult};
use crate::http::request::{normalize_path, parse_query, Body, Method, Request, Version};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Size limits applied while reading a request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Reads the request line. `Ok(None)` means the peer closed the connection
/// before sending anything.
pub async fn read_request_line<R>(reader: &mut R, limits: &Limits) -> ServerResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_line(reader, limits.max_header_bytes).await? else {
            return Ok(None);
        };
        // Stray CRLFs between requests are tolerated.
        if !line.is_empty() {
            return Ok(Some(line));
        }
    }
}

/// Reads headers and body for a request whose line was already consumed.
pub async fn read_request<R>(reader: &mut R, request_line: &str, limits: &Limits) -> ServerResult<Request>
where
    R: AsyncBufRead + Unpin,
{
    let (method, target, version) = parse_request_line(request_line)?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (target, HashMap::new()),
    };

    let mut headers = HashMap::new();
    let mut header_bytes = 0usize;
    loop {
        let line = read_line(reader, limits.max_header_bytes)
            .await?
            .ok_or_else(|| ServerError::ParseError("connection closed inside header block".into()))?;
        if line.is_empty() {
            break;
        }
        header_bytes += line.len();
        if header_bytes > limits.max_header_bytes {
            return Err(ServerError::ParseError("header block too large".into()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ServerError::ParseError(format!("malformed header line '{}'", line)))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ServerError::ParseError(format!("invalid header name '{}'", name)));
        }
        headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
    }

    if headers
        .get("transfer-encoding")
        .map(|te| !te.eq_ignore_ascii_case("identity"))
        .unwrap_or(false)
    {
        return Err(ServerError::ParseError("transfer-encoded request bodies are not supported".into()));
    }

    let mut data = Vec::new();
    if let Some(content_length) = headers.get("content-length") {
        let length: usize = content_length
            .parse()
            .map_err(|_| ServerError::ParseError(format!("invalid content-length '{}'", content_length)))?;
        if length > limits.max_body_bytes {
            return Err(ServerError::ParseError("request body too large".into()));
        }
        data.resize(length, 0);
        reader
            .read_exact(&mut data)
            .await
            .map_err(|_| ServerError::ParseError("connection closed inside body".into()))?;
    }

    let content_type = headers.get("content-type").map(String::as_str).unwrap_or("");
    let body = Body::with_content_type(content_type, data);

    Ok(Request {
        method,
        path: normalize_path(path),
        version,
        query,
        headers,
        body,
    })
}

fn parse_request_line(line: &str) -> ServerResult<(Method, &str, Version)> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ServerError::ParseError(format!("invalid request line '{}'", line)));
    };
    if !target.starts_with('/') {
        return Err(ServerError::ParseError(format!("unsupported request target '{}'", target)));
    }
    Ok((method.parse()?, target, version.parse()?))
}

/// Reads one CRLF- or LF-terminated line without the terminator.
async fn read_line<R>(reader: &mut R, limit: usize) -> ServerResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(if buf.len() > limit {
            ServerError::ParseError("line too long".into())
        } else {
            ServerError::ParseError("connection closed mid-line".into())
        });
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| ServerError::ParseError("request is not valid UTF-8".into()))
}
