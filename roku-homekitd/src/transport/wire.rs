//! HTTP/1.1 message framing for controller connections. Controllers keep one
//! connection open and pipeline requests over it, so messages are cut out of
//! a byte buffer rather than read from a socket.

use axum::http::StatusCode;
use thiserror::Error;

/// Largest request body accepted from a controller
pub const MAX_BODY: usize = 64 * 1024;
const MAX_HEADERS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request body of {0} bytes is too large")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Remove the first complete request from `buf`. `None` means more bytes are needed.
pub fn take_request(buf: &mut Vec<u8>) -> Result<Option<Request>, WireError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    let head_len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(WireError::Malformed(e.to_string())),
    };

    let mut content_length = 0;
    let mut content_type = None;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| WireError::Malformed("bad Content-Length".to_string()))?;
        } else if header.name.eq_ignore_ascii_case("content-type") {
            content_type = std::str::from_utf8(header.value).ok().map(str::to_string);
        }
    }
    if content_length > MAX_BODY {
        return Err(WireError::TooLarge(content_length));
    }
    if buf.len() < head_len + content_length {
        return Ok(None);
    }

    let request = Request {
        method: parsed.method.unwrap_or("GET").to_string(),
        path: parsed.path.unwrap_or("/").to_string(),
        content_type,
        body: buf[head_len..head_len + content_length].to_vec(),
    };
    buf.drain(..head_len + content_length);
    Ok(Some(request))
}

fn reason(status: StatusCode) -> &'static str {
    match status.as_u16() {
        470 => "Connection Authorization Required",
        _ => status.canonical_reason().unwrap_or(""),
    }
}

pub fn response(status: StatusCode, content_type: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason(status));
    if let Some(content_type) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Unsolicited characteristic notification
pub fn event(body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "EVENT/1.0 200 OK\r\nContent-Type: application/hap+json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}
